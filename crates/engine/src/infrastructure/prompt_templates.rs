//! Prompt templates for scene generation.
//!
//! Resolution priority: environment variable override > hard-coded default.

use std::fmt::Write;

use crate::infrastructure::ports::GenerationRequest;

/// All prompt template keys as constants.
pub mod keys {
    /// Role and tone instructions for the narrator.
    pub const SCENE_SYSTEM_PROMPT: &str = "scene.system_prompt";
    /// The response format the scene parser understands best.
    pub const SCENE_RESPONSE_FORMAT: &str = "scene.response_format";
}

/// Hard-coded default values for each template.
pub mod defaults {
    pub const SCENE_SYSTEM_PROMPT: &str = "You are the narrator of an interactive {genre} adventure. \
Continue the story in second person, present tense, reacting to the player's last choice. \
Keep each scene to one or two short paragraphs and end on a decision point.";

    pub const SCENE_RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{"description": "<the next scene>", "choices": ["<option 1>", "<option 2>", "<option 3>"]}
Offer between two and four distinct choices."#;
}

/// Environment variable that overrides a template key.
pub fn key_to_env_var(key: &str) -> String {
    format!("STORYLOOM_PROMPT_{}", key.to_uppercase().replace('.', "_"))
}

/// Get the default value for a template key.
pub fn get_default(key: &str) -> Option<&'static str> {
    match key {
        keys::SCENE_SYSTEM_PROMPT => Some(defaults::SCENE_SYSTEM_PROMPT),
        keys::SCENE_RESPONSE_FORMAT => Some(defaults::SCENE_RESPONSE_FORMAT),
        _ => None,
    }
}

/// Resolve a template: environment override first, then the default.
pub fn resolve(key: &str) -> String {
    std::env::var(key_to_env_var(key))
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| get_default(key).map(str::to_string))
        .unwrap_or_default()
}

/// System prompt for one scene request.
pub fn scene_system_prompt(request: &GenerationRequest) -> String {
    let role = resolve(keys::SCENE_SYSTEM_PROMPT).replace("{genre}", &request.genre);
    format!("{}\n\n{}", role, resolve(keys::SCENE_RESPONSE_FORMAT))
}

/// User turn for one scene request: character, recent history, the scene
/// the player is in, and what they just chose.
pub fn scene_user_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "CHARACTER: {}", request.character_summary);

    if !request.recent_history.is_empty() {
        let _ = writeln!(prompt, "\nSTORY SO FAR:");
        for entry in &request.recent_history {
            match &entry.scene_description {
                Some(description) => {
                    let _ = writeln!(prompt, "- {} -> {}", description, entry.choice);
                }
                None => {
                    let _ = writeln!(prompt, "- {}", entry.choice);
                }
            }
        }
    }

    let _ = writeln!(prompt, "\nCURRENT SCENE: {}", request.current_scene.description);
    let _ = write!(prompt, "\nTHE PLAYER CHOOSES: {}", request.chosen_option);
    prompt
}
