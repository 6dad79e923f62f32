//! Recovery chain for session records that fail validation.
//!
//! In order: use the record as-is, fall back to its checkpoint, rebuild
//! from whatever history survives. Only when nothing usable is left does
//! loading fail.

use serde_json::Value;
use storyloom_domain::{Checkpoint, GameHistoryEntry, GameState, Scene};

use crate::use_cases::scene_parser::FALLBACK_CHOICES;
use crate::use_cases::validation::{
    is_valid_entry_value, is_valid_scene_value, validate, validate_document, ValidationReport,
};

/// Description used when no scene text survived at all.
pub const RESUME_DESCRIPTION: &str =
    "You gather your thoughts and take stock of where your journey has led you.";

/// How a state was obtained from its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPath {
    Intact,
    Checkpoint,
    Reconstructed,
}

/// Turn a migrated record into a valid state, repairing it if needed.
///
/// On failure the returned report lists what was wrong with the record.
pub fn recover_state(document: &Value) -> Result<(GameState, RecoveryPath), ValidationReport> {
    let mut report = validate_document(document);
    if report.is_valid() {
        match serde_json::from_value::<GameState>(document.clone()) {
            Ok(state) => {
                let semantic = validate(&state);
                if semantic.is_valid() {
                    return Ok((state, RecoveryPath::Intact));
                }
                report = semantic;
            }
            Err(e) => tracing::warn!(error = %e, "Valid-looking record failed to decode"),
        }
    }

    if let Some(state) = from_checkpoint(document) {
        tracing::warn!(violations = %report, "Session record invalid, restored from its checkpoint");
        return Ok((state, RecoveryPath::Checkpoint));
    }

    if let Some(state) = reconstruct(document) {
        tracing::warn!(
            violations = %report,
            history = state.history.len(),
            "Session record invalid, rebuilt from surviving history"
        );
        return Ok((state, RecoveryPath::Reconstructed));
    }

    Err(report)
}

fn decode_valid(document: Value) -> Option<GameState> {
    let state = serde_json::from_value::<GameState>(document).ok()?;
    validate(&state).is_valid().then_some(state)
}

/// The record's own checkpoint as current scene and history.
fn from_checkpoint(document: &Value) -> Option<GameState> {
    let object = document.as_object()?;
    let checkpoint = object.get("checkpoint")?.as_object()?;
    let scene = checkpoint.get("scene").filter(|s| is_valid_scene_value(s))?;
    let history = checkpoint.get("history")?.as_array()?;
    if !history.iter().all(is_valid_entry_value) {
        return None;
    }

    let candidate = serde_json::json!({
        "currentScene": scene,
        "history": history,
        "gameOver": object.get("gameOver").and_then(Value::as_bool).unwrap_or(false),
        "sessionId": object.get("sessionId").and_then(Value::as_str),
        "checkpoint": checkpoint,
    });
    decode_valid(candidate)
}

/// Keep every history entry that still makes sense; synthesize a scene if
/// the current one is unusable.
fn reconstruct(document: &Value) -> Option<GameState> {
    let object = document.as_object()?;

    let history: Vec<GameHistoryEntry> = object
        .get("history")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(salvage_entry).collect())
        .unwrap_or_default();

    let scene = object
        .get("currentScene")
        .filter(|s| is_valid_scene_value(s))
        .and_then(|s| serde_json::from_value::<Scene>(s.clone()).ok());

    if scene.is_none() && history.is_empty() {
        return None;
    }

    let current_scene = scene.unwrap_or_else(|| synthesize_scene(&history));
    let checkpoint = object
        .get("checkpoint")
        .and_then(|c| serde_json::from_value::<Checkpoint>(c.clone()).ok());

    let mut state = GameState {
        current_scene,
        history,
        game_over: object.get("gameOver").and_then(Value::as_bool).unwrap_or(false),
        session_id: object.get("sessionId").and_then(Value::as_str).map(str::to_string),
        checkpoint,
    };

    if !validate(&state).is_valid() {
        state.checkpoint = None;
    }
    validate(&state).is_valid().then_some(state)
}

fn salvage_entry(value: &Value) -> Option<GameHistoryEntry> {
    if !is_valid_entry_value(value) {
        return None;
    }
    let mut entry = serde_json::from_value::<GameHistoryEntry>(value.clone()).ok()?;
    if entry.scene_id.trim().is_empty() || entry.choice.trim().is_empty() {
        return None;
    }
    // An unreadable time is dropped rather than the whole entry
    if entry
        .timestamp
        .as_deref()
        .is_some_and(|t| storyloom_domain::parse_timestamp(t).is_none())
    {
        entry.timestamp = None;
    }
    Some(entry)
}

fn synthesize_scene(history: &[GameHistoryEntry]) -> Scene {
    let description = history
        .last()
        .and_then(|entry| entry.scene_description.clone())
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| RESUME_DESCRIPTION.to_string());
    Scene::from_texts(Scene::ordinal_id(history.len() + 1), description, FALLBACK_CHOICES)
}
