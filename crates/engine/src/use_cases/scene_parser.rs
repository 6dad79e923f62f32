//! Scene parser for streamed generator output.
//!
//! Turns an accumulating text buffer into a [`Scene`]. The chain of
//! strategies is tried in a fixed order and the last one always succeeds, so
//! malformed or truncated output never stalls the narrative loop:
//!
//! 1. `StructuredJson` - `{"description": ..., "choices": [...]}`, optionally
//!    wrapped in a code fence or prose
//! 2. `MarkupDelimited` - `**Choice 1: Title** body` emphasis blocks
//! 3. `LabeledLine` - `Choice 1: text` / `Option 2: text` lines
//! 4. `Fallback` - the whole buffer as description plus placeholder choices
//!
//! The parser stays permissive: duplicate choice texts are kept. Uniqueness is
//! enforced by whoever commits the scene.

use regex_lite::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use storyloom_domain::Scene;

/// Choices offered when the generator gave us prose only.
pub const FALLBACK_CHOICES: [&str; 3] = [
    "Continue onward",
    "Look around carefully",
    "Wait and see what happens",
];

// Model special tokens that leak through some backends:
// <|...|> style tokens, [INST]/[/INST], <<SYS>>/<</SYS>>
static SPECIAL_TOKENS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|[^|>]+\|>|\[/?INST\]|<</?SYS>>").expect("valid regex"));

// **Choice 1: Title** or **Choice 1**: (title may be empty)
static MARKUP_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\*\*\s*(?:choice|option)\s+(\d+)\s*[:.)-]?\s*([^*\n]*?)\s*\*\*[ \t]*[:.-]?")
        .expect("valid regex")
});

static LABELED_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*]\s*)?(?:\*\*)?\s*(?:choice|option)\s*(\d+)\s*(?:\*\*)?\s*[:.)-]\s*(.+)$")
        .expect("valid regex")
});

// Description of a JSON object cut off mid-stream
static PARTIAL_DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""description"\s*:\s*"([^"]*)"#).expect("valid regex")
});

/// One link of the parsing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    StructuredJson,
    MarkupDelimited,
    LabeledLine,
    Fallback,
}

impl ParseStrategy {
    /// Every strategy, in the order they are tried.
    pub const CHAIN: [ParseStrategy; 4] = [
        ParseStrategy::StructuredJson,
        ParseStrategy::MarkupDelimited,
        ParseStrategy::LabeledLine,
        ParseStrategy::Fallback,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ParseStrategy::StructuredJson => "structured_json",
            ParseStrategy::MarkupDelimited => "markup_delimited",
            ParseStrategy::LabeledLine => "labeled_line",
            ParseStrategy::Fallback => "fallback",
        }
    }

    /// Try this strategy on already-cleaned text. `Fallback` never returns `None`.
    pub fn apply(&self, text: &str) -> Option<Scene> {
        match self {
            ParseStrategy::StructuredJson => structured_json(text),
            ParseStrategy::MarkupDelimited => markup_delimited(text),
            ParseStrategy::LabeledLine => labeled_line(text),
            ParseStrategy::Fallback => Some(fallback(text)),
        }
    }
}

/// A parsed scene together with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScene {
    pub scene: Scene,
    pub strategy: ParseStrategy,
}

impl ParsedScene {
    /// Empty description and no choices: the generator has not said anything yet.
    pub fn is_pending(&self) -> bool {
        self.scene.description.is_empty() && self.scene.choices.is_empty()
    }
}

/// Parse a buffer into a scene. Never fails.
///
/// The returned scene has an empty id; the caller assigns one.
pub fn parse_scene(buffer: &str) -> Scene {
    parse_scene_with_strategy(buffer).scene
}

/// Like [`parse_scene`], also reporting which strategy matched.
pub fn parse_scene_with_strategy(buffer: &str) -> ParsedScene {
    let stripped = strip_special_tokens(buffer);

    // JSON carries its own escapes, so try it before unescaping anything.
    if let Some(scene) = structured_json(&stripped) {
        return ParsedScene {
            scene,
            strategy: ParseStrategy::StructuredJson,
        };
    }

    // Only an escaped object (`{\"description\": ...}`) can parse after
    // unescaping, so skip the second JSON attempt otherwise.
    let retry_json = stripped.contains("\\\"");
    let cleaned = clean_text(&stripped);
    for strategy in ParseStrategy::CHAIN {
        if strategy == ParseStrategy::StructuredJson && !retry_json {
            continue;
        }
        if let Some(scene) = strategy.apply(&cleaned) {
            tracing::trace!(
                strategy = strategy.name(),
                choices = scene.choices.len(),
                "Parsed scene"
            );
            return ParsedScene { scene, strategy };
        }
    }

    ParsedScene {
        scene: fallback(&cleaned),
        strategy: ParseStrategy::Fallback,
    }
}

/// Accumulates streamed chunks and re-parses the buffer as it grows.
#[derive(Debug, Default)]
pub struct SceneStream {
    buffer: String,
}

impl SceneStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the provisional parse of everything so far.
    pub fn push(&mut self, chunk: &str) -> ParsedScene {
        self.buffer.push_str(chunk);
        parse_scene_with_strategy(&self.buffer)
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    /// Final parse once the completion signal has arrived.
    pub fn finish(self) -> ParsedScene {
        parse_scene_with_strategy(&self.buffer)
    }
}

// =============================================================================
// Pre-processing
// =============================================================================

/// Remove model special tokens.
pub fn strip_special_tokens(raw: &str) -> String {
    SPECIAL_TOKENS_RE.replace_all(raw, "").to_string()
}

/// Pre-processing shared by the text strategies: strip special tokens and
/// control characters, unescape `\n` and `\"`, collapse run-on whitespace.
pub fn clean_text(raw: &str) -> String {
    let unescaped = strip_special_tokens(raw)
        .replace("\\n", "\n")
        .replace("\\\"", "\"");
    let without_controls: String = unescaped
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    collapse_whitespace(&without_controls)
}

/// Collapse runs of spaces within lines and runs of blank lines to one.
fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = true;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !previous_blank {
                lines.push(String::new());
            }
            previous_blank = true;
        } else {
            lines.push(collapsed);
            previous_blank = false;
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// Strategies
// =============================================================================

fn structured_json(text: &str) -> Option<Scene> {
    let trimmed = text.trim();
    let value = serde_json::from_str::<Value>(trimmed).ok().or_else(|| {
        // Code fences or prose around the object
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
    })?;

    let object = value.as_object()?;
    let description = object.get("description")?.as_str()?;
    let entries = object.get("choices")?.as_array()?;

    let texts: Vec<String> = entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(text) => Some(text.as_str()),
            Value::Object(fields) => fields.get("text").and_then(Value::as_str),
            _ => None,
        })
        .map(single_line)
        .filter(|text| !text.is_empty())
        .collect();

    if texts.is_empty() {
        return None;
    }

    Some(Scene::from_texts("", collapse_whitespace(description), texts))
}

fn markup_delimited(text: &str) -> Option<Scene> {
    let headers: Vec<_> = MARKUP_HEADER_RE.captures_iter(text).collect();
    if headers.is_empty() {
        return None;
    }

    let mut residual = String::new();
    let mut choices = Vec::new();
    let mut cursor = 0;

    for (idx, caps) in headers.iter().enumerate() {
        let whole = caps.get(0)?;
        residual.push_str(&text[cursor..whole.start()]);
        residual.push('\n');

        let next_header = headers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        let rest = &text[whole.end()..next_header];
        // A blank line ends the body; anything after it is narration again.
        let body_end = rest.find("\n\n").unwrap_or(rest.len());
        let body = single_line(&rest[..body_end]);
        cursor = whole.end() + body_end;

        let title = caps.get(2).map_or("", |m| m.as_str()).trim();
        let choice_text = match (title.is_empty(), body.is_empty()) {
            (false, true) => title.to_string(),
            (true, false) => body,
            (false, false) if title.ends_with(['.', '!', '?', ':']) => format!("{} {}", title, body),
            (false, false) => format!("{}: {}", title, body),
            (true, true) => continue,
        };
        choices.push(choice_text);
    }
    residual.push_str(&text[cursor..]);

    if choices.is_empty() {
        return None;
    }

    Some(Scene::from_texts("", collapse_whitespace(&residual), choices))
}

fn labeled_line(text: &str) -> Option<Scene> {
    let mut description = Vec::new();
    let mut choices = Vec::new();

    for line in text.lines() {
        match LABELED_LINE_RE.captures(line) {
            Some(caps) => {
                let choice = caps
                    .get(2)
                    .map_or("", |m| m.as_str())
                    .trim()
                    .trim_matches('*')
                    .trim();
                if !choice.is_empty() {
                    choices.push(choice.to_string());
                }
            }
            None => description.push(line),
        }
    }

    if choices.is_empty() {
        return None;
    }

    Some(Scene::from_texts("", collapse_whitespace(&description.join("\n")), choices))
}

fn fallback(text: &str) -> Scene {
    let text = text.trim();
    if text.is_empty() {
        return Scene::default();
    }

    // A JSON object cut off mid-stream still has a readable description.
    // Until its description key arrives there is nothing to show yet.
    let description = if looks_like_json_object(text) {
        PARTIAL_DESCRIPTION_RE
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| collapse_whitespace(m.as_str()))
            .unwrap_or_default()
    } else {
        text.to_string()
    };

    Scene::from_texts("", description, FALLBACK_CHOICES)
}

/// `{` followed by a quoted key, as opposed to prose that opens with a brace.
fn looks_like_json_object(text: &str) -> bool {
    text.strip_prefix('{')
        .is_some_and(|rest| rest.trim_start().is_empty() || rest.trim_start().starts_with('"'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_domain::Choice;

    #[test]
    fn test_cave_json() {
        let parsed = parse_scene_with_strategy(
            r#"{"description":"You enter the cave.","choices":["Go left","Go right"]}"#,
        );
        assert_eq!(parsed.strategy, ParseStrategy::StructuredJson);
        assert_eq!(parsed.scene.description, "You enter the cave.");
        assert_eq!(
            parsed.scene.choices,
            vec![Choice::new(1, "Go left"), Choice::new(2, "Go right")]
        );
        assert_eq!(parsed.scene.id, "");
    }

    #[test]
    fn test_json_object_choices_and_empty_filtering() {
        let scene = parse_scene(
            r#"{"description":"A bridge.","choices":[{"text":"Cross"},"",{"text":"  "},"Turn back",{"id":9}]}"#,
        );
        assert_eq!(scene.choices, vec![Choice::new(1, "Cross"), Choice::new(2, "Turn back")]);
    }

    #[test]
    fn test_json_with_only_empty_choices_falls_through() {
        let parsed = parse_scene_with_strategy(r#"{"description":"Quiet.","choices":["", " "]}"#);
        assert_ne!(parsed.strategy, ParseStrategy::StructuredJson);
        assert_eq!(parsed.scene.choices.len(), 3);
    }

    #[test]
    fn test_json_in_code_fence() {
        let raw = "Here is the scene:\n```json\n{\"description\": \"Rain falls.\", \"choices\": [\"Shelter\", \"Run\"]}\n```";
        let parsed = parse_scene_with_strategy(raw);
        assert_eq!(parsed.strategy, ParseStrategy::StructuredJson);
        assert_eq!(parsed.scene.description, "Rain falls.");
        assert_eq!(parsed.scene.choices.len(), 2);
    }

    #[test]
    fn test_json_keeps_escaped_quotes() {
        let scene = parse_scene(r#"{"description":"He says \"halt\".","choices":["Obey"]}"#);
        assert_eq!(scene.description, "He says \"halt\".");
    }

    #[test]
    fn test_labeled_lines() {
        let parsed = parse_scene_with_strategy("Choice 1: Flee\nChoice 2: Fight");
        assert_eq!(parsed.strategy, ParseStrategy::LabeledLine);
        assert_eq!(
            parsed.scene.choices,
            vec![Choice::new(1, "Flee"), Choice::new(2, "Fight")]
        );
        assert_eq!(parsed.scene.description, "");
    }

    #[test]
    fn test_labeled_lines_with_description_and_escapes() {
        let raw = "The wolf   growls.\\nOption 1: Back away slowly\\n- Option 2) Throw the meat";
        let parsed = parse_scene_with_strategy(raw);
        assert_eq!(parsed.strategy, ParseStrategy::LabeledLine);
        assert_eq!(parsed.scene.description, "The wolf growls.");
        assert_eq!(
            parsed.scene.choices,
            vec![Choice::new(1, "Back away slowly"), Choice::new(2, "Throw the meat")]
        );
    }

    #[test]
    fn test_markup_delimited() {
        let raw = "The gate creaks open.\n\n**Choice 1: Sneak in** Keep to the shadows.\n**Choice 2: Knock**\n\nSomewhere a bell tolls.";
        let parsed = parse_scene_with_strategy(raw);
        assert_eq!(parsed.strategy, ParseStrategy::MarkupDelimited);
        assert_eq!(
            parsed.scene.choices,
            vec![
                Choice::new(1, "Sneak in: Keep to the shadows."),
                Choice::new(2, "Knock"),
            ]
        );
        assert!(parsed.scene.description.contains("The gate creaks open."));
        assert!(parsed.scene.description.contains("Somewhere a bell tolls."));
        assert!(!parsed.scene.description.contains("Choice"));
    }

    #[test]
    fn test_markup_with_colon_outside_emphasis() {
        let scene = parse_scene("A door.\n**Choice 1**: Open it\n**Choice 2**: Leave");
        assert_eq!(scene.choices, vec![Choice::new(1, "Open it"), Choice::new(2, "Leave")]);
        assert_eq!(scene.description, "A door.");
    }

    #[test]
    fn test_duplicate_choices_are_kept() {
        let scene = parse_scene("Choice 1: Wait\nChoice 2: Wait");
        assert_eq!(scene.choices.len(), 2);
        assert!(!scene.is_committable());
    }

    #[test]
    fn test_fallback_prose() {
        let parsed = parse_scene_with_strategy("The   storm\u{0007} rages on.");
        assert_eq!(parsed.strategy, ParseStrategy::Fallback);
        assert_eq!(parsed.scene.description, "The storm rages on.");
        let texts: Vec<_> = parsed.scene.choices.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, FALLBACK_CHOICES);
        assert!(parsed.scene.is_committable());
    }

    #[test]
    fn test_empty_buffer_is_pending() {
        for raw in ["", "   \n\t ", "<|start|>"] {
            let parsed = parse_scene_with_strategy(raw);
            assert!(parsed.is_pending(), "{:?} was not pending", raw);
            assert!(parsed.scene.choices.is_empty());
        }
    }

    #[test]
    fn test_truncated_json_shows_partial_description() {
        let scene = parse_scene(r#"{"description":"You enter the cave.","choices":["Go le"#);
        assert_eq!(scene.description, "You enter the cave.");
        assert_eq!(scene.choices.len(), 3);
    }

    #[test]
    fn test_prose_opening_with_brace_is_kept() {
        let parsed = parse_scene_with_strategy("{sighs} The old man looks away.");
        assert_eq!(parsed.strategy, ParseStrategy::Fallback);
        assert_eq!(parsed.scene.description, "{sighs} The old man looks away.");
        assert_eq!(parsed.scene.choices.len(), 3);
    }

    #[test]
    fn test_json_before_description_key_is_pending_text() {
        let scene = parse_scene(r#"{"choices":["Go le"#);
        assert_eq!(scene.description, "");
    }

    #[test]
    fn test_escaped_json_parses_after_unescaping() {
        let parsed = parse_scene_with_strategy(r#"{\"description\":\"A gate.\",\"choices\":[\"Open\"]}"#);
        assert_eq!(parsed.strategy, ParseStrategy::StructuredJson);
        assert_eq!(parsed.scene.description, "A gate.");
        assert_eq!(parsed.scene.choices, vec![Choice::new(1, "Open")]);
    }

    #[test]
    fn test_special_tokens_stripped() {
        let scene = parse_scene("[INST]<|message|>Choice 1: Run<|end|>");
        assert_eq!(scene.choices, vec![Choice::new(1, "Run")]);
    }

    #[test]
    fn test_never_panics_on_garbage() {
        let garbage = String::from_utf8_lossy(&[0xff, 0x00, 0x7b, 0xfe, 0x7d, 0x5c, 0x22, 0x0a, 0x80]).to_string();
        let inputs = [
            garbage.as_str(),
            "{",
            "}{",
            "{\"description\":",
            "**Choice",
            "**Choice 1:**",
            "Choice 1:",
            "\\",
            "\u{0000}\u{001b}[31m",
            "🐉 **Option 7: 🔥** 🐉",
        ];
        for input in inputs {
            let _ = parse_scene(input);
        }
    }

    #[test]
    fn test_scene_stream_accumulates() {
        let mut stream = SceneStream::new();
        assert!(stream.is_empty());

        let provisional = stream.push("{\"description\":\"You enter");
        assert_eq!(provisional.strategy, ParseStrategy::Fallback);

        stream.push(" the cave.\",\"choices\":[\"Go left\",");
        stream.push("\"Go right\"]}");
        let final_parse = stream.finish();
        assert_eq!(final_parse.strategy, ParseStrategy::StructuredJson);
        assert_eq!(final_parse.scene.description, "You enter the cave.");
        assert_eq!(final_parse.scene.choices.len(), 2);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("a\\nb"), "a\nb");
        assert_eq!(clean_text("say \\\"hi\\\""), "say \"hi\"");
        assert_eq!(clean_text("a\r\n\n\n\nb  c"), "a\n\nb c");
        assert_eq!(clean_text("\n\n lead"), "lead");
    }
}
