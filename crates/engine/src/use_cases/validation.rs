//! Structural validation for game states.
//!
//! Two entry points:
//! - [`validate_document`] checks an untyped JSON record (as loaded from a
//!   store, after migration) and never fails on odd input types
//! - [`validate`] checks a typed [`GameState`] before it is persisted
//!
//! Both collect every violation instead of stopping at the first one.

use std::collections::HashSet;
use std::fmt;

use serde_json::{Map, Value};
use storyloom_domain::{parse_timestamp, GameHistoryEntry, GameState, Scene};

/// A single broken rule, located by a JSON-pointer-like path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Every violation found in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Whether any violation sits at or below `prefix`.
    pub fn touches(&self, prefix: &str) -> bool {
        self.violations.iter().any(|v| v.path.starts_with(prefix))
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ValidationError::Invalid(self))
        }
    }

    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation::new(path, message));
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.violations.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid game state: {0}")]
    Invalid(ValidationReport),

    #[error("Scene cannot be committed: {reason}")]
    Uncommittable { reason: String },
}

// =============================================================================
// Untyped records
// =============================================================================

/// Validate a JSON record against the current schema's structural rules.
pub fn validate_document(document: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Some(object) = document.as_object() else {
        report.push("", "record must be an object");
        return report;
    };

    match object.get("currentScene") {
        Some(scene) => check_scene_value(scene, "/currentScene", &mut report),
        None => report.push("/currentScene", "missing"),
    }

    match object.get("history") {
        Some(history) => check_history_value(history, "/history", &mut report),
        None => report.push("/history", "missing"),
    }

    if let Some(game_over) = object.get("gameOver") {
        if !game_over.is_boolean() {
            report.push("/gameOver", "must be a boolean");
        }
    }

    check_optional_string(object, "sessionId", "", &mut report);

    match object.get("checkpoint") {
        None | Some(Value::Null) => {}
        Some(Value::Object(checkpoint)) => {
            match checkpoint.get("scene") {
                Some(scene) => check_scene_value(scene, "/checkpoint/scene", &mut report),
                None => report.push("/checkpoint/scene", "missing"),
            }
            match checkpoint.get("history") {
                Some(history) => check_history_value(history, "/checkpoint/history", &mut report),
                None => report.push("/checkpoint/history", "missing"),
            }
            if !checkpoint.get("timestamp").is_some_and(Value::is_string) {
                report.push("/checkpoint/timestamp", "must be a string");
            }
        }
        Some(_) => report.push("/checkpoint", "must be an object"),
    }

    report
}

/// Whether a JSON value is a structurally valid scene.
pub fn is_valid_scene_value(value: &Value) -> bool {
    let mut report = ValidationReport::default();
    check_scene_value(value, "", &mut report);
    report.is_valid()
}

/// Whether a JSON value is a structurally valid history entry.
pub fn is_valid_entry_value(value: &Value) -> bool {
    let mut report = ValidationReport::default();
    check_entry_value(value, "", &mut report);
    report.is_valid()
}

fn check_scene_value(value: &Value, path: &str, report: &mut ValidationReport) {
    let Some(scene) = value.as_object() else {
        report.push(path, "must be an object");
        return;
    };

    match scene.get("id").and_then(Value::as_str) {
        Some(id) if !id.trim().is_empty() => {}
        Some(_) => report.push(format!("{}/id", path), "must not be empty"),
        None => report.push(format!("{}/id", path), "must be a string"),
    }

    if !scene.get("description").is_some_and(Value::is_string) {
        report.push(format!("{}/description", path), "must be a string");
    }

    let Some(choices) = scene.get("choices").and_then(Value::as_array) else {
        report.push(format!("{}/choices", path), "must be an array");
        return;
    };

    for (idx, choice) in choices.iter().enumerate() {
        let choice_path = format!("{}/choices/{}", path, idx);
        let Some(choice) = choice.as_object() else {
            report.push(choice_path, "must be an object");
            continue;
        };
        if !choice.get("id").is_some_and(Value::is_u64) {
            report.push(format!("{}/id", choice_path), "must be a non-negative integer");
        }
        match choice.get("text").and_then(Value::as_str) {
            Some(text) if !text.trim().is_empty() => {}
            Some(_) => report.push(format!("{}/text", choice_path), "must not be empty"),
            None => report.push(format!("{}/text", choice_path), "must be a string"),
        }
    }
}

fn check_history_value(value: &Value, path: &str, report: &mut ValidationReport) {
    let Some(entries) = value.as_array() else {
        report.push(path, "must be an array");
        return;
    };
    for (idx, entry) in entries.iter().enumerate() {
        check_entry_value(entry, &format!("{}/{}", path, idx), report);
    }
}

fn check_entry_value(value: &Value, path: &str, report: &mut ValidationReport) {
    let Some(entry) = value.as_object() else {
        report.push(path, "must be an object");
        return;
    };
    for key in ["sceneId", "choice"] {
        if !entry.get(key).is_some_and(Value::is_string) {
            report.push(format!("{}/{}", path, key), "must be a string");
        }
    }
    check_optional_string(entry, "sceneDescription", path, report);
    check_optional_string(entry, "timestamp", path, report);
}

/// Absent and `null` are both fine; anything else must be a string.
fn check_optional_string(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
    report: &mut ValidationReport,
) {
    match object.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => report.push(format!("{}/{}", path, key), "must be a string when present"),
    }
}

// =============================================================================
// Typed states
// =============================================================================

/// Validate a typed state before it is persisted.
///
/// Typing already guarantees field kinds, so this checks content: non-empty
/// ids and texts, and timestamps that actually parse.
pub fn validate(state: &GameState) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_scene(&state.current_scene, "/currentScene", &mut report);
    check_history(&state.history, "/history", &mut report);

    if let Some(checkpoint) = &state.checkpoint {
        check_scene(&checkpoint.scene, "/checkpoint/scene", &mut report);
        check_history(&checkpoint.history, "/checkpoint/history", &mut report);
        if parse_timestamp(&checkpoint.timestamp).is_none() {
            report.push("/checkpoint/timestamp", "must be a valid timestamp");
        }
    }

    report
}

fn check_scene(scene: &Scene, path: &str, report: &mut ValidationReport) {
    if scene.id.trim().is_empty() {
        report.push(format!("{}/id", path), "must not be empty");
    }
    for (idx, choice) in scene.choices.iter().enumerate() {
        if choice.text.trim().is_empty() {
            report.push(format!("{}/choices/{}/text", path, idx), "must not be empty");
        }
    }
}

fn check_history(history: &[GameHistoryEntry], path: &str, report: &mut ValidationReport) {
    for (idx, entry) in history.iter().enumerate() {
        if entry.scene_id.trim().is_empty() {
            report.push(format!("{}/{}/sceneId", path, idx), "must not be empty");
        }
        if entry.choice.trim().is_empty() {
            report.push(format!("{}/{}/choice", path, idx), "must not be empty");
        }
        if let Some(timestamp) = &entry.timestamp {
            if parse_timestamp(timestamp).is_none() {
                report.push(format!("{}/{}/timestamp", path, idx), "must be a valid timestamp");
            }
        }
    }
}

/// The stricter rule for a scene about to become `currentScene`:
/// non-empty description, at least one choice, unique ids, unique texts.
pub fn validate_committed_scene(scene: &Scene) -> Result<(), ValidationError> {
    let reject = |reason: &str| {
        Err(ValidationError::Uncommittable {
            reason: reason.to_string(),
        })
    };

    if scene.description.trim().is_empty() {
        return reject("description is empty");
    }
    if scene.choices.is_empty() {
        return reject("no choices");
    }

    let mut ids = HashSet::new();
    let mut texts = HashSet::new();
    for choice in &scene.choices {
        let text = choice.text.trim();
        if text.is_empty() {
            return reject("a choice has empty text");
        }
        if !ids.insert(choice.id) {
            return reject("duplicate choice id");
        }
        if !texts.insert(text) {
            return reject("duplicate choice text");
        }
    }

    Ok(())
}
