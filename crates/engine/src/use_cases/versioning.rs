//! Schema versioning for persisted session records.
//!
//! Records are stamped with [`SchemaVersion::CURRENT`] on the way out and
//! migrated forward step by step on the way in. Migrations work on the raw
//! JSON document because old records do not fit the current types.
//!
//! | Version | Change |
//! |---------|--------|
//! | v1.0    | unversioned legacy records |
//! | v1.1    | choice ids are integers |
//! | v1.2    | every history entry and checkpoint has a timestamp |
//! | v2.0    | camelCase keys, explicit `gameOver` and `history` |

use std::sync::Arc;

use serde_json::{Map, Value};
use storyloom_domain::{format_timestamp, GameState, SchemaVersion, VersionedState};

use crate::infrastructure::ports::ClockPort;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    #[error("Session record is not a JSON object")]
    NotAnObject,

    #[error("Malformed schema version: {0}")]
    MalformedVersion(String),

    #[error("Session record version {found} is newer than supported version {current}")]
    UnsupportedVersion {
        found: SchemaVersion,
        current: SchemaVersion,
    },

    #[error("Migration to {to} failed: {reason}")]
    StepFailed { to: SchemaVersion, reason: String },

    #[error("Migrated record could not be decoded: {0}")]
    Decode(String),
}

/// A record brought up to the current schema, still untyped.
#[derive(Debug, Clone, PartialEq)]
pub struct MigratedDocument {
    pub document: Value,
    /// Version the record declared before migration
    pub from: SchemaVersion,
}

impl MigratedDocument {
    pub fn was_migrated(&self) -> bool {
        self.from < SchemaVersion::CURRENT
    }

    /// `lastModified` of the record, if it carries one.
    pub fn last_modified(&self) -> Option<String> {
        self.document
            .get("lastModified")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn into_state(self) -> Result<GameState, MigrationError> {
        serde_json::from_value(self.document).map_err(|e| MigrationError::Decode(e.to_string()))
    }
}

type MigrationFn = fn(&mut Map<String, Value>, &str) -> Result<(), String>;

struct Migration {
    to: SchemaVersion,
    apply: MigrationFn,
}

/// Ordered by target version.
const MIGRATIONS: [Migration; 3] = [
    Migration {
        to: SchemaVersion::V1_1,
        apply: normalize_choice_ids,
    },
    Migration {
        to: SchemaVersion::V1_2,
        apply: backfill_timestamps,
    },
    Migration {
        to: SchemaVersion::V2_0,
        apply: camel_case_keys,
    },
];

#[derive(Clone)]
pub struct StateVersioner {
    clock: Arc<dyn ClockPort>,
}

impl StateVersioner {
    pub fn new(clock: Arc<dyn ClockPort>) -> Self {
        Self { clock }
    }

    /// Wrap a state for persistence: current version, modified now.
    pub fn stamp(&self, state: &GameState) -> VersionedState {
        VersionedState::new(
            state.clone(),
            SchemaVersion::CURRENT,
            format_timestamp(self.clock.now()),
        )
    }

    /// Version a record declares. Absent (or `null`) means a legacy record.
    pub fn declared_version(document: &Value) -> Result<SchemaVersion, MigrationError> {
        match document.get("version") {
            None | Some(Value::Null) => Ok(SchemaVersion::OLDEST),
            Some(Value::String(raw)) => raw
                .parse()
                .map_err(|_| MigrationError::MalformedVersion(raw.clone())),
            Some(other) => Err(MigrationError::MalformedVersion(other.to_string())),
        }
    }

    /// Bring a raw record up to the current schema.
    ///
    /// The input is consumed; the stored copy is never touched, so a failed
    /// migration leaves the durable record as it was.
    pub fn migrate_document(&self, document: Value) -> Result<MigratedDocument, MigrationError> {
        let from = Self::declared_version(&document)?;
        if from > SchemaVersion::CURRENT {
            return Err(MigrationError::UnsupportedVersion {
                found: from,
                current: SchemaVersion::CURRENT,
            });
        }

        let Value::Object(mut object) = document else {
            return Err(MigrationError::NotAnObject);
        };

        let now = format_timestamp(self.clock.now());
        for migration in MIGRATIONS.iter().filter(|m| m.to > from) {
            (migration.apply)(&mut object, &now).map_err(|reason| MigrationError::StepFailed {
                to: migration.to,
                reason,
            })?;
            tracing::debug!(from = %from, to = %migration.to, "Applied session record migration");
        }

        if from < SchemaVersion::CURRENT {
            tracing::info!(from = %from, to = %SchemaVersion::CURRENT, "Migrated session record");
        }
        object.insert("version".into(), Value::String(SchemaVersion::CURRENT.to_string()));

        Ok(MigratedDocument {
            document: Value::Object(object),
            from,
        })
    }

    /// Migrate a versioned record. A current-version record comes back unchanged.
    pub fn migrate(&self, record: VersionedState) -> Result<GameState, MigrationError> {
        let document =
            serde_json::to_value(&record).map_err(|e| MigrationError::Decode(e.to_string()))?;
        self.migrate_document(document)?.into_state()
    }
}

// =============================================================================
// Migration steps
// =============================================================================

/// Look up the first key present, for records that may still use snake_case.
fn first_key_mut<'a>(object: &'a mut Map<String, Value>, keys: &[&str]) -> Option<&'a mut Value> {
    let key = keys.iter().find(|key| object.contains_key(**key))?;
    object.get_mut(*key)
}

/// v1.1: choice ids become integers. Ids that are missing or unparseable are
/// renumbered by position; bare-string choices become `{id, text}`.
fn normalize_choice_ids(object: &mut Map<String, Value>, _now: &str) -> Result<(), String> {
    if let Some(scene) = first_key_mut(object, &["currentScene", "current_scene"]) {
        normalize_scene_choices(scene)?;
    }
    if let Some(Value::Object(checkpoint)) = object.get_mut("checkpoint") {
        if let Some(scene) = checkpoint.get_mut("scene") {
            normalize_scene_choices(scene)?;
        }
    }
    Ok(())
}

fn normalize_scene_choices(scene: &mut Value) -> Result<(), String> {
    let Some(choices) = scene.get_mut("choices") else {
        return Ok(());
    };
    let Value::Array(choices) = choices else {
        return Err("choices is not an array".into());
    };

    for (idx, choice) in choices.iter_mut().enumerate() {
        let position = idx as u64 + 1;
        match choice {
            Value::String(text) => {
                let upgraded = serde_json::json!({"id": position, "text": text.as_str()});
                *choice = upgraded;
            }
            Value::Object(fields) => {
                let id = match fields.get("id") {
                    Some(Value::Number(n)) => n.as_u64().unwrap_or(position),
                    Some(Value::String(s)) => s.trim().parse::<u64>().unwrap_or(position),
                    _ => position,
                };
                fields.insert("id".into(), Value::from(id));
            }
            _ => {}
        }
    }
    Ok(())
}

/// v1.2: history entries (and checkpoints) without a timestamp get the
/// migration time.
fn backfill_timestamps(object: &mut Map<String, Value>, now: &str) -> Result<(), String> {
    if let Some(history) = object.get_mut("history") {
        backfill_history(history, now)?;
    }
    if let Some(Value::Object(checkpoint)) = object.get_mut("checkpoint") {
        if let Some(history) = checkpoint.get_mut("history") {
            backfill_history(history, now)?;
        }
        if matches!(checkpoint.get("timestamp"), None | Some(Value::Null)) {
            checkpoint.insert("timestamp".into(), Value::String(now.to_string()));
        }
    }
    Ok(())
}

fn backfill_history(history: &mut Value, now: &str) -> Result<(), String> {
    let entries = match history {
        Value::Array(entries) => entries,
        // v2.0 turns a null history into `[]`
        Value::Null => return Ok(()),
        _ => return Err("history is not an array".into()),
    };
    for entry in entries.iter_mut() {
        if let Value::Object(fields) = entry {
            if matches!(fields.get("timestamp"), None | Some(Value::Null)) {
                fields.insert("timestamp".into(), Value::String(now.to_string()));
            }
        }
    }
    Ok(())
}

const SNAKE_TO_CAMEL: [(&str, &str); 6] = [
    ("current_scene", "currentScene"),
    ("game_over", "gameOver"),
    ("session_id", "sessionId"),
    ("last_modified", "lastModified"),
    ("scene_id", "sceneId"),
    ("scene_description", "sceneDescription"),
];

/// v2.0: camelCase keys everywhere; `gameOver` and `history` always present.
fn camel_case_keys(object: &mut Map<String, Value>, _now: &str) -> Result<(), String> {
    rename_keys(object);

    for entry in history_entries_mut(object.get_mut("history")) {
        rename_keys(entry);
    }
    if let Some(Value::Object(checkpoint)) = object.get_mut("checkpoint") {
        for entry in history_entries_mut(checkpoint.get_mut("history")) {
            rename_keys(entry);
        }
    }

    if !object.get("gameOver").is_some_and(Value::is_boolean) {
        object.insert("gameOver".into(), Value::Bool(false));
    }
    if matches!(object.get("history"), None | Some(Value::Null)) {
        object.insert("history".into(), Value::Array(Vec::new()));
    }
    Ok(())
}

fn history_entries_mut(history: Option<&mut Value>) -> impl Iterator<Item = &mut Map<String, Value>> {
    history
        .and_then(Value::as_array_mut)
        .into_iter()
        .flat_map(|entries| entries.iter_mut())
        .filter_map(Value::as_object_mut)
}

/// The camelCase key wins when a record somehow has both.
fn rename_keys(object: &mut Map<String, Value>) {
    for (snake, camel) in SNAKE_TO_CAMEL {
        if let Some(value) = object.remove(snake) {
            object.entry(camel).or_insert(value);
        }
    }
}
