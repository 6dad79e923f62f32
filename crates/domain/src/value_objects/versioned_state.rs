//! VersionedState - the only shape ever written to durable storage.

use serde::{Deserialize, Serialize};

use super::SchemaVersion;
use crate::GameState;

/// A [`GameState`] stamped with its schema version and write time.
///
/// Only created at the persistence boundary; the narrative loop never holds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedState {
    #[serde(flatten)]
    pub state: GameState,
    pub version: SchemaVersion,
    pub last_modified: String,
}

impl VersionedState {
    pub fn new(state: GameState, version: SchemaVersion, last_modified: impl Into<String>) -> Self {
        Self {
            state,
            version,
            last_modified: last_modified.into(),
        }
    }

    pub fn into_state(self) -> GameState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scene;

    #[test]
    fn flattens_state_next_to_version() {
        let record = VersionedState::new(
            GameState::new(Scene::from_texts("scene-1", "Start", ["Go"])),
            SchemaVersion::CURRENT,
            "2024-01-01T00:00:00.000Z",
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["version"], "v2.0");
        assert_eq!(json["lastModified"], "2024-01-01T00:00:00.000Z");
        assert_eq!(json["currentScene"]["id"], "scene-1");

        let back: VersionedState = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
