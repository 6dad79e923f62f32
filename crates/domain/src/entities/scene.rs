//! Scene entity - one narrative beat with a fixed set of choices.
//!
//! A scene produced by the parser while text is still streaming may be
//! incomplete (empty description, no choices). Only a scene that satisfies
//! [`Scene::is_committable`] may replace `GameState::current_scene`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One option offered to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// 1-based position within the scene
    pub id: u32,
    pub text: String,
}

impl Choice {
    pub fn new(id: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    /// Assigned by the narrative loop (`scene-<ordinal>`), never by the parser
    pub id: String,
    pub description: String,
    pub choices: Vec<Choice>,
}

impl Scene {
    pub fn new(id: impl Into<String>, description: impl Into<String>, choices: Vec<Choice>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            choices,
        }
    }

    /// Build a scene from choice texts, numbering them `1..=n` in order.
    pub fn from_texts<I, S>(id: impl Into<String>, description: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let choices = texts
            .into_iter()
            .enumerate()
            .map(|(idx, text)| Choice::new(idx as u32 + 1, text))
            .collect();
        Self::new(id, description, choices)
    }

    /// Canonical id for the scene at a given position in the adventure.
    pub fn ordinal_id(ordinal: usize) -> String {
        format!("scene-{}", ordinal)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn choice(&self, id: u32) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == id)
    }

    /// True when there is nothing here at all (no id, no text, no choices).
    pub fn is_blank(&self) -> bool {
        self.id.trim().is_empty() && self.description.trim().is_empty() && self.choices.is_empty()
    }

    /// Whether this scene satisfies the committed-scene invariant:
    /// non-empty description, at least one choice, and unique ids and texts.
    pub fn is_committable(&self) -> bool {
        if self.description.trim().is_empty() || self.choices.is_empty() {
            return false;
        }
        let mut ids = HashSet::new();
        let mut texts = HashSet::new();
        self.choices.iter().all(|c| {
            !c.text.trim().is_empty() && ids.insert(c.id) && texts.insert(c.text.trim())
        })
    }

    /// Drop repeated or empty choice texts (first occurrence wins) and
    /// renumber the survivors `1..=n`.
    pub fn deduplicated(&self) -> Scene {
        let mut seen = HashSet::new();
        let texts: Vec<String> = self
            .choices
            .iter()
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();
        Scene::from_texts(self.id.clone(), self.description.clone(), texts)
    }
}
