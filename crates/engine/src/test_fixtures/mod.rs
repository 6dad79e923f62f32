//! Shared helpers for engine tests: canned states, a fixed clock and a
//! generator that plays back scripted output.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use storyloom_domain::{GameHistoryEntry, GameState, Scene};

use crate::infrastructure::clock::FixedClock;
use crate::infrastructure::ports::{
    GenerationError, GenerationEvent, GenerationPort, GenerationRequest, TokenStream,
};

// =============================================================================
// Time
// =============================================================================

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(fixed_time()))
}

// =============================================================================
// States
// =============================================================================

pub fn opening_scene() -> Scene {
    Scene::from_texts(
        "scene-1",
        "You stand at the mouth of a cave. Cold air drifts out of the dark.",
        ["Enter the cave", "Search the entrance", "Walk away"],
    )
}

/// A session two choices in.
pub fn mid_game_state() -> GameState {
    GameState::new(opening_scene())
        .with_session_id("session-1")
        .advance(
            GameHistoryEntry::new("scene-1", "Enter the cave")
                .with_scene_description("You stand at the mouth of a cave.")
                .with_timestamp("2024-03-15T11:00:00.000Z"),
            Scene::from_texts("scene-2", "A narrow tunnel slopes down.", ["Follow it", "Turn back"]),
        )
        .advance(
            GameHistoryEntry::new("scene-2", "Follow it")
                .with_scene_description("A narrow tunnel slopes down.")
                .with_timestamp("2024-03-15T11:05:00.000Z"),
            Scene::from_texts("scene-3", "An underground lake glitters.", ["Swim", "Skirt the shore"]),
        )
}

/// Generator output for a well-formed scene.
pub fn scene_json(description: &str, choices: &[&str]) -> String {
    serde_json::json!({ "description": description, "choices": choices }).to_string()
}

// =============================================================================
// Scripted generator
// =============================================================================

enum Script {
    Tokens { tokens: Vec<String>, complete: bool },
    Fail(GenerationError),
    Hang,
}

/// Plays back one script per `stream_scene` call, in order. Records every
/// request it receives.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
        self
    }

    /// Emit `text` in chunks of `chunk` characters, then signal completion.
    pub fn then_text(self, text: &str, chunk: usize) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let tokens = chars
            .chunks(chunk.max(1))
            .map(|c| c.iter().collect())
            .collect();
        self.push(Script::Tokens {
            tokens,
            complete: true,
        })
    }

    /// Emit `text` but end the stream without a completion signal.
    pub fn then_truncated(self, text: &str) -> Self {
        self.push(Script::Tokens {
            tokens: vec![text.to_string()],
            complete: false,
        })
    }

    pub fn then_error(self, error: GenerationError) -> Self {
        self.push(Script::Fail(error))
    }

    /// A stream that never yields.
    pub fn then_hang(self) -> Self {
        self.push(Script::Hang)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl GenerationPort for ScriptedGenerator {
    async fn stream_scene(&self, request: GenerationRequest) -> Result<TokenStream, GenerationError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match script {
            Some(Script::Tokens { tokens, complete }) => {
                let mut events: Vec<Result<GenerationEvent, GenerationError>> =
                    tokens.into_iter().map(|t| Ok(GenerationEvent::Token(t))).collect();
                if complete {
                    events.push(Ok(GenerationEvent::Done));
                }
                Ok(stream::iter(events).boxed())
            }
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Hang) => Ok(stream::pending().boxed()),
            None => Err(GenerationError::RequestFailed("no scripted response left".into())),
        }
    }
}
