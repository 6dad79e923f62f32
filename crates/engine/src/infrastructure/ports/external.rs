//! External service port traits (text generation).

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use storyloom_domain::{GameHistoryEntry, Scene};

use super::error::GenerationError;

/// Everything the backend gets to write the next scene.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub genre: String,
    pub character_summary: String,
    pub current_scene: Scene,
    /// Most recent entries, oldest first
    pub recent_history: Vec<GameHistoryEntry>,
    pub chosen_option: String,
    /// Temperature for response generation (0.0 - 2.0)
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(
        genre: impl Into<String>,
        character_summary: impl Into<String>,
        current_scene: Scene,
        recent_history: Vec<GameHistoryEntry>,
        chosen_option: impl Into<String>,
    ) -> Self {
        Self {
            genre: genre.into(),
            character_summary: character_summary.into(),
            current_scene,
            recent_history,
            chosen_option: chosen_option.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }
}

/// One item of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// Incremental text
    Token(String),
    /// The backend finished; nothing follows
    Done,
}

pub type TokenStream = BoxStream<'static, Result<GenerationEvent, GenerationError>>;

/// Untrusted text source feeding the scene parser.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Open a stream of text fragments for the next scene.
    async fn stream_scene(&self, request: GenerationRequest) -> Result<TokenStream, GenerationError>;
}
