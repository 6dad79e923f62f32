//! Ollama streaming client (`/api/chat`, newline-delimited JSON)

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::infrastructure::ports::{
    GenerationError, GenerationEvent, GenerationPort, GenerationRequest, TokenStream,
};
use crate::infrastructure::prompt_templates::{scene_system_prompt, scene_user_prompt};

/// Client for Ollama's native chat API with streaming enabled
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

/// Default Ollama base URL.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Default model for Ollama.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        // Connect timeout only - the overall deadline belongs to the caller,
        // which may legitimately stream for a long time.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL)
    }
}

#[async_trait]
impl GenerationPort for OllamaClient {
    async fn stream_scene(&self, request: GenerationRequest) -> Result<TokenStream, GenerationError> {
        let api_request = OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: scene_system_prompt(&request),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: scene_user_prompt(&request),
                },
            ],
            stream: true,
            options: request.temperature.map(|temperature| OllamaOptions { temperature }),
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&api_request)
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;
            return Err(GenerationError::RequestFailed(format!("{} {}", status.as_u16(), error_text)));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| GenerationError::RequestFailed(e.to_string()))
            })
            .boxed();

        Ok(ndjson_events(bytes))
    }
}

/// Turn a raw byte stream of NDJSON chat chunks into generation events.
///
/// The stream stops after `Done` or the first error. If the bytes run out
/// without a `done: true` chunk, the stream simply ends; the consumer treats
/// that as an incomplete generation.
fn ndjson_events(bytes: BoxStream<'static, Result<Vec<u8>, GenerationError>>) -> TokenStream {
    let state = NdjsonState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        exhausted: false,
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            if let Some(item) = state.pending.pop_front() {
                if matches!(item, Ok(GenerationEvent::Done) | Err(_)) {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.exhausted {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_complete_lines();
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(e));
                }
                None => {
                    state.exhausted = true;
                    let rest = std::mem::take(&mut state.buffer);
                    state.decode_line(&rest);
                }
            }
        }
    })
    .boxed()
}

struct NdjsonState {
    bytes: BoxStream<'static, Result<Vec<u8>, GenerationError>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<GenerationEvent, GenerationError>>,
    exhausted: bool,
    finished: bool,
}

impl NdjsonState {
    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line);
        }
    }

    fn decode_line(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        match serde_json::from_str::<OllamaChatChunk>(text) {
            Ok(chunk) => {
                if let Some(error) = chunk.error {
                    self.pending.push_back(Err(GenerationError::InvalidResponse(error)));
                    return;
                }
                if let Some(message) = chunk.message {
                    if !message.content.is_empty() {
                        self.pending.push_back(Ok(GenerationEvent::Token(message.content)));
                    }
                }
                if chunk.done {
                    self.pending.push_back(Ok(GenerationEvent::Done));
                }
            }
            Err(e) => {
                tracing::warn!(line = text, error = %e, "Skipping undecodable stream line");
            }
        }
    }
}

// =============================================================================
// Ollama API types
// =============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}
