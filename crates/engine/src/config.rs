//! Runtime configuration from environment variables.
//!
//! Every setting has a default; a value that fails to parse falls back to
//! the default with a warning rather than stopping startup.

use std::str::FromStr;
use std::time::Duration;

use crate::infrastructure::ollama::{DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL};
use crate::infrastructure::retry::RetryConfig;
use crate::infrastructure::session_store::DEFAULT_RETENTION;
use crate::use_cases::save_queue::{SaveQueueConfig, DEFAULT_QUEUE_CAPACITY};
use crate::use_cases::session::SessionSettings;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite file holding session records
    pub database_path: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    /// Records kept per session
    pub retention: u32,
    pub session: SessionSettings,
    pub save_queue: SaveQueueConfig,
    /// Retries around opening a generation stream
    pub generation_retry: RetryConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let session_defaults = SessionSettings::default();
        let save_defaults = SaveQueueConfig::default();

        let session = SessionSettings {
            genre: text("STORY_GENRE", &session_defaults.genre),
            character_summary: text("CHARACTER_SUMMARY", &session_defaults.character_summary),
            history_window: parsed(&lookup, "HISTORY_WINDOW", session_defaults.history_window),
            generation_timeout: Duration::from_secs(parsed(
                &lookup,
                "GENERATION_TIMEOUT_SECS",
                session_defaults.generation_timeout.as_secs(),
            )),
            temperature: lookup("GENERATION_TEMPERATURE").and_then(|v| v.trim().parse().ok()),
        };

        let save_queue = SaveQueueConfig {
            capacity: parsed(&lookup, "SAVE_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY).max(1),
            retry: RetryConfig {
                max_retries: parsed(&lookup, "SAVE_MAX_RETRIES", save_defaults.retry.max_retries),
                base_delay_ms: parsed(&lookup, "SAVE_BASE_DELAY_MS", save_defaults.retry.base_delay_ms),
                max_delay_ms: parsed(&lookup, "SAVE_MAX_DELAY_MS", save_defaults.retry.max_delay_ms),
                jitter_factor: save_defaults.retry.jitter_factor,
            },
            autosave_interval: Duration::from_secs(parsed(
                &lookup,
                "AUTOSAVE_INTERVAL_SECS",
                save_defaults.autosave_interval.as_secs(),
            )),
        };

        Self {
            database_path: text("STORYLOOM_DB", "storyloom.db"),
            ollama_base_url: lookup("OLLAMA_URL")
                .or_else(|| lookup("OLLAMA_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string()),
            ollama_model: text("OLLAMA_MODEL", DEFAULT_OLLAMA_MODEL),
            retention: parsed(&lookup, "SESSION_RETENTION", DEFAULT_RETENTION),
            session,
            save_queue,
            generation_retry: RetryConfig {
                max_retries: parsed(&lookup, "GENERATION_MAX_RETRIES", 3),
                ..RetryConfig::default()
            },
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, default = %default, "Ignoring unparseable setting");
            default
        }
    }
}
