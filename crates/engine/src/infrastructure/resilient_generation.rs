//! Resilient generation client wrapper with exponential backoff retry
//!
//! Wraps any GenerationPort implementation with retry logic around opening
//! the token stream. Once a stream is open, its tokens are passed through
//! untouched; a stream that breaks midway is the narrative loop's problem
//! (it keeps the last committed state).

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::ports::{GenerationError, GenerationPort, GenerationRequest, TokenStream};
use crate::infrastructure::retry::RetryConfig;

/// Wrapper that adds retry logic to any generation backend
pub struct ResilientGenerationClient {
    inner: Arc<dyn GenerationPort>,
    config: RetryConfig,
    shutdown: CancellationToken,
}

impl ResilientGenerationClient {
    /// Create a new resilient wrapper around an existing backend
    pub fn new(inner: Arc<dyn GenerationPort>, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort backoff sleeps when `token` is cancelled (session teardown).
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Determine if an error is retryable
    fn is_retryable(error: &GenerationError) -> bool {
        match error {
            // Network/request failures are typically transient
            GenerationError::RequestFailed(msg) => {
                // Don't retry on auth errors or bad requests
                !msg.contains("401")
                    && !msg.contains("403")
                    && !msg.contains("400")
                    && !msg.contains("Invalid")
            }
            // Malformed stream preamble could be a network hiccup
            GenerationError::InvalidResponse(_) => true,
            GenerationError::Incomplete | GenerationError::TimedOut(_) => true,
            GenerationError::Cancelled => false,
        }
    }
}

#[async_trait]
impl GenerationPort for ResilientGenerationClient {
    async fn stream_scene(&self, request: GenerationRequest) -> Result<TokenStream, GenerationError> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if self.shutdown.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }

            match self.inner.stream_scene(request.clone()).await {
                Ok(stream) => {
                    if attempt > 0 {
                        tracing::info!(
                            attempt = attempt + 1,
                            "Generation stream opened after retry"
                        );
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    let is_retryable = Self::is_retryable(&e);

                    if attempt < self.config.max_retries && is_retryable {
                        let delay = self.config.delay_for(attempt + 1);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_retries = self.config.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Generation request failed, retrying..."
                        );
                        tokio::select! {
                            _ = self.shutdown.cancelled() => return Err(GenerationError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    } else if !is_retryable {
                        tracing::error!(
                            error = %e,
                            "Generation request failed with non-retryable error"
                        );
                        return Err(e);
                    }

                    last_error = Some(e);
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| GenerationError::RequestFailed("Unknown error".to_string()));
        tracing::error!(
            attempts = self.config.max_retries + 1,
            error = %error,
            "Generation request failed after all retry attempts"
        );
        Err(error)
    }
}
