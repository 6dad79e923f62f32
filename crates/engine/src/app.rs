//! Application composition.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::infrastructure::{
    clock::SystemClock,
    ollama::OllamaClient,
    ports::{ClockPort, GenerationPort, SessionStore, StoreError},
    resilient_generation::ResilientGenerationClient,
    session_store::SqliteSessionStore,
};
use crate::use_cases::SessionEngine;

/// Main application state.
///
/// Wires the SQLite store and the Ollama backend into a [`SessionEngine`].
/// One shutdown token reaches every component that sleeps or streams.
pub struct App {
    pub engine: Arc<SessionEngine>,
    pub config: EngineConfig,
}

impl App {
    pub async fn new(config: EngineConfig) -> Result<Self, StoreError> {
        let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());

        tracing::info!(path = %config.database_path, retention = config.retention, "Opening session store");
        let store = SqliteSessionStore::new(&config.database_path, clock.clone())
            .await?
            .with_retention(config.retention);

        tracing::info!(
            url = %config.ollama_base_url,
            model = %config.ollama_model,
            max_retries = config.generation_retry.max_retries,
            "Generation backend configured"
        );
        let shutdown = CancellationToken::new();
        let ollama = Arc::new(OllamaClient::new(&config.ollama_base_url, &config.ollama_model));
        let generator = ResilientGenerationClient::new(ollama, config.generation_retry.clone())
            .with_shutdown(shutdown.clone());

        Ok(Self::compose(
            Arc::new(store),
            Arc::new(generator),
            clock,
            config,
            shutdown,
        ))
    }

    /// Build from already constructed adapters.
    pub fn compose(
        store: Arc<dyn SessionStore>,
        generator: Arc<dyn GenerationPort>,
        clock: Arc<dyn ClockPort>,
        config: EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let engine = Arc::new(SessionEngine::new(
            store,
            generator,
            clock,
            config.session.clone(),
            config.save_queue.clone(),
            shutdown,
        ));
        Self { engine, config }
    }

    pub fn shutdown(&self) {
        tracing::info!("Shutting down session engine");
        self.engine.shutdown();
    }
}
