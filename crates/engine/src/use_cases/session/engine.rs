//! The session engine drives one adventure: it turns a player's choice into
//! a generated, parsed and validated next scene, and keeps the result saved.
//!
//! Each operation takes the current state and returns a new one; the caller
//! owns the live state. Saves go through the [`SaveQueue`], so a burst of
//! turns costs at most one write in flight per session.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use storyloom_domain::{
    format_timestamp, GameHistoryEntry, GameState, Scene, SessionKey, VersionedState,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::recovery::{recover_state, RecoveryPath};
use crate::infrastructure::ports::{
    ClockPort, GenerationError, GenerationEvent, GenerationPort, GenerationRequest, SessionStore,
    StoreError, StoredState,
};
use crate::use_cases::checkpoint::{CheckpointError, CheckpointManager};
use crate::use_cases::conflict::{resolve, SessionSnapshot};
use crate::use_cases::events::{ChoiceCommitted, EngineEvent};
use crate::use_cases::save_queue::{SaveError, SaveQueue, SaveQueueConfig};
use crate::use_cases::scene_parser::{ParsedScene, SceneStream};
use crate::use_cases::validation::{
    validate, validate_committed_scene, ValidationError, ValidationReport,
};
use crate::use_cases::versioning::{MigrationError, StateVersioner};

/// Stands in for the player's choice when asking for the opening scene.
pub const OPENING_CHOICE: &str = "Begin the adventure";

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub genre: String,
    pub character_summary: String,
    /// How many recent history entries the generator sees
    pub history_window: usize,
    pub generation_timeout: Duration,
    pub temperature: Option<f32>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            genre: "fantasy".to_string(),
            character_summary: "A curious traveler with a worn pack and a good pair of boots."
                .to_string(),
            history_window: 6,
            generation_timeout: Duration::from_secs(120),
            temperature: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("The adventure is over")]
    GameOver,

    #[error("Choice {0} is not offered by the current scene")]
    UnknownChoice(u32),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Rejected(#[from] ValidationError),
}

#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    #[error("No saved session for {0}")]
    NotFound(SessionKey),

    #[error("Could not load session: {0}")]
    Store(#[from] StoreError),

    #[error("Saved session is unreadable: {0}")]
    Unreadable(#[from] MigrationError),

    #[error("Saved session cannot be recovered: {0}")]
    Unrecoverable(ValidationReport),
}

pub struct SessionEngine {
    store: Arc<dyn SessionStore>,
    generator: Arc<dyn GenerationPort>,
    clock: Arc<dyn ClockPort>,
    versioner: StateVersioner,
    checkpoints: CheckpointManager,
    save_queue: Arc<SaveQueue>,
    events: broadcast::Sender<EngineEvent>,
    settings: SessionSettings,
    shutdown: CancellationToken,
}

impl SessionEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        generator: Arc<dyn GenerationPort>,
        clock: Arc<dyn ClockPort>,
        settings: SessionSettings,
        save_config: SaveQueueConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let save_queue = Arc::new(SaveQueue::new(
            store.clone(),
            clock.clone(),
            save_config,
            events.clone(),
            shutdown.clone(),
        ));

        Self {
            store,
            generator,
            versioner: StateVersioner::new(clock.clone()),
            checkpoints: CheckpointManager::new(clock.clone()),
            clock,
            save_queue,
            events,
            settings,
            shutdown,
        }
    }

    /// Scene tokens, commits, choices and save progress for every session.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Starting and resuming
    // =========================================================================

    /// Generate an opening scene and begin a new adventure with it.
    pub async fn start(&self, key: &SessionKey) -> Result<GameState, TurnError> {
        let request = self.request(Scene::default(), Vec::new(), OPENING_CHOICE);
        let parsed = self.generate(key, request).await?;
        let opening = parsed.scene.deduplicated().with_id(Scene::ordinal_id(1));

        let state = self.begin(key, opening.clone())?;
        self.emit(EngineEvent::SceneCommitted {
            session_key: key.clone(),
            scene: opening,
            strategy: parsed.strategy,
        });
        Ok(state)
    }

    /// Begin a new adventure from a known opening scene.
    pub fn begin(&self, key: &SessionKey, opening: Scene) -> Result<GameState, TurnError> {
        validate_committed_scene(&opening)?;
        let state = GameState::new(opening).with_session_id(key.as_str());
        self.save_queue.enqueue(state.clone(), key)?;

        tracing::info!(session_key = %key, scene_id = %state.current_scene.id, "Session started");
        Ok(state)
    }

    /// Load the newest saved state, migrating and repairing it as needed,
    /// and merge it with an unsaved local draft if there is one.
    pub async fn resume(
        &self,
        key: &SessionKey,
        draft: Option<SessionSnapshot>,
    ) -> Result<GameState, ResumeError> {
        let loaded = match self.store.load_latest(key).await? {
            Some(stored) => Some(self.load_snapshot(key, stored)?),
            None => None,
        };

        let state = match (loaded, draft) {
            (Some(loaded), Some(draft)) => {
                tracing::info!(session_key = %key, "Merging saved session with local draft");
                resolve(&loaded, &draft)
            }
            (Some(loaded), None) => loaded.state,
            (None, Some(draft)) => draft.state,
            (None, None) => return Err(ResumeError::NotFound(key.clone())),
        };

        // Whatever the merge produced goes through the same checks as a
        // stored record.
        let document = serde_json::to_value(&state)
            .map_err(|e| MigrationError::Decode(e.to_string()))?;
        let (state, path) = recover_state(&document).map_err(ResumeError::Unrecoverable)?;
        if path != RecoveryPath::Intact {
            tracing::warn!(session_key = %key, recovery = ?path, "Resumed state needed repair");
        }

        tracing::info!(
            session_key = %key,
            scene_id = %state.current_scene.id,
            history = state.history.len(),
            "Session resumed"
        );
        Ok(state)
    }

    fn load_snapshot(
        &self,
        key: &SessionKey,
        stored: StoredState,
    ) -> Result<SessionSnapshot, ResumeError> {
        let migrated = self
            .versioner
            .migrate_document(stored.into_document())
            .map_err(|e| {
                tracing::error!(session_key = %key, error = %e, "Stored session could not be migrated");
                ResumeError::Unreadable(e)
            })?;
        let last_modified = migrated.last_modified();

        let (state, path) = recover_state(&migrated.document).map_err(|report| {
            tracing::error!(session_key = %key, violations = %report, "Stored session is beyond repair");
            ResumeError::Unrecoverable(report)
        })?;
        tracing::debug!(
            session_key = %key,
            migrated_from = %migrated.from,
            recovery = ?path,
            "Loaded stored session"
        );

        Ok(SessionSnapshot::new(state, last_modified))
    }

    // =========================================================================
    // Playing
    // =========================================================================

    /// Play `choice_id` from the current scene.
    ///
    /// On success the returned state has one more history entry and a new
    /// current scene, and a save is queued. On failure nothing changes.
    pub async fn choose(
        &self,
        key: &SessionKey,
        state: &GameState,
        choice_id: u32,
    ) -> Result<GameState, TurnError> {
        if state.game_over {
            return Err(TurnError::GameOver);
        }
        let choice_text = state
            .current_scene
            .choice(choice_id)
            .map(|c| c.text.clone())
            .ok_or(TurnError::UnknownChoice(choice_id))?;

        let result = self.play_choice(key, state, &choice_text).await;
        self.emit(EngineEvent::ChoiceCommitted(ChoiceCommitted {
            session_key: key.clone(),
            choice_text,
            history_len: result.as_ref().map_or(state.history.len(), |s| s.history.len()),
            scene_committed: result.is_ok(),
        }));

        let next = result?;
        self.save_queue.enqueue(next.clone(), key)?;
        Ok(next)
    }

    async fn play_choice(
        &self,
        key: &SessionKey,
        state: &GameState,
        choice_text: &str,
    ) -> Result<GameState, TurnError> {
        let request = self.request(
            state.current_scene.clone(),
            state.recent_history(self.settings.history_window).to_vec(),
            choice_text,
        );
        let parsed = self.generate(key, request).await?;

        let next_scene = parsed.scene.deduplicated().with_id(next_scene_id(state));
        if let Err(e) = validate_committed_scene(&next_scene) {
            tracing::warn!(
                session_key = %key,
                strategy = parsed.strategy.name(),
                error = %e,
                "Generated scene rejected"
            );
            return Err(e.into());
        }

        let entry = GameHistoryEntry::new(state.current_scene.id.clone(), choice_text)
            .with_scene_description(state.current_scene.description.clone())
            .with_timestamp(format_timestamp(self.clock.now()));
        let next = state.advance(entry, next_scene);
        validate(&next).into_result()?;

        tracing::info!(
            session_key = %key,
            scene_id = %next.current_scene.id,
            strategy = parsed.strategy.name(),
            history = next.history.len(),
            "Scene committed"
        );
        self.emit(EngineEvent::SceneCommitted {
            session_key: key.clone(),
            scene: next.current_scene.clone(),
            strategy: parsed.strategy,
        });
        Ok(next)
    }

    fn request(
        &self,
        current_scene: Scene,
        recent_history: Vec<GameHistoryEntry>,
        chosen_option: &str,
    ) -> GenerationRequest {
        let request = GenerationRequest::new(
            self.settings.genre.clone(),
            self.settings.character_summary.clone(),
            current_scene,
            recent_history,
            chosen_option,
        );
        match self.settings.temperature {
            Some(temperature) => request.with_temperature(temperature),
            None => request,
        }
    }

    /// Stream the next scene, bounded by the generation timeout and shutdown.
    async fn generate(
        &self,
        key: &SessionKey,
        request: GenerationRequest,
    ) -> Result<ParsedScene, GenerationError> {
        let timeout = self.settings.generation_timeout;
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::info!(session_key = %key, "Generation cancelled by shutdown");
                Err(GenerationError::Cancelled)
            }
            result = tokio::time::timeout(timeout, self.stream_scene(key, request)) => {
                result.unwrap_or_else(|_| {
                    tracing::warn!(session_key = %key, timeout_ms = timeout.as_millis() as u64, "Generation timed out");
                    Err(GenerationError::TimedOut(timeout))
                })
            }
        }
    }

    async fn stream_scene(
        &self,
        key: &SessionKey,
        request: GenerationRequest,
    ) -> Result<ParsedScene, GenerationError> {
        let mut tokens = self.generator.stream_scene(request).await?;
        let mut stream = SceneStream::new();

        while let Some(event) = tokens.next().await {
            match event? {
                GenerationEvent::Token(text) => {
                    let provisional = stream.push(&text);
                    self.emit(EngineEvent::SceneToken {
                        session_key: key.clone(),
                        text,
                        provisional_description: provisional.scene.description,
                    });
                }
                GenerationEvent::Done => return Ok(stream.finish()),
            }
        }

        tracing::warn!(
            session_key = %key,
            buffered = stream.buffer().len(),
            "Generation stream ended without completion signal"
        );
        Err(GenerationError::Incomplete)
    }

    // =========================================================================
    // Checkpoints
    // =========================================================================

    pub fn checkpoint(&self, key: &SessionKey, state: &GameState) -> Result<GameState, CheckpointError> {
        let next = self.checkpoints.create_checkpoint(state)?;
        self.save_queue.enqueue(next.clone(), key)?;
        Ok(next)
    }

    pub fn restore_checkpoint(
        &self,
        key: &SessionKey,
        state: &GameState,
    ) -> Result<GameState, CheckpointError> {
        let next = self.checkpoints.restore_checkpoint(state)?;
        self.save_queue.enqueue(next.clone(), key)?;
        Ok(next)
    }

    // =========================================================================
    // Saving
    // =========================================================================

    /// Queue a save if the autosave interval has passed. Returns whether one
    /// was queued.
    pub fn autosave(&self, key: &SessionKey, state: &GameState) -> Result<bool, ValidationError> {
        if !self.save_queue.should_auto_save(key) {
            return Ok(false);
        }
        tracing::debug!(session_key = %key, "Autosave due");
        self.save_queue.enqueue(state.clone(), key)?;
        Ok(true)
    }

    /// Write `state` now, superseding anything still queued.
    pub async fn save_now(&self, key: &SessionKey, state: &GameState) -> Result<VersionedState, SaveError> {
        self.save_queue.save_now(state.clone(), key).await
    }

    /// Wait for queued saves of the session to land.
    pub async fn flush(&self, key: &SessionKey) -> Result<Option<VersionedState>, SaveError> {
        self.save_queue.flush(key).await
    }

    pub fn is_saving(&self, key: &SessionKey) -> bool {
        self.save_queue.is_saving(key)
    }

    /// End the adventure and save the final state.
    pub async fn conclude(&self, key: &SessionKey, state: &GameState) -> Result<GameState, SaveError> {
        let finished = state.concluded();
        self.save_queue.save_now(finished.clone(), key).await?;
        tracing::info!(session_key = %key, history = finished.history.len(), "Session concluded");
        Ok(finished)
    }

    /// Abort in-flight generation and save retries.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// `scene-N` ids count up from the current one; otherwise by history length.
fn next_scene_id(state: &GameState) -> String {
    let ordinal = state
        .current_scene
        .id
        .strip_prefix("scene-")
        .and_then(|n| n.parse::<usize>().ok())
        .map_or(state.history.len() + 2, |n| n + 1);
    Scene::ordinal_id(ordinal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::retry::RetryConfig;
    use crate::infrastructure::session_store::InMemorySessionStore;
    use crate::test_fixtures::{fixed_clock, mid_game_state, opening_scene, scene_json, ScriptedGenerator};
    use crate::use_cases::events::SaveStatus;
    use crate::use_cases::scene_parser::{ParseStrategy, FALLBACK_CHOICES};
    use serde_json::json;
    use storyloom_domain::Checkpoint;

    struct Harness {
        engine: SessionEngine,
        store: Arc<InMemorySessionStore>,
        generator: Arc<ScriptedGenerator>,
        events: broadcast::Receiver<EngineEvent>,
        key: SessionKey,
    }

    fn harness(generator: ScriptedGenerator) -> Harness {
        let store = Arc::new(InMemorySessionStore::new());
        let generator = Arc::new(generator);
        let settings = SessionSettings {
            history_window: 1,
            generation_timeout: Duration::from_millis(200),
            ..SessionSettings::default()
        };
        let save_config = SaveQueueConfig {
            retry: RetryConfig {
                max_retries: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
                jitter_factor: 0.0,
            },
            ..SaveQueueConfig::default()
        };
        let engine = SessionEngine::new(
            store.clone(),
            generator.clone(),
            fixed_clock(),
            settings,
            save_config,
            CancellationToken::new(),
        );
        let events = engine.subscribe();
        Harness {
            engine,
            store,
            generator,
            events,
            key: SessionKey::new("session-1"),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn choice_events(events: &[EngineEvent]) -> Vec<&ChoiceCommitted> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::ChoiceCommitted(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_start_generates_and_saves_opening_scene() {
        let mut h = harness(
            ScriptedGenerator::new().then_text(&scene_json("A quiet village square.", &["Talk", "Leave"]), 7),
        );

        let state = h.engine.start(&h.key).await.unwrap();
        assert_eq!(state.current_scene.id, "scene-1");
        assert_eq!(state.current_scene.choices.len(), 2);
        assert!(state.history.is_empty());
        assert_eq!(state.session_id.as_deref(), Some("session-1"));
        assert_eq!(h.generator.requests()[0].chosen_option, OPENING_CHOICE);

        h.engine.flush(&h.key).await.unwrap();
        let records = h.store.records(&h.key).await;
        assert_eq!(records.last().unwrap().declared_version(), Some("v2.0"));

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, EngineEvent::SceneToken { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::SceneCommitted { strategy: ParseStrategy::StructuredJson, .. }
        )));
    }

    #[tokio::test]
    async fn test_choose_commits_scene_and_history() {
        let mut h = harness(
            ScriptedGenerator::new()
                .then_text(&scene_json("Still water laps at the rocks.", &["Wade in", "Rest"]), 5),
        );
        let state = mid_game_state();

        let next = h.engine.choose(&h.key, &state, 2).await.unwrap();
        assert_eq!(next.current_scene.id, "scene-4");
        assert_eq!(next.current_scene.description, "Still water laps at the rocks.");
        assert_eq!(next.history.len(), 3);

        let entry = next.history.last().unwrap();
        assert_eq!(entry.scene_id, "scene-3");
        assert_eq!(entry.choice, "Skirt the shore");
        assert_eq!(entry.scene_description.as_deref(), Some("An underground lake glitters."));
        assert_eq!(entry.timestamp.as_deref(), Some("2024-03-15T12:00:00.000Z"));
        assert_eq!(state.history.len(), 2);

        let request = &h.generator.requests()[0];
        assert_eq!(request.chosen_option, "Skirt the shore");
        assert_eq!(request.recent_history.len(), 1);
        assert_eq!(request.recent_history[0].choice, "Follow it");

        let events = drain(&mut h.events);
        let tokens = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::SceneToken { .. }))
            .count();
        assert!(tokens > 1);
        assert_eq!(
            choice_events(&events),
            vec![&ChoiceCommitted {
                session_key: h.key.clone(),
                choice_text: "Skirt the shore".into(),
                history_len: 3,
                scene_committed: true,
            }]
        );

        h.engine.flush(&h.key).await.unwrap();
        let saved = h.store.records(&h.key).await;
        assert_eq!(saved.last().unwrap().document()["currentScene"]["id"], "scene-4");
    }

    #[tokio::test]
    async fn test_truncated_stream_leaves_state_unchanged() {
        let mut h = harness(
            ScriptedGenerator::new().then_truncated(r#"{"description": "The lake bed drops aw"#),
        );
        let state = mid_game_state();

        let err = h.engine.choose(&h.key, &state, 1).await.unwrap_err();
        assert!(matches!(err, TurnError::Generation(GenerationError::Incomplete)));

        let events = drain(&mut h.events);
        let provisional: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::SceneToken { provisional_description, .. } => Some(provisional_description.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(provisional, vec!["The lake bed drops aw"]);
        assert!(!choice_events(&events)[0].scene_committed);
        assert_eq!(choice_events(&events)[0].history_len, 2);

        assert_eq!(h.engine.flush(&h.key).await, Ok(None));
        assert!(h.store.records(&h.key).await.is_empty());
    }

    #[tokio::test]
    async fn test_uncommittable_scene_is_rejected() {
        let h = harness(ScriptedGenerator::new().then_text("**Choice 1:** Run\n**Choice 2:** Hide", 100));
        let err = h.engine.choose(&h.key, &mid_game_state(), 1).await.unwrap_err();
        assert!(matches!(err, TurnError::Rejected(ValidationError::Uncommittable { .. })));
    }

    #[tokio::test]
    async fn test_choice_guards() {
        let h = harness(ScriptedGenerator::new());
        let state = mid_game_state();

        assert!(matches!(
            h.engine.choose(&h.key, &state, 9).await,
            Err(TurnError::UnknownChoice(9))
        ));
        assert!(matches!(
            h.engine.choose(&h.key, &state.concluded(), 1).await,
            Err(TurnError::GameOver)
        ));
        assert!(h.generator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_generation_timeout() {
        let h = harness(ScriptedGenerator::new().then_hang());
        let err = h.engine.choose(&h.key, &mid_game_state(), 1).await.unwrap_err();
        assert!(matches!(err, TurnError::Generation(GenerationError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_generation() {
        let h = harness(ScriptedGenerator::new().then_hang());
        h.engine.shutdown();
        let err = h.engine.choose(&h.key, &mid_game_state(), 1).await.unwrap_err();
        assert!(matches!(err, TurnError::Generation(GenerationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_resume_migrates_legacy_record() {
        let h = harness(ScriptedGenerator::new());
        h.store
            .insert_raw(
                &h.key,
                json!({
                    "current_scene": {
                        "id": "scene-2",
                        "description": "A bridge over a gorge.",
                        "choices": ["Cross", "Go back"]
                    },
                    "history": [{"scene_id": "scene-1", "choice": "Walk north"}],
                    "game_over": false
                }),
            )
            .await;

        let state = h.engine.resume(&h.key, None).await.unwrap();
        assert_eq!(state.current_scene.id, "scene-2");
        assert_eq!(state.current_scene.choice(2).unwrap().text, "Go back");
        assert_eq!(state.history.len(), 1);
        assert!(state.history[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn test_resume_recovers_from_checkpoint() {
        let h = harness(ScriptedGenerator::new());
        let good = mid_game_state();
        let mut document = serde_json::to_value(
            GameState {
                checkpoint: Some(Checkpoint::new(
                    good.current_scene.clone(),
                    good.history.clone(),
                    "2024-03-15T11:30:00.000Z",
                )),
                ..good.clone()
            },
        )
        .unwrap();
        document["currentScene"] = json!({"id": "", "choices": "broken"});
        document["version"] = json!("v2.0");
        document["lastModified"] = json!("2024-03-15T11:31:00.000Z");
        h.store.insert_raw(&h.key, document).await;

        let state = h.engine.resume(&h.key, None).await.unwrap();
        assert_eq!(state.current_scene, good.current_scene);
        assert_eq!(state.history, good.history);
    }

    #[tokio::test]
    async fn test_resume_reconstructs_from_history() {
        let h = harness(ScriptedGenerator::new());
        h.store
            .insert_raw(
                &h.key,
                json!({
                    "version": "v2.0",
                    "lastModified": "2024-03-15T11:31:00.000Z",
                    "currentScene": null,
                    "history": [
                        {"sceneId": "scene-1", "choice": "Enter", "sceneDescription": "A cave mouth.",
                         "timestamp": "2024-03-15T11:00:00.000Z"}
                    ],
                    "gameOver": false
                }),
            )
            .await;

        let state = h.engine.resume(&h.key, None).await.unwrap();
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.current_scene.id, "scene-2");
        assert_eq!(state.current_scene.choices.len(), FALLBACK_CHOICES.len());
    }

    #[tokio::test]
    async fn test_resume_failures() {
        let h = harness(ScriptedGenerator::new());
        assert!(matches!(
            h.engine.resume(&h.key, None).await,
            Err(ResumeError::NotFound(_))
        ));

        h.store
            .insert_raw(&h.key, json!({"version": "v9.0", "currentScene": {}, "history": []}))
            .await;
        assert!(matches!(
            h.engine.resume(&h.key, None).await,
            Err(ResumeError::Unreadable(MigrationError::UnsupportedVersion { .. }))
        ));
        // The unreadable record is left alone
        assert_eq!(h.store.records(&h.key).await.len(), 1);

        let other = SessionKey::new("other");
        h.store
            .insert_raw(&other, json!({"version": "v2.0", "currentScene": 3, "history": "x"}))
            .await;
        assert!(matches!(
            h.engine.resume(&other, None).await,
            Err(ResumeError::Unrecoverable(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_merges_newer_draft() {
        let h = harness(ScriptedGenerator::new());
        let saved = mid_game_state();
        h.engine.save_now(&h.key, &saved).await.unwrap();

        let draft_state = saved.advance(
            GameHistoryEntry::new("scene-3", "Swim").with_timestamp("2024-03-15T12:30:00.000Z"),
            Scene::from_texts("scene-4", "Deep water.", ["Dive"]),
        );
        let draft = SessionSnapshot::new(draft_state, Some("2024-03-15T12:30:00.000Z".into()));

        let state = h.engine.resume(&h.key, Some(draft)).await.unwrap();
        assert_eq!(state.current_scene.id, "scene-4");
        assert_eq!(state.history.len(), 3);
    }

    #[tokio::test]
    async fn test_resume_without_record_uses_draft() {
        let h = harness(ScriptedGenerator::new());
        let draft = SessionSnapshot::from(GameState::new(opening_scene()));
        let state = h.engine.resume(&h.key, Some(draft)).await.unwrap();
        assert_eq!(state.current_scene, opening_scene());
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip_and_conclude() {
        let h = harness(
            ScriptedGenerator::new().then_text(&scene_json("Further in.", &["Keep going"]), 64),
        );
        let state = mid_game_state();

        let checkpointed = h.engine.checkpoint(&h.key, &state).unwrap();
        let progressed = h.engine.choose(&h.key, &checkpointed, 1).await.unwrap();
        let restored = h.engine.restore_checkpoint(&h.key, &progressed).unwrap();
        assert_eq!(restored.current_scene, state.current_scene);
        assert_eq!(restored.history, state.history);

        let finished = h.engine.conclude(&h.key, &restored).await.unwrap();
        assert!(finished.game_over);
        let latest = h.store.records(&h.key).await.pop().unwrap();
        assert_eq!(latest.document()["gameOver"], true);
        assert!(latest.document()["checkpoint"].is_object());
    }

    #[tokio::test]
    async fn test_autosave_respects_interval() {
        let h = harness(ScriptedGenerator::new());
        let state = mid_game_state();

        assert!(h.engine.autosave(&h.key, &state).unwrap());
        h.engine.flush(&h.key).await.unwrap();
        // Fixed clock: no time passes after the first save
        assert!(!h.engine.autosave(&h.key, &state).unwrap());
    }

    #[tokio::test]
    async fn test_invalid_states_never_reach_the_store() {
        let mut h = harness(ScriptedGenerator::new());
        let broken = GameState::default();
        assert!(!validate(&broken).is_valid());

        assert!(matches!(
            h.engine.save_now(&h.key, &broken).await,
            Err(SaveError::Invalid(_))
        ));
        assert!(matches!(h.engine.autosave(&h.key, &broken), Err(ValidationError::Invalid(_))));
        assert!(matches!(
            h.engine.conclude(&h.key, &broken).await,
            Err(SaveError::Invalid(_))
        ));
        h.engine.flush(&h.key).await.unwrap();
        assert!(h.store.records(&h.key).await.is_empty());
        assert!(drain(&mut h.events).iter().any(|e| matches!(
            e,
            EngineEvent::Save(SaveStatus::Failed { error: SaveError::Invalid(_), .. })
        )));

        // A good save still goes through and the session stays resumable
        let state = mid_game_state();
        h.engine.save_now(&h.key, &state).await.unwrap();
        assert!(h.engine.save_now(&h.key, &broken).await.is_err());
        assert_eq!(h.engine.resume(&h.key, None).await.unwrap(), state);
    }

    #[test]
    fn test_next_scene_id() {
        assert_eq!(next_scene_id(&mid_game_state()), "scene-4");
        let odd = GameState::new(Scene::from_texts("intro", "Hi.", ["Go"]));
        assert_eq!(next_scene_id(&odd), "scene-2");
    }
}
