//! Storyloom Engine - terminal front end.
//!
//! `storyloom-engine [session-key]` resumes the session if it was saved
//! before, otherwise starts a new one.

use std::io::Write;

use anyhow::Context;
use storyloom_domain::{GameState, SessionKey};
use storyloom_engine::config::EngineConfig;
use storyloom_engine::use_cases::{EngineEvent, ResumeError, SaveStatus, TurnError};
use storyloom_engine::App;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "Enter a choice number, or: c = checkpoint, r = restore checkpoint, s = save, end = finish the story, q = quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the binary may run from `crates/engine`).
    load_dotenv_from_repo_root();

    // Logs go to stderr so they do not interleave with the story
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyloom_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Storyloom Engine");

    let config = EngineConfig::from_env();
    let app = App::new(config).await.context("opening session store")?;

    let key = std::env::args()
        .nth(1)
        .map(SessionKey::new)
        .unwrap_or_else(|| SessionKey::new("default"));

    spawn_event_printer(&app);

    let mut state = match app.engine.resume(&key, None).await {
        Ok(state) => state,
        Err(ResumeError::NotFound(_)) => {
            tracing::info!(session_key = %key, "No saved session, starting a new one");
            app.engine.start(&key).await.context("generating opening scene")?
        }
        Err(e) => return Err(e).context("resuming session"),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    let mut narrated = false;
    while !state.game_over {
        show(&state, !narrated);
        narrated = false;
        print!("> ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line.context("reading input")?,
        };
        let Some(line) = line else { break };

        match line.trim() {
            "q" | "quit" => break,
            "c" => match app.engine.checkpoint(&key, &state) {
                Ok(next) => {
                    state = next;
                    println!("Checkpoint set.");
                }
                Err(e) => println!("{e}"),
            },
            "r" => match app.engine.restore_checkpoint(&key, &state) {
                Ok(next) => state = next,
                Err(e) => println!("{e}"),
            },
            "s" => match app.engine.save_now(&key, &state).await {
                Ok(record) => println!("Saved at {}.", record.last_modified),
                Err(e) => println!("Save failed: {e}"),
            },
            "end" => {
                state = app.engine.conclude(&key, &state).await.context("saving final state")?;
            }
            input => match input.parse::<u32>() {
                Ok(choice_id) => match app.engine.choose(&key, &state, choice_id).await {
                    Ok(next) => {
                        state = next;
                        narrated = true;
                        if let Err(e) = app.engine.autosave(&key, &state) {
                            println!("Not saved: {e}");
                        }
                    }
                    Err(TurnError::UnknownChoice(_)) => println!("{HELP}"),
                    Err(e) => println!("\nThe story falters ({e}). Try again."),
                },
                Err(_) => println!("{HELP}"),
            },
        }
    }

    if state.game_over {
        println!("The End.");
    } else if let Err(e) = app.engine.save_now(&key, &state).await {
        tracing::error!(session_key = %key, error = %e, "Final save failed");
    }
    app.shutdown();
    Ok(())
}

fn show(state: &GameState, with_description: bool) {
    if with_description {
        println!("\n{}", state.current_scene.description);
    }
    println!();
    for choice in &state.current_scene.choices {
        println!("  {}. {}", choice.id, choice.text);
    }
}

/// Print the scene description as it streams in and surface save failures.
fn spawn_event_printer(app: &App) {
    let mut events = app.engine.subscribe();
    tokio::spawn(async move {
        let mut shown = String::new();
        loop {
            match events.recv().await {
                Ok(EngineEvent::SceneToken { provisional_description, .. }) => {
                    // The parse can change shape mid-stream; only print clean extensions
                    if let Some(rest) = provisional_description.strip_prefix(shown.as_str()) {
                        if shown.is_empty() && !rest.is_empty() {
                            println!();
                        }
                        print!("{rest}");
                        std::io::stdout().flush().ok();
                        shown = provisional_description;
                    }
                }
                Ok(EngineEvent::SceneCommitted { .. } | EngineEvent::ChoiceCommitted(_)) => {
                    if !shown.is_empty() {
                        println!();
                    }
                    shown.clear();
                }
                Ok(EngineEvent::Save(SaveStatus::Failed { error, .. })) => {
                    eprintln!("\n[save failed: {error}]");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
