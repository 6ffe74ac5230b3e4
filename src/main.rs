use anyhow::{Context, Result};
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind};
use std::collections::HashMap;
use std::io::stdout;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

mod actions;
mod app;
mod config;
mod control;
mod orchestrator;
mod registry;
mod screen;
mod session;
mod store;
mod tmux;
mod transcript;
mod watchdog;

use actions::Action;
use app::App;
use orchestrator::Orchestrator;
use store::{SqliteStore, StateStore};
use tmux::{Executor, LocalExecutor, SshExecutor};

fn init_logging() -> Result<()> {
    let dir = store::state_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join("agent-herder.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    // The terminal belongs to the dashboard, so logs go to a file
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
    Ok(())
}

fn open_store() -> Option<Arc<dyn StateStore>> {
    let path = store::default_path();
    match SqliteStore::open(&path) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "State store unavailable, running without persistence");
            None
        }
    }
}

fn build_executors(config: &config::Config) -> (Arc<dyn Executor>, Vec<Arc<dyn Executor>>) {
    let local: Arc<dyn Executor> = Arc::new(LocalExecutor::new(
        config.tmux.clone(),
        config.prefix.clone(),
        config.agent_command.clone(),
    ));
    let remotes = config
        .hosts
        .iter()
        .map(|(nickname, host)| {
            Arc::new(SshExecutor::new(
                nickname.clone(),
                host.host.clone(),
                host.user.clone(),
                host.ssh_key.clone(),
                host.prefix.clone(),
                config.agent_command.clone(),
            )) as Arc<dyn Executor>
        })
        .collect();
    (local, remotes)
}

/// Push the orchestrator's view into the app.
fn refresh(app: &mut App, orch: &Orchestrator) {
    let sessions = orch.sessions().to_vec();
    let auto_forward: HashMap<String, u32> = sessions
        .iter()
        .map(|s| s.key())
        .filter(|key| orch.is_auto_forward(key))
        .map(|key| {
            let count = orch.auto_forward_count(&key);
            (key, count)
        })
        .collect();
    app.set_sessions(sessions, auto_forward);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config = config::load(&config::config_path()).await?;
    let store = open_store();
    let (local, remotes) = build_executors(&config);
    info!(hosts = remotes.len(), "Starting");

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Initialize terminal
    let mut terminal = ratatui::init();
    crossterm::execute!(stdout(), EnableMouseCapture)?;

    // Spawn input handler; it stands aside while a session is attached
    let input_paused = Arc::new(AtomicBool::new(false));
    let input_tx = tx.clone();
    let paused = input_paused.clone();
    tokio::task::spawn_blocking(move || loop {
        if input_tx.is_closed() {
            break;
        }
        if paused.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
            continue;
        }
        if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
            continue;
        }
        let action = match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => Action::KeyPress(key),
            Ok(Event::Mouse(mouse)) => Action::Mouse(mouse),
            _ => continue,
        };
        if input_tx.send(action).is_err() {
            break;
        }
    });

    let mut orch = Orchestrator::new(&config, local, remotes, store, tx.clone());
    orch.start();

    // Create app state
    let mut app = App::new();

    // Main event loop
    let result = loop {
        // Render
        terminal.draw(|f| app.render(f))?;

        // Process any pending actions from the app
        for pending_action in app.take_pending_actions() {
            match pending_action {
                Action::AttachSession(ref key) => {
                    let Some(session) = orch.session(key).cloned() else {
                        continue;
                    };
                    let Some(executor) = orch.executor_for(&session.host) else {
                        continue;
                    };
                    let cmd = executor.attach_command(&session.full_name);

                    // Suspend TUI and attach to session
                    input_paused.store(true, Ordering::SeqCst);
                    let _ = crossterm::execute!(stdout(), DisableMouseCapture);
                    ratatui::restore();

                    let status = std::process::Command::new(&cmd[0])
                        .args(&cmd[1..])
                        .stdin(Stdio::inherit())
                        .stdout(Stdio::inherit())
                        .stderr(Stdio::inherit())
                        .status();

                    // Resume TUI
                    terminal = ratatui::init();
                    let _ = crossterm::execute!(stdout(), EnableMouseCapture);
                    input_paused.store(false, Ordering::SeqCst);
                    orch.user_activity(Instant::now());

                    if let Err(e) = status {
                        let _ = tx.send(Action::Error(format!("Failed to attach: {}", e)));
                    }
                }
                Action::CreateSession { target, message } => orch.create_session(&target, message),
                Action::KillSession(ref key) => orch.kill_session(key),
                Action::ToggleAutoForward(ref key) => {
                    let enabled = orch.toggle_auto_forward(key);
                    let state = if enabled { "on" } else { "off" };
                    let _ = tx.send(Action::Info(format!("Auto-forward {} for {}", state, key)));
                    refresh(&mut app, &orch);
                }
                Action::SendText { ref key, text } => orch.send_text(key, text),
                Action::LoadPreview(ref key) => orch.load_preview(key),
                Action::LoadTranscriptPreview(ref past) => orch.load_transcript_preview(past),
                Action::ShowResume { killed_only } => orch.list_resumable(killed_only),
                Action::ResumeSession(past) => orch.resume(past),
                _ => {}
            }
        }

        // Handle events from channel
        tokio::select! {
            Some(action) = rx.recv() => {
                let action = match action {
                    Action::LocalTick => {
                        orch.local_tick(Instant::now());
                        continue;
                    }
                    Action::RemoteTick(generation) => {
                        orch.remote_tick(generation);
                        continue;
                    }
                    Action::LocalPolled(poll) => {
                        orch.apply_local(poll);
                        refresh(&mut app, &orch);
                        continue;
                    }
                    Action::RemotePolled(poll) => {
                        orch.apply_remote(poll);
                        refresh(&mut app, &orch);
                        continue;
                    }
                    Action::NudgeSent(ref key) => {
                        orch.nudge_sent(key);
                        refresh(&mut app, &orch);
                        continue;
                    }
                    Action::SessionKilled { key, transcript } => {
                        orch.forget(&key);
                        refresh(&mut app, &orch);
                        Action::SessionKilled { key, transcript }
                    }
                    Action::KeyPress(key) => {
                        orch.user_activity(Instant::now());
                        Action::KeyPress(key)
                    }
                    Action::Mouse(mouse) => {
                        orch.user_activity(Instant::now());
                        Action::Mouse(mouse)
                    }
                    other => other,
                };
                match app.handle_action(action) {
                    Ok(should_quit) => {
                        if should_quit {
                            break Ok(());
                        }
                    }
                    Err(e) => {
                        break Err(e);
                    }
                }
            }
        }
    };

    // Restore terminal
    let _ = crossterm::execute!(stdout(), DisableMouseCapture);
    ratatui::restore();
    info!("Exiting");
    result
}
