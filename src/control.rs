//! Session lifecycle: create, message, kill, resume.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::screen::{StateInferenceEngine, Status};
use crate::session::Session;
use crate::store::{PastSession, StateStore};
use crate::tmux::{Executor, ExecutorError};
use crate::transcript::{find_transcript, Transcript};

static RE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

const PROMPT_TIMEOUT: Duration = Duration::from_secs(30);
const PROMPT_POLL: Duration = Duration::from_millis(500);
const VERIFY_ATTEMPTS: usize = 3;
/// Lines captured when checking for the prompt.
const PROMPT_LINES: usize = 10;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid name {0:?}: use only letters, digits, hyphens and underscores")]
    InvalidName(String),

    #[error("session {0} already exists")]
    AlreadyExists(String),

    #[error("unknown host {0:?}")]
    UnknownHost(String),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// How a create request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Session started, nothing to send
    Started,
    /// Session started and the initial message was delivered
    Sent,
    /// The prompt never appeared; the session keeps running without the
    /// message
    PromptTimeout,
}

pub fn validate_name(name: &str) -> Result<(), ControlError> {
    if RE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ControlError::InvalidName(name.to_string()))
    }
}

/// Start a new agent session and optionally hand it a first message once
/// its prompt is up.
pub async fn create_session(
    executor: &dyn Executor,
    name: &str,
    work_dir: &str,
    args: &[String],
    message: Option<&str>,
) -> Result<CreateOutcome, ControlError> {
    validate_name(name)?;
    let full_name = executor.full_name(name);
    if executor.has_session(&full_name).await {
        return Err(ControlError::AlreadyExists(full_name));
    }

    executor.create_session(name, work_dir, args).await?;

    let Some(message) = message.filter(|m| !m.trim().is_empty()) else {
        return Ok(CreateOutcome::Started);
    };
    if !wait_for_prompt(executor, &full_name, PROMPT_TIMEOUT).await {
        warn!(session = %full_name, "Prompt did not appear, message not sent");
        return Ok(CreateOutcome::PromptTimeout);
    }
    send_message(executor, &full_name, message).await?;
    Ok(CreateOutcome::Sent)
}

/// Poll the pane until the agent shows its input prompt.
pub async fn wait_for_prompt(executor: &dyn Executor, full_name: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(PROMPT_POLL).await;
        let Ok(capture) = executor.capture_pane(full_name, PROMPT_LINES).await else {
            continue;
        };
        if StateInferenceEngine::status(&capture) == Status::Waiting {
            return true;
        }
    }
    false
}

/// Type a message and make sure the agent picked it up.
///
/// If the pane still shows an idle prompt shortly after, the submit key
/// was lost and is pressed again, at most three times.
pub async fn send_message(executor: &dyn Executor, full_name: &str, message: &str) -> Result<(), ExecutorError> {
    executor.send_text(full_name, message).await?;

    for _ in 0..VERIFY_ATTEMPTS {
        tokio::time::sleep(PROMPT_POLL).await;
        let Ok(capture) = executor.capture_pane(full_name, PROMPT_LINES).await else {
            continue;
        };
        if StateInferenceEngine::status(&capture) != Status::Waiting {
            return Ok(());
        }
        executor.send_submit(full_name).await?;
    }
    Ok(())
}

/// Kill a session, recording its transcript so it can be resumed.
///
/// `known` is the transcript already claimed for the session; otherwise the
/// correlator runs with `exclude` (transcripts owned by other sessions)
/// before the kill, while the screen still shows the conversation.
pub async fn kill_and_record(
    executor: &dyn Executor,
    store: Option<&dyn StateStore>,
    transcript_root: &Path,
    session: &Session,
    known: Option<Transcript>,
    exclude: &HashSet<String>,
) -> Result<Option<Transcript>, ExecutorError> {
    let transcript = match known {
        Some(t) => Some(t),
        None if session.is_local() => {
            let pane = executor
                .capture_pane(&session.full_name, crate::session::CAPTURE_LINES)
                .await
                .unwrap_or_default();
            find_transcript(transcript_root, &session.work_dir, session.created_at, &pane, exclude)
        }
        None => None,
    };

    executor.kill_session(&session.full_name).await?;

    if let (Some(store), Some(t)) = (store, transcript.as_ref()) {
        if let Err(e) = store.mark_killed(&session.key(), &t.id, &session.work_dir, &t.first_message) {
            warn!(session = %session.key(), error = %e, "Failed to record killed session");
        }
    }
    info!(session = %session.key(), transcript = ?transcript.as_ref().map(|t| &t.id), "Killed");
    Ok(transcript)
}

/// Agent arguments that continue a past conversation.
pub fn resume_args(base: &[String], transcript_id: &str) -> Vec<String> {
    let mut args = base.to_vec();
    args.push("--resume".to_string());
    args.push(transcript_id.to_string());
    args
}

/// Start a new local session that continues `past`. Its name is the past
/// session's name, suffixed when that name is taken.
pub async fn resume(executor: &dyn Executor, past: &PastSession, base_args: &[String]) -> Result<String, ControlError> {
    let full_name = past.key.rsplit(':').next().unwrap_or(&past.key);
    let base = full_name
        .strip_prefix(executor.prefix())
        .unwrap_or(full_name)
        .to_string();
    let mut name = base.clone();
    let mut n = 2;
    while executor.has_session(&executor.full_name(&name)).await {
        name = format!("{}-{}", base, n);
        n += 1;
    }
    validate_name(&name)?;

    let args = resume_args(base_args, &past.transcript_id);
    executor.create_session(&name, &past.work_dir, &args).await?;
    info!(session = %name, transcript = %past.transcript_id, "Resumed");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::mock::MockExecutor;
    use crate::store::SqliteStore;

    const IDLE: &str = "⏺ Done.\n\n❯\n───────";
    const BUSY: &str = "✻ Thinking… (esc to interrupt)\n───────";
    const BOOTING: &str = "Loading";

    #[test]
    fn test_validate_name() {
        assert!(validate_name("api-2_x").is_ok());
        assert!(matches!(validate_name("bad name"), Err(ControlError::InvalidName(_))));
        assert!(validate_name("a:b").is_err());
        assert!(validate_name("").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_prompt_then_sends() {
        let ex = MockExecutor::with_screens(&[BOOTING, BOOTING, IDLE, BUSY]);
        let outcome = create_session(&ex, "api", "/src", &[], Some("fix the build")).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Sent);
        assert_eq!(ex.sent(), vec!["fix the build", "<enter>"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_reports_prompt_timeout() {
        let ex = MockExecutor::with_screens(&[BOOTING]);
        let outcome = create_session(&ex, "api", "/src", &[], Some("hello")).await.unwrap();
        assert_eq!(outcome, CreateOutcome::PromptTimeout);
        assert!(ex.sent().is_empty());
        assert!(ex.has_session("herd-api").await);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let ex = MockExecutor::default();
        ex.existing.lock().unwrap().insert("herd-api".to_string());
        let err = create_session(&ex, "api", "", &[], None).await.unwrap_err();
        assert!(matches!(err, ControlError::AlreadyExists(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_resubmits_when_enter_was_lost() {
        let ex = MockExecutor::with_screens(&[IDLE, IDLE, BUSY]);
        send_message(&ex, "herd-api", "go").await.unwrap();
        assert_eq!(ex.sent(), vec!["go", "<enter>", "<enter>", "<enter>"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_gives_up_after_three_attempts() {
        let ex = MockExecutor::with_screens(&[IDLE]);
        send_message(&ex, "herd-api", "go").await.unwrap();
        assert_eq!(ex.sent().iter().filter(|s| *s == "<enter>").count(), 1 + VERIFY_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_records_known_transcript() {
        let ex = MockExecutor::with_screens(&[IDLE]);
        let store = SqliteStore::open_in_memory().unwrap();
        let session = Session {
            name: "api".into(),
            full_name: "herd-api".into(),
            work_dir: "/src/api".into(),
            ..Default::default()
        };
        let known = Transcript {
            id: "t-1".into(),
            first_message: "fix it".into(),
            started: None,
            modified: std::time::SystemTime::now(),
        };
        let recorded = kill_and_record(&ex, Some(&store), Path::new("/nonexistent"), &session, Some(known), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(recorded.map(|t| t.id).as_deref(), Some("t-1"));
        assert_eq!(*ex.killed.lock().unwrap(), vec!["herd-api"]);

        let killed = store.list_killed(5).unwrap();
        assert_eq!(killed[0].key, "herd-api");
        assert_eq!(killed[0].transcript_id, "t-1");
    }

    #[tokio::test]
    async fn test_resume_picks_free_name() {
        let ex = MockExecutor::default();
        ex.existing.lock().unwrap().insert("herd-api".to_string());
        let past = PastSession {
            key: "herd-api".into(),
            transcript_id: "t-9".into(),
            work_dir: "/src/api".into(),
            first_message: String::new(),
            last_seen: None,
            killed: true,
        };
        let base = vec!["--dangerously-skip-permissions".to_string()];
        let name = resume(&ex, &past, &base).await.unwrap();
        assert_eq!(name, "api-2");

        let created = ex.created.lock().unwrap();
        assert_eq!(created[0].1, "/src/api");
        assert_eq!(created[0].2, vec!["--dangerously-skip-permissions", "--resume", "t-9"]);
    }
}
