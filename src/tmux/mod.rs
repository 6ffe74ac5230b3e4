mod ansi;
mod client;
#[cfg(test)]
pub mod mock;
mod ssh;

pub use ansi::clean_capture;
pub use client::LocalExecutor;
pub use ssh::SshExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Format string handed to `tmux list-sessions -F`.
pub const LIST_FORMAT: &str = "#{session_name}|#{session_attached}|#{session_created}";

/// A tmux session as reported by `list-sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session name without the herder prefix
    pub name: String,
    /// Full tmux session name
    pub full_name: String,
    /// Number of attached clients
    pub attached_clients: usize,
    /// Unix timestamp when session was created
    pub created_at: u64,
}

impl SessionInfo {
    pub fn created(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.created_at)
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("session {0} not found")]
    NotFound(String),

    #[error("tmux is not available: {0}")]
    Unavailable(String),

    #[error("{op} failed: {stderr}")]
    Command { op: &'static str, stderr: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Operations on the agent sessions of one transport.
///
/// Implemented once for the local tmux server and once for tmux over ssh.
/// An empty `host()` denotes the local machine.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Host nickname, empty for local
    fn host(&self) -> &str;

    /// Prefix that marks herder-managed sessions
    fn prefix(&self) -> &str;

    /// List herder sessions; no tmux server means no sessions.
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ExecutorError>;

    /// Capture the last `lines` lines of a pane as plain text.
    async fn capture_pane(&self, full_name: &str, lines: usize) -> Result<String, ExecutorError>;

    /// Type `text` into the pane verbatim, without submitting it.
    async fn send_literal(&self, full_name: &str, text: &str) -> Result<(), ExecutorError>;

    /// Press Enter in the pane.
    async fn send_submit(&self, full_name: &str) -> Result<(), ExecutorError>;

    /// Start a detached session running the agent with `args`.
    async fn create_session(
        &self,
        name: &str,
        work_dir: &str,
        args: &[String],
    ) -> Result<(), ExecutorError>;

    /// Interrupt the agent, wait briefly, then kill the session.
    async fn kill_session(&self, full_name: &str) -> Result<(), ExecutorError>;

    async fn has_session(&self, full_name: &str) -> bool;

    /// Current working directory of the session's active pane, empty if unknown.
    async fn pane_path(&self, full_name: &str) -> String;

    /// Command line that attaches the user's terminal to a session.
    fn attach_command(&self, full_name: &str) -> Vec<String>;

    /// Type `text` and submit it as two separate operations, so nothing in
    /// the text is ever read as a key name.
    async fn send_text(&self, full_name: &str, text: &str) -> Result<(), ExecutorError> {
        self.send_literal(full_name, text).await?;
        self.send_submit(full_name).await
    }

    /// Full tmux name for a bare session name.
    fn full_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }
}

/// Split a `host:name` target; a bare name addresses the local machine.
pub fn parse_target(target: &str) -> (&str, &str) {
    match target.split_once(':') {
        Some((host, name)) => (host, name),
        None => ("", target),
    }
}

/// Parse `list-sessions` output, keeping only sessions with `prefix`.
pub fn parse_session_list(output: &str, prefix: &str) -> Vec<SessionInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|');
            let full_name = parts.next()?;
            let attached = parts.next()?;
            let created = parts.next()?;
            let name = full_name.strip_prefix(prefix)?;
            Some(SessionInfo {
                name: name.to_string(),
                full_name: full_name.to_string(),
                attached_clients: attached.trim().parse().unwrap_or(0),
                created_at: created.trim().parse().unwrap_or(0),
            })
        })
        .collect()
}

/// tmux stderr that means "there is nothing to list".
fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("no sessions")
        || stderr.contains("error connecting")
}

/// tmux stderr that means the target session does not exist.
fn is_missing_target(stderr: &str) -> bool {
    stderr.contains("can't find session")
        || stderr.contains("session not found")
        || stderr.contains("can't find pane")
}
