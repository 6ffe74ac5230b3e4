use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    clean_capture, is_missing_target, is_no_server, parse_session_list, Executor, ExecutorError,
    SessionInfo, LIST_FORMAT,
};

/// Grace period between the interrupt and the hard kill.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Executor for the local tmux server, driven through its CLI
pub struct LocalExecutor {
    /// Path to tmux binary
    tmux_path: String,
    /// Prefix of herder-managed session names
    prefix: String,
    /// Shell command that starts the agent
    agent_command: String,
}

impl LocalExecutor {
    pub fn new(tmux_path: impl Into<String>, prefix: impl Into<String>, agent_command: impl Into<String>) -> Self {
        Self {
            tmux_path: tmux_path.into(),
            prefix: prefix.into(),
            agent_command: agent_command.into(),
        }
    }

    /// Run one tmux command and return its stdout.
    async fn run(&self, op: &'static str, target: Option<&str>, args: &[&str]) -> Result<String, ExecutorError> {
        let output = Command::new(&self.tmux_path)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ExecutorError::Unavailable(self.tmux_path.clone()),
                _ => ExecutorError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if let Some(target) = target {
                if is_missing_target(&stderr) {
                    return Err(ExecutorError::NotFound(target.to_string()));
                }
            }
            return Err(ExecutorError::Command { op, stderr });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new("tmux", "herd-", "claude")
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn host(&self) -> &str {
        ""
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ExecutorError> {
        match self.run("tmux list-sessions", None, &["list-sessions", "-F", LIST_FORMAT]).await {
            Ok(stdout) => Ok(parse_session_list(&stdout, &self.prefix)),
            Err(ExecutorError::Unavailable(path)) => {
                debug!(tmux = %path, "tmux binary not found, no local sessions");
                Ok(Vec::new())
            }
            Err(ExecutorError::Command { stderr, .. }) if is_no_server(&stderr) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn capture_pane(&self, full_name: &str, lines: usize) -> Result<String, ExecutorError> {
        // -e keeps styling so ghost suggestions can be told apart and removed
        let start = format!("-{}", lines);
        let raw = self
            .run(
                "tmux capture-pane",
                Some(full_name),
                &["capture-pane", "-t", full_name, "-p", "-e", "-S", start.as_str()],
            )
            .await?;
        Ok(clean_capture(&raw))
    }

    async fn send_literal(&self, full_name: &str, text: &str) -> Result<(), ExecutorError> {
        self.run("tmux send-keys", Some(full_name), &["send-keys", "-t", full_name, "-l", text])
            .await?;
        Ok(())
    }

    async fn send_submit(&self, full_name: &str) -> Result<(), ExecutorError> {
        self.run("tmux send-keys", Some(full_name), &["send-keys", "-t", full_name, "Enter"])
            .await?;
        Ok(())
    }

    async fn create_session(&self, name: &str, work_dir: &str, args: &[String]) -> Result<(), ExecutorError> {
        let full_name = self.full_name(name);
        let command = agent_shell_command(&self.agent_command, args);

        let mut tmux_args = vec!["new-session", "-d", "-s", full_name.as_str()];
        if !work_dir.is_empty() {
            tmux_args.extend(["-c", work_dir]);
        }
        tmux_args.push(command.as_str());

        self.run("tmux new-session", None, &tmux_args).await?;
        info!(session = %full_name, work_dir = %work_dir, "Session created");

        if !args.is_empty() {
            let flags = args.join(" ");
            if let Err(e) = self
                .run(
                    "tmux set-environment",
                    Some(full_name.as_str()),
                    &["set-environment", "-t", full_name.as_str(), "HERDER_FLAGS", flags.as_str()],
                )
                .await
            {
                warn!(session = %full_name, error = %e, "Failed to record agent flags");
            }
        }

        Ok(())
    }

    async fn kill_session(&self, full_name: &str) -> Result<(), ExecutorError> {
        // Interrupt first so the agent can flush its transcript
        let _ = self
            .run("tmux send-keys", Some(full_name), &["send-keys", "-t", full_name, "C-c", ""])
            .await;
        tokio::time::sleep(KILL_GRACE).await;

        self.run("tmux kill-session", Some(full_name), &["kill-session", "-t", full_name])
            .await?;
        info!(session = %full_name, "Session killed");
        Ok(())
    }

    async fn has_session(&self, full_name: &str) -> bool {
        self.run("tmux has-session", Some(full_name), &["has-session", "-t", full_name])
            .await
            .is_ok()
    }

    async fn pane_path(&self, full_name: &str) -> String {
        self.run(
            "tmux display-message",
            Some(full_name),
            &["display-message", "-t", full_name, "-p", "#{pane_current_path}"],
        )
        .await
        .map(|out| out.trim().to_string())
        .unwrap_or_default()
    }

    fn attach_command(&self, full_name: &str) -> Vec<String> {
        vec![
            self.tmux_path.clone(),
            "attach-session".to_string(),
            "-t".to_string(),
            full_name.to_string(),
        ]
    }
}

/// Shell command run inside a new session. The agent refuses to start when
/// it believes it is nested inside itself, so the marker variable is unset.
pub(super) fn agent_shell_command(agent_command: &str, args: &[String]) -> String {
    let mut command = format!("unset CLAUDECODE; {}", agent_command);
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_shell_command() {
        let args = vec!["--resume".to_string(), "abc".to_string()];
        assert_eq!(agent_shell_command("claude", &args), "unset CLAUDECODE; claude --resume abc");
        assert_eq!(agent_shell_command("claude", &[]), "unset CLAUDECODE; claude");
    }

    #[test]
    fn test_attach_command() {
        let client = LocalExecutor::default();
        assert_eq!(client.attach_command("herd-api"), vec!["tmux", "attach-session", "-t", "herd-api"]);
    }

    #[tokio::test]
    async fn test_missing_tmux_means_no_sessions() {
        let client = LocalExecutor::new("/nonexistent/tmux-binary", "herd-", "claude");
        let sessions = client.list_sessions().await.unwrap();
        assert!(sessions.is_empty());
        assert!(!client.has_session("herd-api").await);
        assert_eq!(client.pane_path("herd-api").await, "");
    }
}
