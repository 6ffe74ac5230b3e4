use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::client::agent_shell_command;
use super::{
    clean_capture, is_missing_target, parse_session_list, Executor, ExecutorError, SessionInfo,
    LIST_FORMAT,
};

/// Executor for tmux on a remote host, reached over ssh.
///
/// Connections are multiplexed through an ssh control socket so that the
/// many short commands of a poll round share one TCP session.
pub struct SshExecutor {
    nickname: String,
    host: String,
    user: String,
    ssh_key: Option<String>,
    prefix: String,
    agent_command: String,
}

impl SshExecutor {
    pub fn new(
        nickname: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        ssh_key: Option<String>,
        prefix: impl Into<String>,
        agent_command: impl Into<String>,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            host: host.into(),
            user: user.into(),
            ssh_key,
            prefix: prefix.into(),
            agent_command: agent_command.into(),
        }
    }

    fn ssh_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-o",
            "ControlMaster=auto",
            "-o",
            "ControlPath=/tmp/agent-herder-ssh-%r@%h:%p",
            "-o",
            "ControlPersist=60",
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-o",
            "BatchMode=yes",
            "-o",
            "ConnectTimeout=5",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        if let Some(key) = &self.ssh_key {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args.push(format!("{}@{}", self.user, self.host));
        args
    }

    /// Run a shell command on the remote host and return its stdout.
    async fn run(&self, op: &'static str, target: Option<&str>, remote_cmd: &str) -> Result<String, ExecutorError> {
        debug!(host = %self.nickname, cmd = %remote_cmd, "ssh");
        let output = Command::new("ssh")
            .args(self.ssh_args())
            .arg(remote_cmd)
            .output()
            .await?;

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

#[async_trait]
impl Executor for SshExecutor {
    fn host(&self) -> &str {
        &self.nickname
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    /// A remote host without a tmux server lists nothing; an unreachable
    /// host is an error so its last known sessions stay on screen.
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ExecutorError> {
        let cmd = format!("tmux list-sessions -F {} 2>/dev/null || true", shell_quote(LIST_FORMAT));
        let stdout = self.run("ssh list-sessions", None, &cmd).await?;
        Ok(parse_session_list(&stdout, &self.prefix))
    }

    async fn capture_pane(&self, full_name: &str, lines: usize) -> Result<String, ExecutorError> {
        let cmd = format!("tmux capture-pane -t {} -p -e -S -{}", shell_quote(full_name), lines);
        let raw = self.run("ssh capture-pane", Some(full_name), &cmd).await?;
        Ok(clean_capture(&raw))
    }

    async fn send_literal(&self, full_name: &str, text: &str) -> Result<(), ExecutorError> {
        let cmd = format!("tmux send-keys -t {} -l {}", shell_quote(full_name), shell_quote(text));
        self.run("ssh send-keys", Some(full_name), &cmd).await?;
        Ok(())
    }

    async fn send_submit(&self, full_name: &str) -> Result<(), ExecutorError> {
        let cmd = format!("tmux send-keys -t {} Enter", shell_quote(full_name));
        self.run("ssh send-keys", Some(full_name), &cmd).await?;
        Ok(())
    }

    async fn create_session(&self, name: &str, work_dir: &str, args: &[String]) -> Result<(), ExecutorError> {
        let full_name = self.full_name(name);
        let mut cmd = format!("tmux new-session -d -s {}", shell_quote(&full_name));
        if !work_dir.is_empty() {
            cmd.push_str(&format!(" -c {}", shell_quote(work_dir)));
        }
        self.run("ssh new-session", None, &cmd).await?;

        // Typing the command avoids a second layer of shell quoting through ssh
        self.send_literal(&full_name, &agent_shell_command(&self.agent_command, args))
            .await?;
        self.send_submit(&full_name).await?;

        if !args.is_empty() {
            let cmd = format!(
                "tmux set-environment -t {} HERDER_FLAGS {}",
                shell_quote(&full_name),
                shell_quote(&args.join(" "))
            );
            let _ = self.run("ssh set-environment", Some(full_name.as_str()), &cmd).await;
        }

        info!(host = %self.nickname, session = %full_name, "Remote session created");
        Ok(())
    }

    async fn kill_session(&self, full_name: &str) -> Result<(), ExecutorError> {
        let interrupt = format!("tmux send-keys -t {} C-c ''", shell_quote(full_name));
        let _ = self.run("ssh send-keys", Some(full_name), &interrupt).await;

        let kill = format!("sleep 0.5 && tmux kill-session -t {}", shell_quote(full_name));
        self.run("ssh kill-session", Some(full_name), &kill).await?;
        info!(host = %self.nickname, session = %full_name, "Remote session killed");
        Ok(())
    }

    async fn has_session(&self, full_name: &str) -> bool {
        let cmd = format!("tmux has-session -t {} 2>/dev/null", shell_quote(full_name));
        self.run("ssh has-session", Some(full_name), &cmd).await.is_ok()
    }

    async fn pane_path(&self, full_name: &str) -> String {
        let cmd = format!(
            "tmux display-message -t {} -p '#{{pane_current_path}}'",
            shell_quote(full_name)
        );
        self.run("ssh display-message", Some(full_name), &cmd)
            .await
            .map(|out| out.trim().to_string())
            .unwrap_or_default()
    }

    fn attach_command(&self, full_name: &str) -> Vec<String> {
        let mut cmd = vec!["ssh".to_string(), "-t".to_string()];
        cmd.extend(self.ssh_args());
        cmd.push(format!("tmux attach-session -t {}", shell_quote(full_name)));
        cmd
    }
}

/// Wrap in single quotes for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}
