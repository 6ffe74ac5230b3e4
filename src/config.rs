use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_ENV: &str = "AGENT_HERDER_CONFIG";
const DEFAULT_PREFIX: &str = "herd-";
/// Shortest accepted local poll interval.
const MIN_LOCAL_INTERVAL_MS: u64 = 100;
/// Shortest accepted remote poll interval.
const MIN_REMOTE_SECS: u64 = 1;

/// Nudge typed into idle sessions. The completion phrase is spelled with an
/// underscore so the nudge on screen never reads as completion.
pub const DEFAULT_NUDGE: &str =
    "Continue working until done. Say \"TASK_DONE!\" (swap _ for space) if you really think you're done.";

/// Top-level configuration, read from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix of managed local session names
    pub prefix: String,
    /// Path to the tmux binary
    pub tmux: String,
    /// Command that starts the agent
    pub agent_command: String,
    /// Arguments passed to every new agent
    pub agent_args: Vec<String>,
    /// Where the agent keeps its transcripts; `~/.claude/projects` if unset
    pub transcript_root: Option<String>,
    /// Remote hosts by nickname
    pub hosts: BTreeMap<String, HostConfig>,
    pub poll: PollConfig,
    pub auto_forward: AutoForwardConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub host: String,
    pub user: String,
    pub ssh_key: Option<String>,
    /// Session prefix on this host; the local prefix if empty
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub local_interval_ms: u64,
    pub remote_base_secs: u64,
    pub remote_max_secs: u64,
    /// Idle time after which the remote interval doubles
    pub remote_idle_step_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoForwardConfig {
    /// How long a session must sit idle before it is nudged
    pub delay_secs: u64,
    /// Nudges in a row before the watchdog gives up on a session
    pub max_forwards: u32,
    pub message: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            tmux: "tmux".to_string(),
            agent_command: "claude".to_string(),
            agent_args: vec!["--dangerously-skip-permissions".to_string()],
            transcript_root: None,
            hosts: BTreeMap::new(),
            poll: PollConfig::default(),
            auto_forward: AutoForwardConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            local_interval_ms: 1500,
            remote_base_secs: 5,
            remote_max_secs: 60,
            remote_idle_step_secs: 30,
        }
    }
}

impl Default for AutoForwardConfig {
    fn default() -> Self {
        Self {
            delay_secs: 10,
            max_forwards: 5,
            message: DEFAULT_NUDGE.to_string(),
        }
    }
}

impl PollConfig {
    pub fn local_interval(&self) -> Duration {
        Duration::from_millis(self.local_interval_ms)
    }

    pub fn remote_base(&self) -> Duration {
        Duration::from_secs(self.remote_base_secs)
    }

    pub fn remote_max(&self) -> Duration {
        Duration::from_secs(self.remote_max_secs)
    }

    pub fn remote_idle_step(&self) -> Duration {
        Duration::from_secs(self.remote_idle_step_secs)
    }
}

impl PollConfig {
    /// Raise intervals that would make a poller spin or panic to their
    /// minimum, and keep the remote cap at or above the base interval.
    pub fn clamp(&mut self) {
        if self.local_interval_ms < MIN_LOCAL_INTERVAL_MS {
            warn!(value = self.local_interval_ms, min = MIN_LOCAL_INTERVAL_MS, "poll.local_interval_ms too small, clamped");
            self.local_interval_ms = MIN_LOCAL_INTERVAL_MS;
        }
        if self.remote_base_secs < MIN_REMOTE_SECS {
            warn!(value = self.remote_base_secs, min = MIN_REMOTE_SECS, "poll.remote_base_secs too small, clamped");
            self.remote_base_secs = MIN_REMOTE_SECS;
        }
        if self.remote_max_secs < self.remote_base_secs {
            warn!(
                value = self.remote_max_secs,
                base = self.remote_base_secs,
                "poll.remote_max_secs below the base interval, raised"
            );
            self.remote_max_secs = self.remote_base_secs;
        }
        self.remote_idle_step_secs = self.remote_idle_step_secs.max(MIN_REMOTE_SECS);
    }
}

impl AutoForwardConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Config {
    /// Fill in defaults that depend on other fields and expand `~`.
    pub fn normalize(&mut self, home: &Path) {
        self.prefix = with_dash(&self.prefix, DEFAULT_PREFIX);
        for host in self.hosts.values_mut() {
            host.prefix = with_dash(&host.prefix, &self.prefix);
            host.ssh_key = host
                .ssh_key
                .take()
                .filter(|k| !k.is_empty())
                .map(|k| expand_home(&k, home));
        }
        self.transcript_root = self.transcript_root.take().map(|r| expand_home(&r, home));
        self.poll.clamp();
    }

    pub fn transcript_root(&self) -> PathBuf {
        match &self.transcript_root {
            Some(root) => PathBuf::from(root),
            None => crate::transcript::default_root(),
        }
    }
}

fn with_dash(prefix: &str, fallback: &str) -> String {
    if prefix.is_empty() {
        fallback.to_string()
    } else if prefix.ends_with('-') {
        prefix.to_string()
    } else {
        format!("{}-", prefix)
    }
}

fn expand_home(path: &str, home: &Path) -> String {
    match path.strip_prefix('~') {
        Some(rest) => home
            .join(rest.trim_start_matches('/'))
            .to_string_lossy()
            .into_owned(),
        None => path.to_string(),
    }
}

/// `$AGENT_HERDER_CONFIG`, or `~/.config/agent-herder/config.yaml`.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_default()
        .join(".config")
        .join("agent-herder")
        .join("config.yaml")
}

/// Load the config; a missing file means defaults.
pub async fn load(path: &Path) -> Result<Config> {
    let mut config = if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;
        info!(path = %path.display(), hosts = config.hosts.len(), "Loaded config");
        config
    } else {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        Config::default()
    };
    config.normalize(&dirs::home_dir().unwrap_or_default());
    Ok(config)
}
