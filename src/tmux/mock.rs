//! Scripted executor for tests.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{Executor, ExecutorError, SessionInfo};

/// Screens are served in order and the last one repeats. Listing returns
/// `sessions` after `list_delay`.
#[derive(Default)]
pub struct MockExecutor {
    pub host: String,
    pub sessions: Vec<SessionInfo>,
    pub list_delay: Duration,
    pub fail_list: AtomicBool,
    pub list_calls: AtomicUsize,
    pub screens: Mutex<VecDeque<String>>,
    pub sent: Mutex<Vec<String>>,
    pub existing: Mutex<HashSet<String>>,
    pub created: Mutex<Vec<(String, String, Vec<String>)>>,
    pub killed: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn with_screens(screens: &[&str]) -> Self {
        Self {
            screens: Mutex::new(screens.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    /// A host listing `names` (without prefix), all showing `screen`.
    pub fn remote(host: &str, names: &[&str], list_delay: Duration, screen: &str) -> Self {
        Self {
            host: host.to_string(),
            sessions: names
                .iter()
                .map(|n| SessionInfo {
                    name: n.to_string(),
                    full_name: format!("herd-{}", n),
                    attached_clients: 0,
                    created_at: 0,
                })
                .collect(),
            list_delay,
            ..Self::with_screens(&[screen])
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    fn prefix(&self) -> &str {
        "herd-"
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ExecutorError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.list_delay).await;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ExecutorError::Command {
                op: "ssh list-sessions",
                stderr: "Connection timed out".to_string(),
            });
        }
        Ok(self.sessions.clone())
    }

    async fn capture_pane(&self, full_name: &str, _lines: usize) -> Result<String, ExecutorError> {
        let mut screens = self.screens.lock().unwrap();
        match screens.len() {
            0 => Err(ExecutorError::NotFound(full_name.to_string())),
            1 => Ok(screens[0].clone()),
            _ => Ok(screens.pop_front().unwrap_or_default()),
        }
    }

    async fn send_literal(&self, _full_name: &str, text: &str) -> Result<(), ExecutorError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_submit(&self, _full_name: &str) -> Result<(), ExecutorError> {
        self.sent.lock().unwrap().push("<enter>".to_string());
        Ok(())
    }

    async fn create_session(&self, name: &str, work_dir: &str, args: &[String]) -> Result<(), ExecutorError> {
        self.existing.lock().unwrap().insert(self.full_name(name));
        self.created
            .lock()
            .unwrap()
            .push((name.to_string(), work_dir.to_string(), args.to_vec()));
        Ok(())
    }

    async fn kill_session(&self, full_name: &str) -> Result<(), ExecutorError> {
        self.killed.lock().unwrap().push(full_name.to_string());
        Ok(())
    }

    async fn has_session(&self, full_name: &str) -> bool {
        self.existing.lock().unwrap().contains(full_name)
    }

    async fn pane_path(&self, _full_name: &str) -> String {
        String::new()
    }

    fn attach_command(&self, full_name: &str) -> Vec<String> {
        vec!["attach".to_string(), full_name.to_string()]
    }
}
