//! Auto-forward: nudge opted-in sessions that sit idle at their prompt.

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::screen::{StateInferenceEngine, Status};
use crate::session::{Session, CAPTURE_LINES};
use crate::tmux::Executor;

/// A nudge the watchdog wants delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nudge {
    pub key: String,
    pub host: String,
    pub full_name: String,
}

/// Per-session auto-forward bookkeeping.
///
/// The enabled set mirrors the persistent store; idle timers and nudge
/// counters exist only for the lifetime of this process.
#[derive(Debug)]
pub struct AutoForward {
    enabled: HashSet<String>,
    waiting_since: HashMap<String, Instant>,
    counts: HashMap<String, u32>,
    delay: Duration,
    max_forwards: u32,
}

impl AutoForward {
    pub fn new(delay: Duration, max_forwards: u32) -> Self {
        Self {
            enabled: HashSet::new(),
            waiting_since: HashMap::new(),
            counts: HashMap::new(),
            delay,
            max_forwards,
        }
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.enabled.contains(key)
    }

    pub fn count(&self, key: &str) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn set(&mut self, key: &str, enabled: bool) {
        if enabled {
            self.enabled.insert(key.to_string());
        } else {
            self.enabled.remove(key);
            self.forget(key);
        }
    }

    /// Flip the flag for `key` and return the new value.
    pub fn toggle(&mut self, key: &str) -> bool {
        let enabled = !self.is_enabled(key);
        self.set(key, enabled);
        enabled
    }

    /// Adopt the enabled set from the store. Timers and counters of
    /// sessions that stay enabled are kept.
    pub fn sync(&mut self, keys: HashSet<String>) {
        let dropped: Vec<String> = self.enabled.difference(&keys).cloned().collect();
        for key in &dropped {
            self.forget(key);
        }
        self.enabled = keys;
    }

    fn forget(&mut self, key: &str) {
        self.waiting_since.remove(key);
        self.counts.remove(key);
    }

    /// Advance the timers against a fresh view of the sessions and return
    /// the nudges that are due.
    pub fn check(&mut self, sessions: &[Session], now: Instant) -> Vec<Nudge> {
        let mut due = Vec::new();
        let mut present = HashSet::new();

        for session in sessions {
            let key = session.key();
            present.insert(key.clone());
            if !self.enabled.contains(&key) {
                continue;
            }

            match session.status {
                Status::Waiting => {
                    self.waiting_since.entry(key.clone()).or_insert(now);
                }
                Status::Running => {
                    self.waiting_since.remove(&key);
                    self.counts.insert(key.clone(), 0);
                }
                _ => {
                    self.waiting_since.remove(&key);
                }
            }

            let Some(&since) = self.waiting_since.get(&key) else {
                continue;
            };
            if now.duration_since(since) < self.delay {
                continue;
            }
            if self.count(&key) >= self.max_forwards {
                continue;
            }

            // The next nudge waits a full delay again
            self.waiting_since.insert(key.clone(), now);
            due.push(Nudge {
                key,
                host: session.host.clone(),
                full_name: session.full_name.clone(),
            });
        }

        self.waiting_since.retain(|k, _| present.contains(k));
        self.counts.retain(|k, _| present.contains(k));
        due
    }

    /// Count a delivered nudge.
    pub fn record_sent(&mut self, key: &str) {
        *self.counts.entry(key.to_string()).or_insert(0) += 1;
        info!(session = %key, count = self.count(key), "Auto-forwarded");
    }
}

/// Deliver a nudge if the session is still idle at its prompt.
///
/// The pane is captured again first; anything but `Waiting` (including a
/// failed capture) means nothing is sent. Returns whether it was sent.
pub async fn deliver(executor: &dyn Executor, full_name: &str, message: &str) -> bool {
    let capture = match executor.capture_pane(full_name, CAPTURE_LINES).await {
        Ok(capture) => capture,
        Err(e) => {
            debug!(session = %full_name, error = %e, "Skipping nudge, capture failed");
            return false;
        }
    };
    let status = StateInferenceEngine::status(&capture);
    if status != Status::Waiting {
        debug!(session = %full_name, status = %status, "Skipping nudge, no longer waiting");
        return false;
    }
    match executor.send_text(full_name, message).await {
        Ok(()) => true,
        Err(e) => {
            debug!(session = %full_name, error = %e, "Nudge failed");
            false
        }
    }
}
