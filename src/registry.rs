use std::collections::{BTreeMap, HashMap};

use crate::session::{sort_sessions, Session};

/// All known sessions, local and remote, in display order.
///
/// Each host's entries are replaced as a whole when that host reports.
/// Every report carries the sequence number it was dispatched with; a
/// report older than the last applied one for its host is dropped.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    by_host: BTreeMap<String, Vec<Session>>,
    applied: HashMap<String, u64>,
    ordered: Vec<Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entries of `host` with a fresh report. Returns false when
    /// the report is stale and was ignored.
    pub fn apply(&mut self, host: &str, seq: u64, sessions: Vec<Session>) -> bool {
        if let Some(&last) = self.applied.get(host) {
            if seq < last {
                return false;
            }
        }
        self.applied.insert(host.to_string(), seq);
        self.replace_host(host, sessions);
        true
    }

    /// Replace the entries of `host` unconditionally.
    pub fn replace_host(&mut self, host: &str, sessions: Vec<Session>) {
        debug_assert!(sessions.iter().all(|s| s.host == host));
        self.by_host.insert(host.to_string(), sessions);
        self.reorder();
    }

    fn reorder(&mut self) {
        self.ordered = self.by_host.values().flatten().cloned().collect();
        sort_sessions(&mut self.ordered);
    }

    /// Sessions in display order
    pub fn sessions(&self) -> &[Session] {
        &self.ordered
    }

    pub fn host_sessions(&self, host: &str) -> &[Session] {
        self.by_host.get(host).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, key: &str) -> Option<&Session> {
        self.ordered.iter().find(|s| s.key() == key)
    }

    /// Drop one session right away, e.g. after it was killed.
    pub fn remove(&mut self, key: &str) {
        for sessions in self.by_host.values_mut() {
            sessions.retain(|s| s.key() != key);
        }
        self.reorder();
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }
}
