//! Poll scheduling and the effects that run beside it.
//!
//! The orchestrator lives on the event loop and is the only owner of the
//! registry and the watchdog. Every tmux, ssh, filesystem or store call runs
//! in a spawned unit that reports back with exactly one `Action`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::actions::{Action, LocalPoll, RemotePoll};
use crate::config::{Config, PollConfig};
use crate::control::{self, ControlError, CreateOutcome};
use crate::registry::SessionRegistry;
use crate::screen::strip_frame;
use crate::session::{self, Session, Snapshot};
use crate::store::{PastSession, StateStore};
use crate::tmux::{parse_target, Executor};
use crate::transcript::{self, resolve_claims, ClaimRequest, Transcript};
use crate::watchdog::{self, AutoForward};

/// Past sessions offered for resuming.
const RESUME_LIMIT: usize = 50;
/// Lines shown in the preview of a live session.
const PREVIEW_LINES: usize = 60;
/// Messages shown in the preview of a past session.
const PREVIEW_MESSAGES: usize = 30;

/// Remote poll interval after `idle` without user input: the base interval,
/// doubled for every full idle step, capped.
pub fn remote_interval(idle: Duration, poll: &PollConfig) -> Duration {
    let step = poll.remote_idle_step().as_secs().max(1);
    let doublings = (idle.as_secs() / step).min(16) as u32;
    (poll.remote_base() * 2u32.pow(doublings)).min(poll.remote_max())
}

pub struct Orchestrator {
    registry: SessionRegistry,
    watchdog: AutoForward,
    local: Arc<dyn Executor>,
    remotes: BTreeMap<String, Arc<dyn Executor>>,
    store: Option<Arc<dyn StateStore>>,
    transcript_root: PathBuf,
    poll: PollConfig,
    agent_args: Vec<String>,
    nudge_message: String,
    /// Transcripts claimed by live local sessions, by session key
    claims: HashMap<String, Transcript>,
    local_seq: u64,
    local_in_flight: bool,
    remote_seq: HashMap<String, u64>,
    remote_in_flight: HashSet<String>,
    /// Bumped whenever a remote round is forced, so the timer chain it
    /// replaces dies out
    remote_generation: u64,
    remote_interval: Duration,
    last_interaction: Instant,
    /// Auto-forward flags changed here and not yet written to the store
    pending_flags: Vec<(String, bool)>,
    /// The store's flags may be adopted from polls with a higher sequence
    flags_written_seq: u64,
    tx: UnboundedSender<Action>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        local: Arc<dyn Executor>,
        remotes: Vec<Arc<dyn Executor>>,
        store: Option<Arc<dyn StateStore>>,
        tx: UnboundedSender<Action>,
    ) -> Self {
        let mut poll = config.poll.clone();
        poll.clamp();
        Self {
            registry: SessionRegistry::new(),
            watchdog: AutoForward::new(config.auto_forward.delay(), config.auto_forward.max_forwards),
            local,
            remotes: remotes.into_iter().map(|ex| (ex.host().to_string(), ex)).collect(),
            store,
            transcript_root: config.transcript_root(),
            remote_interval: poll.remote_base(),
            poll,
            agent_args: config.agent_args.clone(),
            nudge_message: config.auto_forward.message.clone(),
            claims: HashMap::new(),
            local_seq: 0,
            local_in_flight: false,
            remote_seq: HashMap::new(),
            remote_in_flight: HashSet::new(),
            remote_generation: 0,
            last_interaction: Instant::now(),
            pending_flags: Vec::new(),
            flags_written_seq: 0,
            tx,
        }
    }

    /// Start the local ticker and the first remote round.
    pub fn start(&mut self) {
        let tx = self.tx.clone();
        let period = self.poll.local_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(Action::LocalTick).is_err() {
                    break;
                }
            }
        });
        self.remote_round();
    }

    pub fn sessions(&self) -> &[Session] {
        self.registry.sessions()
    }

    pub fn session(&self, key: &str) -> Option<&Session> {
        self.registry.get(key)
    }

    pub fn executor_for(&self, host: &str) -> Option<Arc<dyn Executor>> {
        if host.is_empty() {
            Some(self.local.clone())
        } else {
            self.remotes.get(host).cloned()
        }
    }

    pub fn is_auto_forward(&self, key: &str) -> bool {
        self.watchdog.is_enabled(key)
    }

    pub fn auto_forward_count(&self, key: &str) -> u32 {
        self.watchdog.count(key)
    }

    // ---- local polling ----

    /// Run the watchdog against the current view and start a local poll
    /// unless one is still running.
    pub fn local_tick(&mut self, now: Instant) {
        let nudges = self.watchdog.check(self.registry.sessions(), now);
        for nudge in nudges {
            let Some(executor) = self.executor_for(&nudge.host) else {
                continue;
            };
            let message = self.nudge_message.clone();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                if watchdog::deliver(executor.as_ref(), &nudge.full_name, &message).await {
                    let _ = tx.send(Action::NudgeSent(nudge.key));
                }
            });
        }

        if self.local_in_flight {
            debug!("Local poll still running, skipping tick");
            return;
        }
        self.dispatch_local_poll();
    }

    fn dispatch_local_poll(&mut self) {
        self.local_seq += 1;
        self.local_in_flight = true;

        let seq = self.local_seq;
        let flags = std::mem::take(&mut self.pending_flags);
        if !flags.is_empty() {
            self.flags_written_seq = seq;
        }
        let unit = LocalPollUnit {
            executor: self.local.clone(),
            store: self.store.clone(),
            root: self.transcript_root.clone(),
            known: self
                .claims
                .iter()
                .map(|(key, t)| (key.clone(), t.id.clone()))
                .collect(),
            flags,
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let poll = unit.run(seq).await;
            let _ = tx.send(Action::LocalPolled(poll));
        });
    }

    pub fn apply_local(&mut self, poll: LocalPoll) {
        if poll.seq == self.local_seq {
            self.local_in_flight = false;
        }

        if let Some(keys) = poll.auto_forward {
            if self.pending_flags.is_empty() && poll.seq >= self.flags_written_seq {
                self.watchdog.sync(keys);
            }
        }

        let sessions = match poll.sessions {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Local poll failed");
                return;
            }
        };
        if !self.registry.apply("", poll.seq, sessions) {
            debug!(seq = poll.seq, "Dropped stale local poll");
            return;
        }

        for (key, transcript) in poll.claims {
            info!(session = %key, transcript = %transcript.id, "Matched transcript");
            self.claims.insert(key, transcript);
        }
        let live: HashSet<String> = self.registry.host_sessions("").iter().map(Session::key).collect();
        self.claims.retain(|key, _| live.contains(key));
    }

    // ---- remote polling ----

    pub fn remote_tick(&mut self, generation: u64) {
        if generation != self.remote_generation {
            return;
        }
        self.remote_round();
    }

    /// Fetch every remote host that is not still busy with its previous
    /// fetch, then schedule the next round.
    pub fn remote_round(&mut self) {
        if self.remotes.is_empty() {
            return;
        }

        for (host, executor) in &self.remotes {
            if self.remote_in_flight.contains(host) {
                debug!(host = %host, "Remote fetch still in flight, skipping");
                continue;
            }
            let seq = self.remote_seq.entry(host.clone()).or_insert(0);
            *seq += 1;
            let seq = *seq;
            self.remote_in_flight.insert(host.clone());

            let executor = executor.clone();
            let host = host.clone();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let sessions = session::collect(executor.as_ref())
                    .await
                    .map(|snaps| snaps.into_iter().map(|s| s.session).collect())
                    .map_err(|e| e.to_string());
                let _ = tx.send(Action::RemotePolled(RemotePoll { host, seq, sessions }));
            });
        }

        let interval = remote_interval(self.last_interaction.elapsed(), &self.poll);
        self.remote_interval = interval;
        let generation = self.remote_generation;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = tx.send(Action::RemoteTick(generation));
        });
    }

    pub fn apply_remote(&mut self, poll: RemotePoll) {
        if self.remote_seq.get(&poll.host) == Some(&poll.seq) {
            self.remote_in_flight.remove(&poll.host);
        }
        match poll.sessions {
            Ok(sessions) => {
                if self.registry.apply(&poll.host, poll.seq, sessions) {
                    debug!(host = %poll.host, total = self.registry.len(), "Applied remote poll");
                } else {
                    debug!(host = %poll.host, seq = poll.seq, "Dropped stale remote poll");
                }
            }
            Err(e) => warn!(host = %poll.host, error = %e, "Remote poll failed, keeping last known sessions"),
        }
    }

    /// Any key or mouse input. Resets the idle clock; if the remote interval
    /// had backed off, poll remote hosts right away.
    pub fn user_activity(&mut self, now: Instant) {
        let backed_off = self.remote_interval > self.poll.remote_base();
        self.last_interaction = now;
        if backed_off && !self.remotes.is_empty() {
            debug!("User returned, forcing remote round");
            self.remote_generation += 1;
            self.remote_round();
        }
    }

    // ---- watchdog ----

    pub fn nudge_sent(&mut self, key: &str) {
        self.watchdog.record_sent(key);
    }

    /// Flip auto-forward for a session. The change reaches the store with
    /// the next local poll.
    pub fn toggle_auto_forward(&mut self, key: &str) -> bool {
        let enabled = self.watchdog.toggle(key);
        self.pending_flags.retain(|(k, _)| k != key);
        self.pending_flags.push((key.to_string(), enabled));
        enabled
    }

    // ---- session control ----

    pub fn create_session(&self, target: &str, message: Option<String>) {
        let (host, name) = parse_target(target);
        let Some(executor) = self.executor_for(host) else {
            let _ = self.tx.send(Action::Error(ControlError::UnknownHost(host.to_string()).to_string()));
            return;
        };
        let work_dir = if host.is_empty() {
            std::env::current_dir()
                .map(|d| d.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            String::new()
        };
        let args = self.agent_args.clone();
        let target = target.to_string();
        let name = name.to_string();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let action = match control::create_session(executor.as_ref(), &name, &work_dir, &args, message.as_deref()).await {
                Ok(CreateOutcome::PromptTimeout) => {
                    Action::Error(format!("Created {} but its prompt never appeared; message not sent", target))
                }
                Ok(CreateOutcome::Sent) => Action::Info(format!("Created {} and sent message", target)),
                Ok(CreateOutcome::Started) => Action::Info(format!("Created {}", target)),
                Err(e) => Action::Error(format!("Failed to create {}: {}", target, e)),
            };
            let _ = tx.send(action);
        });
    }

    pub fn kill_session(&self, key: &str) {
        let Some(session) = self.registry.get(key).cloned() else {
            return;
        };
        let Some(executor) = self.executor_for(&session.host) else {
            return;
        };
        let known = self.claims.get(key).cloned();
        let exclude: HashSet<String> = self
            .claims
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(_, t)| t.id.clone())
            .collect();
        let store = self.store.clone();
        let root = self.transcript_root.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result =
                control::kill_and_record(executor.as_ref(), store.as_deref(), &root, &session, known, &exclude).await;
            let action = match result {
                Ok(transcript) => Action::SessionKilled {
                    key: session.key(),
                    transcript: transcript.map(|t| t.id),
                },
                Err(e) => Action::Error(format!("Failed to kill {}: {}", session.display_name(), e)),
            };
            let _ = tx.send(action);
        });
    }

    /// Drop a killed session without waiting for the next poll.
    pub fn forget(&mut self, key: &str) {
        self.registry.remove(key);
        self.claims.remove(key);
    }

    pub fn send_text(&self, key: &str, text: String) {
        let Some(session) = self.registry.get(key) else {
            return;
        };
        let Some(executor) = self.executor_for(&session.host) else {
            return;
        };
        let full_name = session.full_name.clone();
        let name = session.display_name();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let action = match control::send_message(executor.as_ref(), &full_name, &text).await {
                Ok(()) => Action::Info(format!("Sent to {}", name)),
                Err(e) => Action::Error(format!("Failed to send to {}: {}", name, e)),
            };
            let _ = tx.send(action);
        });
    }

    /// Capture a live session's screen for the preview pane.
    pub fn load_preview(&self, key: &str) {
        let Some(session) = self.registry.get(key) else {
            return;
        };
        let Some(executor) = self.executor_for(&session.host) else {
            return;
        };
        let full_name = session.full_name.clone();
        let key = key.to_string();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Ok(raw) = executor.capture_pane(&full_name, PREVIEW_LINES).await {
                let _ = tx.send(Action::PreviewLoaded { key, text: strip_frame(&raw) });
            }
        });
    }

    /// Render a past session's transcript for the preview pane, keyed by
    /// transcript id.
    pub fn load_transcript_preview(&self, past: &PastSession) {
        let root = self.transcript_root.clone();
        let past = past.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let key = past.transcript_id.clone();
            let text = tokio::task::spawn_blocking(move || {
                transcript::read_preview(&root, &past.work_dir, &past.transcript_id, PREVIEW_MESSAGES)
            })
            .await
            .unwrap_or_default();
            let _ = tx.send(Action::PreviewLoaded { key, text });
        });
    }

    /// List past sessions that are not currently running: every session with
    /// a known transcript, or only the explicitly killed ones.
    pub fn list_resumable(&self, killed_only: bool) {
        let Some(store) = self.store.clone() else {
            let _ = self.tx.send(Action::Error("No state store, nothing to resume".to_string()));
            return;
        };
        let live: HashSet<String> = self.registry.sessions().iter().map(Session::key).collect();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let listed = tokio::task::spawn_blocking(move || {
                if killed_only {
                    store.list_killed(RESUME_LIMIT)
                } else {
                    store.list_resumable(RESUME_LIMIT)
                }
            })
            .await;
            let action = match listed {
                Ok(Ok(past)) => Action::ResumeListed(past.into_iter().filter(|p| !live.contains(&p.key)).collect()),
                Ok(Err(e)) => Action::Error(format!("Failed to list sessions: {}", e)),
                Err(e) => Action::Error(format!("Failed to list sessions: {}", e)),
            };
            let _ = tx.send(action);
        });
    }

    pub fn resume(&self, past: PastSession) {
        let (host, _) = parse_target(&past.key);
        let executor = self.executor_for(host).unwrap_or_else(|| self.local.clone());
        let args = self.agent_args.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let action = match control::resume(executor.as_ref(), &past, &args).await {
                Ok(name) => Action::Info(format!("Resumed as {}", name)),
                Err(e) => Action::Error(format!("Failed to resume: {}", e)),
            };
            let _ = tx.send(action);
        });
    }
}

/// Everything a local poll needs, moved into its task
struct LocalPollUnit {
    executor: Arc<dyn Executor>,
    store: Option<Arc<dyn StateStore>>,
    root: PathBuf,
    /// Known transcript ids by session key
    known: HashMap<String, String>,
    /// Auto-forward flags to persist before reading them back
    flags: Vec<(String, bool)>,
}

impl LocalPollUnit {
    async fn run(self, seq: u64) -> LocalPoll {
        let snapshots = match session::collect(self.executor.as_ref()).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                return LocalPoll {
                    seq,
                    sessions: Err(e.to_string()),
                    claims: Vec::new(),
                    auto_forward: None,
                }
            }
        };
        match tokio::task::spawn_blocking(move || self.correlate(snapshots)).await {
            Ok((sessions, claims, auto_forward)) => LocalPoll {
                seq,
                sessions: Ok(sessions),
                claims,
                auto_forward,
            },
            Err(e) => LocalPoll {
                seq,
                sessions: Err(e.to_string()),
                claims: Vec::new(),
                auto_forward: None,
            },
        }
    }

    /// Store and filesystem half of a local poll.
    #[allow(clippy::type_complexity)]
    fn correlate(
        self,
        snapshots: Vec<Snapshot>,
    ) -> (Vec<Session>, Vec<(String, Transcript)>, Option<HashSet<String>>) {
        let auto_forward = self.store.as_deref().and_then(|store| {
            for (key, enabled) in &self.flags {
                if let Err(e) = store.set_auto_forward(key, *enabled) {
                    warn!(session = %key, error = %e, "Failed to save auto-forward flag");
                }
            }
            store
                .auto_forward_keys()
                .map_err(|e| warn!(error = %e, "Failed to load auto-forward flags"))
                .ok()
        });

        let claimed: HashSet<String> = self.known.values().cloned().collect();
        let requests: Vec<ClaimRequest> = snapshots
            .iter()
            .filter(|snap| !self.known.contains_key(&snap.session.key()))
            .map(|snap| ClaimRequest {
                key: snap.session.key(),
                work_dir: snap.session.work_dir.clone(),
                started: snap.session.created_at,
                pane: snap.capture.clone(),
                require_activity: true,
            })
            .collect();
        let claims = if requests.is_empty() {
            Vec::new()
        } else {
            resolve_claims(&self.root, requests, &claimed)
        };

        let mut sessions = Vec::with_capacity(snapshots.len());
        for snap in snapshots {
            let mut session = snap.session;
            let key = session.key();
            let claim = claims.iter().find(|(k, _)| *k == key).map(|(_, t)| t);
            if let (Some(store), Some(t)) = (self.store.as_deref(), claim) {
                if let Err(e) = store.save_transcript(&key, &t.id, &session.work_dir, &t.first_message) {
                    warn!(session = %key, error = %e, "Failed to save transcript");
                }
            }
            let id = self.known.get(&key).map(String::as_str).or(claim.map(|t| t.id.as_str()));
            session::stamp_last_active(&mut session, &self.root, id);
            sessions.push(session);
        }
        (sessions, claims, auto_forward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_NUDGE;
    use crate::store::SqliteStore;
    use crate::tmux::mock::MockExecutor;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    const IDLE: &str = "⏺ Done.\n\n❯\n───────";
    const BUSY: &str = "✻ Thinking… (esc to interrupt)\n───────";

    fn config() -> Config {
        Config {
            transcript_root: Some("/nonexistent/agent-herder-transcripts".to_string()),
            ..Default::default()
        }
    }

    fn orchestrator(
        local: Arc<MockExecutor>,
        remotes: Vec<Arc<MockExecutor>>,
        store: Option<Arc<dyn StateStore>>,
    ) -> (Orchestrator, UnboundedReceiver<Action>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let remotes = remotes.into_iter().map(|r| r as Arc<dyn Executor>).collect();
        (Orchestrator::new(&config(), local, remotes, store, tx), rx)
    }

    /// Feed actions back into the orchestrator until `deadline`.
    async fn pump(
        orch: &mut Orchestrator,
        rx: &mut UnboundedReceiver<Action>,
        deadline: Instant,
        mut on_remote: impl FnMut(&Orchestrator, &str),
    ) {
        while let Ok(Some(action)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            match action {
                Action::LocalTick => orch.local_tick(Instant::now()),
                Action::LocalPolled(poll) => orch.apply_local(poll),
                Action::RemoteTick(generation) => orch.remote_tick(generation),
                Action::RemotePolled(poll) => {
                    let host = poll.host.clone();
                    orch.apply_remote(poll);
                    on_remote(orch, &host);
                }
                Action::NudgeSent(key) => orch.nudge_sent(&key),
                _ => {}
            }
        }
    }

    fn keys(orch: &Orchestrator) -> Vec<String> {
        orch.sessions().iter().map(Session::key).collect()
    }

    #[test]
    fn test_remote_interval_backoff() {
        let poll = PollConfig::default();
        let cases = [(0, 5), (29, 5), (30, 10), (61, 20), (90, 40), (120, 60), (3600, 60)];
        for (idle, expected) in cases {
            assert_eq!(
                remote_interval(Duration::from_secs(idle), &poll),
                Duration::from_secs(expected),
                "idle {}s",
                idle
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_host_does_not_block_fast_host() {
        let local = Arc::new(MockExecutor::default());
        let slow = Arc::new(MockExecutor::remote("a", &["x"], Duration::from_secs(12), IDLE));
        let fast = Arc::new(MockExecutor::remote("b", &["y"], Duration::from_millis(100), BUSY));
        let (mut orch, mut rx) = orchestrator(local, vec![slow.clone(), fast.clone()], None);

        let start = Instant::now();
        orch.remote_round();

        let mut first_fast_view = None;
        pump(&mut orch, &mut rx, start + Duration::from_secs(21), |orch, host| {
            if host == "b" && first_fast_view.is_none() {
                first_fast_view = Some(keys(orch));
            }
        })
        .await;

        // b's sessions were shown while a was still being fetched
        assert_eq!(first_fast_view, Some(vec!["b:herd-y".to_string()]));

        // rounds at 0, 5, 10, 15 and 20 s; a is in flight from 0 to 12 s
        // and again from 15 s
        assert_eq!(fast.list_calls(), 5);
        assert_eq!(slow.list_calls(), 2);

        // running before waiting
        assert_eq!(keys(&orch), vec!["b:herd-y", "a:herd-x"]);
        assert_eq!(orch.session("a:herd-x").unwrap().status, crate::screen::Status::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_keeps_stale_entries() {
        let host = Arc::new(MockExecutor::remote("a", &["x"], Duration::ZERO, IDLE));
        let (mut orch, mut rx) = orchestrator(Arc::new(MockExecutor::default()), vec![host.clone()], None);

        orch.remote_round();
        pump(&mut orch, &mut rx, Instant::now() + Duration::from_secs(1), |_, _| {}).await;
        assert_eq!(keys(&orch), vec!["a:herd-x"]);

        host.fail_list.store(true, std::sync::atomic::Ordering::SeqCst);
        pump(&mut orch, &mut rx, Instant::now() + Duration::from_secs(11), |_, _| {}).await;
        assert_eq!(keys(&orch), vec!["a:herd-x"]);
        // the guard cleared after each failure, so every round fetched again
        assert_eq!(host.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_remote_result_dropped() {
        let (mut orch, _rx) = orchestrator(Arc::new(MockExecutor::default()), vec![], None);
        let session = |name: &str| Session {
            name: name.to_string(),
            full_name: format!("herd-{}", name),
            host: "a".to_string(),
            ..Default::default()
        };
        orch.apply_remote(RemotePoll { host: "a".into(), seq: 2, sessions: Ok(vec![session("new")]) });
        orch.apply_remote(RemotePoll { host: "a".into(), seq: 1, sessions: Ok(vec![session("old")]) });
        assert_eq!(keys(&orch), vec!["a:herd-new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_activity_forces_round_after_backoff() {
        let host = Arc::new(MockExecutor::remote("a", &["x"], Duration::ZERO, IDLE));
        let (mut orch, mut rx) = orchestrator(Arc::new(MockExecutor::default()), vec![host.clone()], None);

        tokio::time::advance(Duration::from_secs(65)).await;
        orch.remote_round();
        assert_eq!(orch.remote_interval, Duration::from_secs(20));
        pump(&mut orch, &mut rx, Instant::now() + Duration::from_secs(1), |_, _| {}).await;
        assert_eq!(host.list_calls(), 1);

        orch.user_activity(Instant::now());
        pump(&mut orch, &mut rx, Instant::now() + Duration::from_secs(1), |_, _| {}).await;
        assert_eq!(host.list_calls(), 2);
        assert_eq!(orch.remote_interval, Duration::from_secs(5));

        // the timer of the replaced chain is ignored
        orch.remote_tick(0);
        pump(&mut orch, &mut rx, Instant::now() + Duration::from_secs(1), |_, _| {}).await;
        assert_eq!(host.list_calls(), 2);

        // activity at the base interval changes nothing
        orch.user_activity(Instant::now());
        pump(&mut orch, &mut rx, Instant::now() + Duration::from_secs(1), |_, _| {}).await;
        assert_eq!(host.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_local_session_is_nudged() {
        let local = Arc::new(MockExecutor::remote("", &["api"], Duration::ZERO, IDLE));
        let (mut orch, mut rx) = orchestrator(local.clone(), vec![], None);
        orch.toggle_auto_forward("herd-api");

        orch.start();
        pump(&mut orch, &mut rx, Instant::now() + Duration::from_secs(13), |_, _| {}).await;

        assert_eq!(keys(&orch), vec!["herd-api"]);
        assert_eq!(local.sent(), vec![DEFAULT_NUDGE.to_string(), "<enter>".to_string()]);
        assert_eq!(orch.auto_forward_count("herd-api"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_survives_store_sync() {
        let local = Arc::new(MockExecutor::remote("", &["api"], Duration::ZERO, BUSY));
        let store: Arc<dyn StateStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (mut orch, mut rx) = orchestrator(local, vec![], Some(store.clone()));

        assert!(orch.toggle_auto_forward("herd-api"));
        orch.start();
        pump(&mut orch, &mut rx, Instant::now() + Duration::from_secs(4), |_, _| {}).await;

        assert!(orch.is_auto_forward("herd-api"));
        assert!(store.auto_forward("herd-api").unwrap());

        // a flag set by another process is picked up
        store.set_auto_forward("herd-web", true).unwrap();
        pump(&mut orch, &mut rx, Instant::now() + Duration::from_secs(4), |_, _| {}).await;
        assert!(orch.is_auto_forward("herd-web"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_list_skips_live_sessions() {
        let local = Arc::new(MockExecutor::remote("", &["api"], Duration::ZERO, BUSY));
        let store: Arc<dyn StateStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.save_transcript("herd-api", "t-live", "/src/api", "serve").unwrap();
        store.mark_killed("herd-old", "t-old", "/src/old", "migrate").unwrap();
        let (mut orch, mut rx) = orchestrator(local, vec![], Some(store));

        orch.start();
        pump(&mut orch, &mut rx, Instant::now() + Duration::from_secs(1), |_, _| {}).await;

        for killed_only in [false, true] {
            orch.list_resumable(killed_only);
            let listed = loop {
                match rx.recv().await {
                    Some(Action::ResumeListed(past)) => break past,
                    Some(_) => continue,
                    None => panic!("channel closed"),
                }
            };
            let keys: Vec<&str> = listed.iter().map(|p| p.key.as_str()).collect();
            assert_eq!(keys, vec!["herd-old"]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_local_interval_still_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut config = config();
        config.poll.local_interval_ms = 0;
        config.poll.remote_base_secs = 0;
        let mut orch = Orchestrator::new(&config, Arc::new(MockExecutor::default()), vec![], None, tx);

        orch.start();
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(first, Ok(Some(Action::LocalTick))));
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(second, Ok(Some(Action::LocalTick))));
        assert_eq!(orch.remote_interval, Duration::from_secs(1));
    }
}
