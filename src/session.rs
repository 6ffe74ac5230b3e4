use std::cmp::Ordering;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::screen::{StateInferenceEngine, Status};
use crate::tmux::{Executor, ExecutorError, SessionInfo};
use crate::transcript;

/// Lines captured per session on every poll.
pub const CAPTURE_LINES: usize = 25;

/// One monitored agent session, rebuilt from scratch on every poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Name without prefix
    pub name: String,
    /// Full tmux session name
    pub full_name: String,
    /// Host nickname, empty for local
    pub host: String,
    pub status: Status,
    /// Operating mode ("bypass", "plan", "auto-edit") or empty
    pub mode: String,
    /// Most recent completed step, e.g. "Write(/tmp/foo.txt)"
    pub last_action: String,
    /// e.g. "5 files +415 -44"
    pub changes: String,
    /// e.g. "PR #498"
    pub pr: String,
    /// Context left before compaction, e.g. "10%"
    pub context: String,
    /// Time since the tmux session was created
    pub duration: Duration,
    pub created_at: Option<SystemTime>,
    /// Modification time of the session's transcript (local only)
    pub last_active: Option<SystemTime>,
    pub attached_clients: usize,
    pub work_dir: String,
}

impl Session {
    /// Build a session record from list output and a screen capture.
    pub fn from_capture(info: &SessionInfo, host: &str, capture: &str, work_dir: String, now: SystemTime) -> Self {
        let analysis = StateInferenceEngine::analyze(capture);
        let created = info.created();
        Self {
            name: info.name.clone(),
            full_name: info.full_name.clone(),
            host: host.to_string(),
            status: analysis.status,
            mode: analysis.bar.mode,
            last_action: analysis.last_action,
            changes: analysis.bar.changes,
            pr: analysis.bar.pr,
            context: analysis.bar.context,
            duration: now.duration_since(created).unwrap_or_default(),
            created_at: Some(created),
            last_active: None,
            attached_clients: info.attached_clients,
            work_dir,
        }
    }

    pub fn is_local(&self) -> bool {
        self.host.is_empty()
    }

    /// Key that identifies this session across hosts: `full_name` locally,
    /// `host:full_name` remotely.
    pub fn key(&self) -> String {
        qualified_key(&self.host, &self.full_name)
    }

    /// Name as typed on the command line: `name` or `host:name`.
    pub fn display_name(&self) -> String {
        qualified_key(&self.host, &self.name)
    }
}

pub fn qualified_key(host: &str, name: &str) -> String {
    if host.is_empty() {
        name.to_string()
    } else {
        format!("{}:{}", host, name)
    }
}

/// A listed session together with the screen it was classified from.
/// The screen text is kept for transcript correlation.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub session: Session,
    pub capture: String,
}

/// List every session of one executor and classify its screen.
///
/// Capture failures degrade to an empty screen (status `Unknown`); only a
/// failed listing is an error.
pub async fn collect(executor: &dyn Executor) -> Result<Vec<Snapshot>, ExecutorError> {
    let host = executor.host();
    let infos = executor.list_sessions().await?;
    let now = SystemTime::now();

    let mut snapshots = Vec::with_capacity(infos.len());
    for info in &infos {
        let capture = executor
            .capture_pane(&info.full_name, CAPTURE_LINES)
            .await
            .unwrap_or_default();
        let work_dir = executor.pane_path(&info.full_name).await;
        let session = Session::from_capture(info, host, &capture, work_dir, now);
        snapshots.push(Snapshot { session, capture });
    }
    Ok(snapshots)
}

/// Fill in `last_active` for local sessions from their transcripts.
///
/// A session with a known transcript costs one stat call; otherwise the
/// newest transcript of its working directory is used.
pub fn stamp_last_active(session: &mut Session, projects_root: &Path, transcript_id: Option<&str>) {
    if !session.is_local() || session.work_dir.is_empty() {
        return;
    }
    session.last_active = match transcript_id {
        Some(id) => transcript::transcript_modified(projects_root, &session.work_dir, id),
        None => transcript::latest_modified(projects_root, &session.work_dir),
    };
}

/// Display order: local before remote, then status priority, then youngest
/// first.
pub fn compare_sessions(a: &Session, b: &Session) -> Ordering {
    b.is_local()
        .cmp(&a.is_local())
        .then_with(|| a.status.priority().cmp(&b.status.priority()))
        .then_with(|| a.duration.cmp(&b.duration))
}

pub fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(compare_sessions);
}

/// Format a duration for display: "45s", "12m", "3h 5m", "2d 4h".
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (mins, hours, days) = (secs / 60, secs / 3600, secs / 86_400);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", mins)
    } else if secs < 86_400 {
        match mins % 60 {
            0 => format!("{}h", hours),
            m => format!("{}h {}m", hours, m),
        }
    } else {
        match hours % 24 {
            0 => format!("{}d", days),
            h => format!("{}d {}h", days, h),
        }
    }
}
