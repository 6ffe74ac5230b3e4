use crossterm::event::{KeyEvent, MouseEvent};
use std::collections::HashSet;

use crate::session::Session;
use crate::store::PastSession;
use crate::transcript::Transcript;

/// Result of one local poll unit
#[derive(Debug, Clone)]
pub struct LocalPoll {
    pub seq: u64,
    /// `Err` keeps the previous local entries
    pub sessions: Result<Vec<Session>, String>,
    /// Transcripts newly matched to local sessions, by session key
    pub claims: Vec<(String, Transcript)>,
    /// Auto-forward keys read from the store, if it could be read
    pub auto_forward: Option<HashSet<String>>,
}

/// Result of fetching one remote host
#[derive(Debug, Clone)]
pub struct RemotePoll {
    pub host: String,
    pub seq: u64,
    /// `Err` keeps the host's previous entries
    pub sessions: Result<Vec<Session>, String>,
}

/// Actions that can be dispatched through the application
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// Mouse input, which also counts as user activity
    Mouse(MouseEvent),
    /// Local poll interval elapsed
    LocalTick,
    /// Remote poll timer of the given generation fired
    RemoteTick(u64),
    LocalPolled(LocalPoll),
    RemotePolled(RemotePoll),
    /// An auto-forward nudge was delivered to this session key
    NudgeSent(String),
    /// Screen or transcript text for the preview pane
    PreviewLoaded { key: String, text: String },
    /// Past sessions available for resuming
    ResumeListed(Vec<PastSession>),
    /// A session was killed; its transcript id if one was recorded
    SessionKilled { key: String, transcript: Option<String> },
    /// Informational status line
    Info(String),
    /// An error occurred
    Error(String),
    /// Attach to a session by key
    AttachSession(String),
    /// Create a new session: `[host:]name` and an optional first message
    CreateSession { target: String, message: Option<String> },
    /// Kill a session by key
    KillSession(String),
    /// Flip auto-forward for a session key
    ToggleAutoForward(String),
    /// Type a message into a session
    SendText { key: String, text: String },
    /// Load preview text for a session key
    LoadPreview(String),
    /// Load the transcript of a past session into the preview pane
    LoadTranscriptPreview(PastSession),
    /// Open the list of resumable sessions, optionally only killed ones
    ShowResume { killed_only: bool },
    /// Start a session that continues a past transcript
    ResumeSession(PastSession),
}
