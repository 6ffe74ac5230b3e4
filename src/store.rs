//! Persistent per-session state in SQLite.
//!
//! Rows are keyed by the session key (`full_name` or `host:full_name`) and
//! outlive the tmux session, which is what makes resuming possible.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    name          TEXT PRIMARY KEY,
    autoforward   INTEGER NOT NULL DEFAULT 0,
    killed        INTEGER NOT NULL DEFAULT 0,
    session_file  TEXT NOT NULL DEFAULT '',
    work_dir      TEXT NOT NULL DEFAULT '',
    first_msg     TEXT NOT NULL DEFAULT '',
    killed_at     TEXT,
    updated_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_autoforward ON sessions(autoforward);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to prepare state directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store lock poisoned")]
    Poisoned,
}

/// A session that is gone from tmux but has a transcript to resume
#[derive(Debug, Clone, PartialEq)]
pub struct PastSession {
    pub key: String,
    pub transcript_id: String,
    pub work_dir: String,
    pub first_message: String,
    /// Kill time, or the last time the session was seen alive
    pub last_seen: Option<DateTime<Utc>>,
    /// Explicitly killed, as opposed to lost
    pub killed: bool,
}

/// Durable state shared across runs and processes
pub trait StateStore: Send + Sync {
    fn set_auto_forward(&self, key: &str, enabled: bool) -> Result<(), StoreError>;

    fn auto_forward(&self, key: &str) -> Result<bool, StoreError>;

    /// Keys of every session with auto-forward enabled
    fn auto_forward_keys(&self) -> Result<HashSet<String>, StoreError>;

    /// Remember which transcript a live session writes to.
    fn save_transcript(&self, key: &str, transcript_id: &str, work_dir: &str, first_message: &str) -> Result<(), StoreError>;

    /// Record an explicit kill together with the session's transcript.
    fn mark_killed(&self, key: &str, transcript_id: &str, work_dir: &str, first_message: &str) -> Result<(), StoreError>;

    /// Killed sessions, most recent kill first
    fn list_killed(&self, limit: usize) -> Result<Vec<PastSession>, StoreError>;

    /// Every session with a known transcript, killed or lost, most recently
    /// seen first
    fn list_resumable(&self, limit: usize) -> Result<Vec<PastSession>, StoreError>;
}

/// Default database location, `$XDG_STATE_HOME/agent-herder/state.db`.
pub fn default_path() -> PathBuf {
    state_dir().join("state.db")
}

/// `$XDG_STATE_HOME/agent-herder`, falling back to `~/.local/state`.
pub fn state_dir() -> PathBuf {
    let base = std::env::var_os("XDG_STATE_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local").join("state"));
    base.join("agent-herder")
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc))
}

/// SQLite-backed state store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // WAL lets several herder processes share the file
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "State store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&conn)?)
    }

    fn save_transcript_at(&self, key: &str, transcript_id: &str, work_dir: &str, first_message: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (name, session_file, work_dir, first_msg, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                    session_file = excluded.session_file,
                    work_dir = excluded.work_dir,
                    first_msg = excluded.first_msg,
                    killed = 0,
                    killed_at = NULL,
                    updated_at = excluded.updated_at",
                params![key, transcript_id, work_dir, first_message, timestamp(at)],
            )
        })?;
        Ok(())
    }

    fn mark_killed_at(&self, key: &str, transcript_id: &str, work_dir: &str, first_message: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let at = timestamp(at);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (name, killed, session_file, work_dir, first_msg, killed_at, updated_at)
                 VALUES (?1, 1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                    killed = 1,
                    session_file = CASE WHEN excluded.session_file != '' THEN excluded.session_file ELSE session_file END,
                    work_dir = CASE WHEN excluded.work_dir != '' THEN excluded.work_dir ELSE work_dir END,
                    first_msg = CASE WHEN excluded.first_msg != '' THEN excluded.first_msg ELSE first_msg END,
                    killed_at = excluded.killed_at,
                    updated_at = excluded.updated_at",
                params![key, transcript_id, work_dir, first_message, at],
            )
        })?;
        Ok(())
    }

    fn query_past(&self, sql: &str, limit: usize) -> Result<Vec<PastSession>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    let last_seen: String = row.get(5)?;
                    Ok(PastSession {
                        key: row.get(0)?,
                        transcript_id: row.get(1)?,
                        work_dir: row.get(2)?,
                        first_message: row.get(3)?,
                        killed: row.get::<_, i64>(4)? == 1,
                        last_seen: parse_timestamp(&last_seen),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

impl StateStore for SqliteStore {
    fn set_auto_forward(&self, key: &str, enabled: bool) -> Result<(), StoreError> {
        let now = timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (name, autoforward, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                    autoforward = excluded.autoforward,
                    updated_at = excluded.updated_at",
                params![key, enabled as i64, now],
            )
        })?;
        Ok(())
    }

    fn auto_forward(&self, key: &str) -> Result<bool, StoreError> {
        let enabled = self.with_conn(|conn| {
            conn.query_row(
                "SELECT autoforward FROM sessions WHERE name = ?1",
                params![key],
                |row| row.get::<_, i64>(0),
            )
            .optional()
        })?;
        Ok(enabled == Some(1))
    }

    fn auto_forward_keys(&self) -> Result<HashSet<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM sessions WHERE autoforward = 1")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            Ok(keys)
        })
    }

    fn save_transcript(&self, key: &str, transcript_id: &str, work_dir: &str, first_message: &str) -> Result<(), StoreError> {
        self.save_transcript_at(key, transcript_id, work_dir, first_message, Utc::now())
    }

    fn mark_killed(&self, key: &str, transcript_id: &str, work_dir: &str, first_message: &str) -> Result<(), StoreError> {
        self.mark_killed_at(key, transcript_id, work_dir, first_message, Utc::now())
    }

    fn list_killed(&self, limit: usize) -> Result<Vec<PastSession>, StoreError> {
        self.query_past(
            "SELECT name, session_file, work_dir, first_msg, killed, killed_at
             FROM sessions
             WHERE killed = 1 AND killed_at IS NOT NULL
             ORDER BY killed_at DESC
             LIMIT ?1",
            limit,
        )
    }

    fn list_resumable(&self, limit: usize) -> Result<Vec<PastSession>, StoreError> {
        self.query_past(
            "SELECT name, session_file, work_dir, first_msg, killed,
                    COALESCE(killed_at, updated_at) AS last_seen
             FROM sessions
             WHERE session_file != ''
             ORDER BY last_seen DESC
             LIMIT ?1",
            limit,
        )
    }
}
