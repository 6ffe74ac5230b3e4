//! Reading the agent's append-only transcript logs.
//!
//! The agent writes one newline-delimited JSON file per conversation under
//! `<root>/<encoded work dir>/<id>.jsonl`. Files are only ever read here.

pub mod correlator;

pub use correlator::{find_transcript, resolve_claims, ClaimRequest, Transcript};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::screen::truncate;

const TRANSCRIPT_EXT: &str = "jsonl";
const COMMAND_MARKER: &str = "<command-message>";
const FIRST_MESSAGE_MAX: usize = 80;
const SNIPPET_MAX: usize = 80;
const PREVIEW_LINE_MAX: usize = 200;

/// One line of a transcript. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct Record {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    cwd: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    message: Option<RecordMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct RecordMessage {
    #[serde(default)]
    content: Value,
}

impl Record {
    fn text(&self) -> String {
        self.message
            .as_ref()
            .map(|m| extract_content(&m.content))
            .unwrap_or_default()
    }
}

/// Metadata of one transcript, gathered from its human messages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptMeta {
    /// Working directory recorded by the agent
    pub cwd: String,
    /// First human message, newlines folded and truncated
    pub first_message: String,
    /// Timestamp of the first human message
    pub started: Option<DateTime<Utc>>,
}

/// Default transcript root, `~/.claude/projects`.
pub fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".claude")
        .join("projects")
}

/// Directory name the agent uses for a working directory: every `/`
/// becomes `-`, so `/Users/a/b` is stored under `-Users-a-b`.
pub fn encode_project_dir(dir: &str) -> String {
    dir.replace('/', "-")
}

pub fn project_dir(root: &Path, work_dir: &str) -> PathBuf {
    root.join(encode_project_dir(work_dir))
}

pub fn transcript_path(root: &Path, work_dir: &str, id: &str) -> PathBuf {
    project_dir(root, work_dir).join(format!("{}.{}", id, TRANSCRIPT_EXT))
}

/// Text of a `message.content` field: either a plain string or the first
/// non-empty `text` block of a block list.
fn extract_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .find(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_default(),
        _ => String::new(),
    }
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parsed records of a transcript; unreadable files yield nothing and
/// malformed lines are skipped.
fn records(path: &Path) -> impl Iterator<Item = Record> {
    let reader = File::open(path).ok().map(BufReader::new);
    reader
        .into_iter()
        .flat_map(|r| r.split(b'\n'))
        .map_while(Result::ok)
        .filter_map(|line| serde_json::from_slice::<Record>(&line).ok())
}

/// Human-authored text of a record, or `None` for agent records, empty
/// messages and slash-command invocations.
fn human_text(record: &Record) -> Option<String> {
    if record.kind != "user" {
        return None;
    }
    let text = record.text();
    if text.is_empty() || text.starts_with(COMMAND_MARKER) {
        return None;
    }
    Some(text)
}

/// Read working directory, first human message and start time.
pub fn read_meta(path: &Path) -> TranscriptMeta {
    let mut meta = TranscriptMeta::default();
    for record in records(path) {
        if record.kind != "user" {
            continue;
        }
        if meta.cwd.is_empty() && !record.cwd.is_empty() {
            meta.cwd = record.cwd.clone();
        }
        if meta.started.is_none() && !record.timestamp.is_empty() {
            meta.started = DateTime::parse_from_rfc3339(&record.timestamp)
                .ok()
                .map(|t| t.with_timezone(&Utc));
        }
        if meta.first_message.is_empty() {
            if let Some(text) = human_text(&record) {
                meta.first_message = truncate(&text.replace('\n', " "), FIRST_MESSAGE_MAX);
            }
        }
        if !meta.cwd.is_empty() && meta.started.is_some() && !meta.first_message.is_empty() {
            break;
        }
    }
    meta
}

/// The last `n` human messages, whitespace-collapsed and cut to a fixed
/// prefix so they can be looked up in screen text.
pub fn read_last_user_messages(path: &Path, n: usize) -> Vec<String> {
    let snippets: Vec<String> = records(path)
        .filter_map(|r| human_text(&r))
        .map(|text| collapse_whitespace(&text).chars().take(SNIPPET_MAX).collect::<String>())
        .filter(|s| !s.is_empty())
        .collect();
    let skip = snippets.len().saturating_sub(n);
    snippets.into_iter().skip(skip).collect()
}

/// Render the last `max_messages` messages of a transcript as
/// `You: ...` / `Agent: ...` lines.
pub fn read_preview(root: &Path, work_dir: &str, id: &str, max_messages: usize) -> String {
    if id.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = records(&transcript_path(root, work_dir, id))
        .filter_map(|record| {
            let role = match record.kind.as_str() {
                "user" => "You",
                "assistant" => "Agent",
                _ => return None,
            };
            let text = record.text();
            if text.is_empty() || text.starts_with(COMMAND_MARKER) {
                return None;
            }
            Some(format!("{}: {}", role, truncate(&collapse_whitespace(&text), PREVIEW_LINE_MAX)))
        })
        .collect();
    let skip = lines.len().saturating_sub(max_messages);
    lines[skip..].join("\n")
}

/// Transcript files of one project directory as `(id, mtime)`, newest
/// first, ties broken by id.
pub fn list_transcripts(dir: &Path) -> Vec<(String, SystemTime)> {
    let mut files: Vec<(String, SystemTime)> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(TRANSCRIPT_EXT))
        .filter_map(|e| {
            let id = e.path().file_stem()?.to_str()?.to_string();
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((id, modified))
        })
        .collect();
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    files
}

/// Newest transcript modification time for a working directory.
pub fn latest_modified(root: &Path, work_dir: &str) -> Option<SystemTime> {
    if work_dir.is_empty() {
        return None;
    }
    list_transcripts(&project_dir(root, work_dir))
        .first()
        .map(|(_, modified)| *modified)
}

/// Modification time of one known transcript; a single stat call.
pub fn transcript_modified(root: &Path, work_dir: &str, id: &str) -> Option<SystemTime> {
    if work_dir.is_empty() || id.is_empty() {
        return None;
    }
    std::fs::metadata(transcript_path(root, work_dir, id))
        .and_then(|m| m.modified())
        .ok()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encode_project_dir() {
        assert_eq!(encode_project_dir("/Users/a/b"), "-Users-a-b");
        assert_eq!(encode_project_dir("/"), "-");
        assert_eq!(encode_project_dir(""), "");
        assert_eq!(encode_project_dir("rel/dir"), "rel-dir");
    }

    #[test]
    fn test_extract_content_variants() {
        assert_eq!(extract_content(&serde_json::json!("hi")), "hi");
        let blocks = serde_json::json!([
            { "type": "tool_result", "content": "x" },
            { "type": "text", "text": "" },
            { "type": "text", "text": "second" },
        ]);
        assert_eq!(extract_content(&blocks), "second");
        assert_eq!(extract_content(&Value::Null), "");
    }

    #[test]
    fn test_read_meta_skips_commands_and_folds_newlines() {
        let dir = TempDir::new().unwrap();
        let long = "x".repeat(100);
        let lines = vec![
            "not json".to_string(),
            assistant("hello"),
            user("<command-message>init</command-message>", "2025-01-01T10:00:00Z"),
            user("fix the\nlogin bug", "2025-01-01T10:00:05Z"),
            user(&long, "2025-01-01T10:01:00Z"),
        ];
        write(dir.path(), "/work/app", "t1", &lines, at(1_000));

        let meta = read_meta(&transcript_path(dir.path(), "/work/app", "t1"));
        assert_eq!(meta.cwd, "/work/app");
        assert_eq!(meta.first_message, "fix the login bug");
        assert_eq!(meta.started.unwrap().to_rfc3339(), "2025-01-01T10:00:00+00:00");
    }

    #[test]
    fn test_first_message_truncated() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "/w", "t", &[user(&"a".repeat(90), "2025-01-01T10:00:00Z")], at(1));
        let meta = read_meta(&transcript_path(dir.path(), "/w", "t"));
        assert_eq!(meta.first_message.chars().count(), 80);
        assert!(meta.first_message.ends_with("..."));
    }

    #[test]
    fn test_last_user_messages() {
        let dir = TempDir::new().unwrap();
        let lines = vec![
            user("one", "2025-01-01T10:00:00Z"),
            user("two   spaced\nout", "2025-01-01T10:00:01Z"),
            assistant("ignored"),
            user("three", "2025-01-01T10:00:02Z"),
            user(&"b".repeat(120), "2025-01-01T10:00:03Z"),
        ];
        write(dir.path(), "/w", "t", &lines, at(1));
        let snippets = read_last_user_messages(&transcript_path(dir.path(), "/w", "t"), 3);
        assert_eq!(snippets.len(), 3);
        assert_eq!(snippets[0], "two spaced out");
        assert_eq!(snippets[1], "three");
        assert_eq!(snippets[2].len(), 80);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = transcript_path(dir.path(), "/w", "t");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut raw = user("early", "2025-01-01T10:00:00Z").into_bytes();
        raw.extend_from_slice(b"\n{\"type\":\"assistant\",\"message\":{\"content\":\"\xff\xfe\"}}\n");
        raw.extend_from_slice(user("latest question", "2025-01-01T10:00:05Z").as_bytes());
        std::fs::write(&path, raw).unwrap();

        assert_eq!(read_last_user_messages(&path, 3), vec!["early", "latest question"]);
        assert_eq!(read_meta(&path).first_message, "early");
    }

    #[test]
    fn test_read_preview() {
        let dir = TempDir::new().unwrap();
        let lines = vec![
            user("first", "2025-01-01T10:00:00Z"),
            assistant("reply one"),
            user("second\nquestion", "2025-01-01T10:00:01Z"),
            assistant(&"z".repeat(250)),
        ];
        write(dir.path(), "/w", "t", &lines, at(1));
        let preview = read_preview(dir.path(), "/w", "t", 3);
        let out: Vec<&str> = preview.lines().collect();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], "Agent: reply one");
        assert_eq!(out[1], "You: second question");
        assert_eq!(out[2].chars().count(), "Agent: ".len() + 200);
        assert_eq!(read_preview(dir.path(), "/w", "", 3), "");
    }

    #[test]
    fn test_modified_times() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "/w", "old", &[user("a", "")], at(1_000));
        write(dir.path(), "/w", "new", &[user("b", "")], at(2_000));

        assert_eq!(latest_modified(dir.path(), "/w"), Some(at(2_000)));
        assert_eq!(transcript_modified(dir.path(), "/w", "old"), Some(at(1_000)));
        assert_eq!(transcript_modified(dir.path(), "/w", "missing"), None);
        assert_eq!(latest_modified(dir.path(), "/elsewhere"), None);
        assert_eq!(latest_modified(dir.path(), ""), None);
    }

    #[test]
    fn test_list_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "/w", "b", &[user("a", "")], at(5));
        write(dir.path(), "/w", "a", &[user("a", "")], at(5));
        let project = project_dir(dir.path(), "/w");
        std::fs::write(project.join("notes.txt"), "x").unwrap();
        std::fs::create_dir(project.join("sub.jsonl")).unwrap();

        let ids: Vec<String> = list_transcripts(&project).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
