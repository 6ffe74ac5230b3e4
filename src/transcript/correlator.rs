use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

use super::{collapse_whitespace, list_transcripts, project_dir, read_last_user_messages, read_meta};

/// Only the newest files of a directory are opened.
const MAX_CANDIDATES: usize = 10;
/// Human messages per transcript looked up in the screen text.
const CONTENT_SNIPPETS: usize = 3;

/// A transcript matched to a session
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    /// File stem of the transcript
    pub id: String,
    pub first_message: String,
    pub started: Option<DateTime<Utc>>,
    pub modified: SystemTime,
}

/// Find the transcript that belongs to a session.
///
/// Candidates are the newest transcripts of the session's project directory
/// that are not in `exclude`; excluded files are never opened. Strategies,
/// first hit wins:
///
/// 1. With two or more candidates and screen text, the transcript whose
///    recent human messages appear most often on screen.
/// 2. The transcript whose first message follows `session_start` most
///    closely.
/// 3. The most recently modified transcript touched since `session_start`.
/// 4. The most recently modified transcript.
pub fn find_transcript(
    root: &Path,
    work_dir: &str,
    session_start: Option<SystemTime>,
    pane: &str,
    exclude: &HashSet<String>,
) -> Option<Transcript> {
    if work_dir.is_empty() {
        return None;
    }
    let dir = project_dir(root, work_dir);

    let candidates: Vec<Transcript> = list_transcripts(&dir)
        .into_iter()
        .filter(|(id, _)| !exclude.contains(id))
        .take(MAX_CANDIDATES)
        .map(|(id, modified)| {
            let meta = read_meta(&dir.join(format!("{}.jsonl", id)));
            Transcript {
                id,
                first_message: meta.first_message,
                started: meta.started,
                modified,
            }
        })
        .collect();

    if candidates.is_empty() {
        return None;
    }

    if candidates.len() > 1 && !pane.trim().is_empty() {
        if let Some(found) = by_content(&dir, &candidates, pane) {
            debug!(work_dir = %work_dir, transcript = %found.id, "Matched transcript by screen content");
            return Some(found.clone());
        }
    }

    if let Some(start) = session_start {
        if let Some(found) = by_start_time(&candidates, start) {
            return Some(found.clone());
        }
        if let Some(found) = by_activity_since(&candidates, start) {
            return Some(found.clone());
        }
    }

    candidates.into_iter().next()
}

fn by_content<'a>(dir: &Path, candidates: &'a [Transcript], pane: &str) -> Option<&'a Transcript> {
    let screen = collapse_whitespace(pane);
    let mut best: Option<(&Transcript, usize)> = None;
    for candidate in candidates {
        let path = dir.join(format!("{}.jsonl", candidate.id));
        let score = read_last_user_messages(&path, CONTENT_SNIPPETS)
            .iter()
            .filter(|snippet| screen.contains(snippet.as_str()))
            .count();
        if score > best.map_or(0, |(_, s)| s) {
            best = Some((candidate, score));
        }
    }
    best.map(|(c, _)| c)
}

fn by_start_time(candidates: &[Transcript], start: SystemTime) -> Option<&Transcript> {
    let start = DateTime::<Utc>::from(start);
    let mut best: Option<(&Transcript, chrono::Duration)> = None;
    for candidate in candidates {
        let Some(started) = candidate.started else {
            continue;
        };
        let gap = started - start;
        if gap < chrono::Duration::zero() {
            continue;
        }
        if best.map_or(true, |(_, g)| gap < g) {
            best = Some((candidate, gap));
        }
    }
    best.map(|(c, _)| c)
}

fn by_activity_since(candidates: &[Transcript], start: SystemTime) -> Option<&Transcript> {
    let mut best: Option<&Transcript> = None;
    for candidate in candidates.iter().filter(|c| c.modified >= start) {
        if best.map_or(true, |b| candidate.modified > b.modified) {
            best = Some(candidate);
        }
    }
    best
}

/// A session waiting for its transcript
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// Session key the claim is recorded under
    pub key: String,
    pub work_dir: String,
    pub started: Option<SystemTime>,
    pub pane: String,
    /// Only accept a transcript written to since the session started. A
    /// fresh session has no transcript yet and must not inherit an old one.
    pub require_activity: bool,
}

/// Correlate several sessions in one pass.
///
/// Sessions are resolved oldest first and every claim is added to the
/// exclusion set, so no transcript is handed to two sessions. `claimed`
/// holds transcripts already owned by live sessions.
pub fn resolve_claims(
    root: &Path,
    mut requests: Vec<ClaimRequest>,
    claimed: &HashSet<String>,
) -> Vec<(String, Transcript)> {
    requests.sort_by(|a, b| match (a.started, b.started) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.key.cmp(&b.key),
    });

    let mut exclude = claimed.clone();
    let mut resolved = Vec::new();
    for request in requests {
        let Some(found) = find_transcript(root, &request.work_dir, request.started, &request.pane, &exclude) else {
            continue;
        };
        if request.require_activity && request.started.is_some_and(|start| found.modified < start) {
            continue;
        }
        exclude.insert(found.id.clone());
        resolved.push((request.key, found));
    }
    resolved
}
