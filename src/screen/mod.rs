mod classifier;
mod decoration;
mod patterns;
mod status_bar;

pub use classifier::{classify, Status};
pub use decoration::strip_frame;
pub use status_bar::{last_action, parse_status_bar, truncate, StatusBar};

/// Everything read off one screen capture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenAnalysis {
    pub status: Status,
    pub bar: StatusBar,
    pub last_action: String,
}

/// Engine for inferring agent state from captured pane content
pub struct StateInferenceEngine;

impl StateInferenceEngine {
    /// Analyze pane content: status, status bar fields and last action.
    pub fn analyze(content: &str) -> ScreenAnalysis {
        if content.is_empty() {
            return ScreenAnalysis::default();
        }
        let lines: Vec<&str> = content.split('\n').collect();
        ScreenAnalysis {
            status: classify(&lines),
            bar: parse_status_bar(&lines),
            last_action: last_action(&lines),
        }
    }

    /// Status only, for re-checks right before acting on a session.
    pub fn status(content: &str) -> Status {
        if content.is_empty() {
            return Status::Unknown;
        }
        classify(&content.split('\n').collect::<Vec<_>>())
    }
}
