use serde::{Deserialize, Serialize};

use super::decoration::is_decoration;
use super::patterns::{
    ACTION_MARKER, BUSY_HINT, DASHED_RULE, ELLIPSIS, IDLE_PLACEHOLDER, PERMISSION_PAIRS,
    PERMISSION_PHRASES, PLAIN_PROMPT, PROMPT_GLYPH, SPINNER_GLYPHS, TASK_DONE_PHRASE,
};

/// Number of content lines examined above the bottom of the screen.
const CONTENT_WINDOW: usize = 10;

/// Status of an agent session, inferred from its screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Status {
    /// Status cannot be determined
    #[default]
    Unknown,
    /// Agent is actively working
    Running,
    /// Agent is idle at its prompt
    Waiting,
    /// Agent is blocked on a tool permission prompt
    Permission,
    /// Agent shows a plan approval or other confirmation dialog
    Confirm,
    /// Agent reported that its task is complete
    TaskDone,
}

impl Status {
    /// Sort priority, lower is shown first.
    pub fn priority(self) -> u8 {
        match self {
            Status::Permission | Status::Confirm | Status::TaskDone => 0,
            Status::Running => 1,
            Status::Waiting => 2,
            Status::Unknown => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Running => "running",
            Status::Waiting => "waiting",
            Status::Permission => "permission",
            Status::Confirm => "confirm",
            Status::TaskDone => "task done",
        }
    }

    /// Whether the agent needs a human to look at it.
    pub fn needs_attention(self) -> bool {
        self.priority() == 0
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of applying one rule to one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Rule does not apply, try the next rule
    Pass,
    /// Line consumed, keep scanning upward
    Continue,
    /// Stop with this status
    Decide(Status),
}

/// What the bottom-up scan has seen so far
#[derive(Debug, Default)]
pub struct ScanState {
    pub content_lines: usize,
    pub saw_menu: bool,
    pub saw_prompt: bool,
}

type Rule = fn(&str, &mut ScanState) -> Verdict;

/// Rules for decoration lines, in priority order.
const DECORATION_RULES: &[Rule] = &[busy_hint, dashed_rule_after_menu];

/// Rules for content lines below the prompt, in priority order.
const CONTENT_RULES: &[Rule] = &[permission_prompt, numbered_menu, input_prompt, progress_indicator];

/// Once the prompt is seen only the line above it matters.
const ABOVE_PROMPT_RULES: &[Rule] = &[above_prompt];

/// Classify a screen capture, most recent line last.
pub fn classify(lines: &[&str]) -> Status {
    let mut state = ScanState::default();

    for line in lines.iter().rev() {
        if state.content_lines >= CONTENT_WINDOW {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let rules = if is_decoration(trimmed) {
            DECORATION_RULES
        } else {
            state.content_lines += 1;
            if state.saw_prompt {
                ABOVE_PROMPT_RULES
            } else {
                CONTENT_RULES
            }
        };

        for rule in rules {
            match rule(trimmed, &mut state) {
                Verdict::Pass => {}
                Verdict::Continue => break,
                Verdict::Decide(status) => return status,
            }
        }
    }

    if state.saw_prompt {
        Status::Waiting
    } else {
        Status::Unknown
    }
}

/// The busy hint is the least ambiguous signal on screen.
pub fn busy_hint(line: &str, _state: &mut ScanState) -> Verdict {
    if line.contains(BUSY_HINT) {
        Verdict::Decide(Status::Running)
    } else {
        Verdict::Pass
    }
}

/// A dashed rule above a numbered menu frames the plan approval dialog.
pub fn dashed_rule_after_menu(line: &str, state: &mut ScanState) -> Verdict {
    if state.saw_menu && line.starts_with(DASHED_RULE) {
        Verdict::Decide(Status::Confirm)
    } else {
        Verdict::Pass
    }
}

pub fn permission_prompt(line: &str, _state: &mut ScanState) -> Verdict {
    if is_permission_line(line) {
        Verdict::Decide(Status::Permission)
    } else {
        Verdict::Pass
    }
}

/// Menu entries sit between the prompt and the bottom; remember and move on.
pub fn numbered_menu(line: &str, state: &mut ScanState) -> Verdict {
    if is_numbered_menu_item(line) {
        state.saw_menu = true;
        Verdict::Continue
    } else {
        Verdict::Pass
    }
}

pub fn input_prompt(line: &str, state: &mut ScanState) -> Verdict {
    if is_prompt_line(line) {
        state.saw_prompt = true;
        Verdict::Continue
    } else {
        Verdict::Pass
    }
}

pub fn progress_indicator(line: &str, _state: &mut ScanState) -> Verdict {
    if is_running_indicator(line) {
        Verdict::Decide(Status::Running)
    } else {
        Verdict::Pass
    }
}

/// Content directly above the prompt decides between done and idle.
pub fn above_prompt(line: &str, _state: &mut ScanState) -> Verdict {
    if line.contains(TASK_DONE_PHRASE) {
        Verdict::Decide(Status::TaskDone)
    } else {
        Verdict::Decide(Status::Waiting)
    }
}

pub fn is_permission_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    PERMISSION_PAIRS
        .iter()
        .any(|(a, b)| lower.contains(a) && lower.contains(b))
        || PERMISSION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Plan approval menu entries such as "❯ 1. Yes, and bypass permissions".
pub fn is_numbered_menu_item(trimmed: &str) -> bool {
    let s = trimmed.strip_prefix(PROMPT_GLYPH).unwrap_or(trimmed).trim_start();
    let mut chars = s.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some('1'..='9'), Some('.'), Some(' '))
    )
}

/// Bare prompt, optionally followed by text the user is typing.
pub fn is_prompt_line(trimmed: &str) -> bool {
    trimmed == PLAIN_PROMPT || trimmed.starts_with(PROMPT_GLYPH)
}

/// Active progress line, detected structurally rather than by spinner glyph:
/// any braille frame, or an ellipsis that is not a truncation marker, a
/// completed action, a prompt or the idle placeholder.
pub fn is_running_indicator(trimmed: &str) -> bool {
    if trimmed.contains(SPINNER_GLYPHS) {
        return true;
    }
    if !trimmed.contains(ELLIPSIS) {
        return false;
    }
    if trimmed.starts_with(ELLIPSIS) || trimmed.starts_with(ACTION_MARKER) {
        return false;
    }
    if is_prompt_line(trimmed) {
        return false;
    }
    // Collapsed tool output: "     … +4 lines (ctrl+o to expand)"
    if trimmed.contains("… +") && trimmed.contains("lines") {
        return false;
    }
    trimmed != IDLE_PLACEHOLDER
}
