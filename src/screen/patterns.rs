//! Literal glyphs and phrases of the agent's terminal UI.
//!
//! The structural rules in this module's siblings only ever consult these
//! tables, so a UI change in the agent means editing this file alone.

/// Substrings (lowercased) that mark a line as status bar or hint chrome.
pub const DECORATION_PHRASES: &[&str] = &[
    "bypass permissions on",
    "shift+tab",
    "auto-accept",
    "accept edits on",
    "plan mode on",
    "for shortcuts",
    "esc to interrupt",
];

/// Line prefixes that mark box borders and horizontal rules.
pub const DECORATION_PREFIXES: &[&str] = &["───", "╌", "╭", "╰", "│"];

/// Hint shown in the status bar while the agent is working.
pub const BUSY_HINT: &str = "esc to interrupt";

/// Dashed rule that frames the plan approval dialog.
pub const DASHED_RULE: &str = "╌";

/// Prompt glyph of the agent's input box.
pub const PROMPT_GLYPH: &str = "❯";

/// Fallback prompt used by plain shells and older agent builds.
pub const PLAIN_PROMPT: &str = ">";

/// Marker printed in front of every completed tool call or reply.
pub const ACTION_MARKER: &str = "⏺";

/// Phrase the agent is asked to print once the task is really finished.
pub const TASK_DONE_PHRASE: &str = "TASK DONE!";

/// Braille spinner frames.
pub const SPINNER_GLYPHS: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Ellipsis used by verb spinners ("✻ Thinking…").
pub const ELLIPSIS: &str = "…";

/// Idle placeholder some tools print while blocked on the user.
pub const IDLE_PLACEHOLDER: &str = "Waiting…";

/// Pairs of lowercase words whose co-occurrence marks a permission prompt.
pub const PERMISSION_PAIRS: &[(&str, &str)] = &[("allow", "deny")];

/// Lowercase phrases that each mark a permission prompt on their own.
pub const PERMISSION_PHRASES: &[&str] = &["yes / no", "yes/no", "allow once", "allow always"];

/// Banner phrases mapped to the short mode tag shown in the dashboard.
pub const MODE_BANNERS: &[(&str, &str)] = &[
    ("bypass permissions on", "bypass"),
    ("plan mode", "plan"),
    ("auto-accept edits", "auto-edit"),
    ("accept edits on", "auto-edit"),
];

/// Lowercase lead-in of the remaining context hint.
pub const CONTEXT_HINT: &str = "context left until auto-compact:";

/// Separator between status bar segments.
pub const SEGMENT_SEPARATOR: &str = " · ";

/// Lowercase prefix of a pull request reference segment.
pub const PR_PREFIX: &str = "pr #";
