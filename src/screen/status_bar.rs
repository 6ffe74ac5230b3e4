use super::decoration::is_decoration;
use super::patterns::{
    ACTION_MARKER, CONTEXT_HINT, MODE_BANNERS, PR_PREFIX, SEGMENT_SEPARATOR,
};

const MAX_ACTION_CHARS: usize = 40;

/// Metadata shown in the agent's bottom status bar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusBar {
    /// Operating mode tag ("bypass", "plan", "auto-edit") or empty
    pub mode: String,
    /// Working tree change summary, e.g. "5 files +415 -44"
    pub changes: String,
    /// External reference, e.g. "PR #498"
    pub pr: String,
    /// Remaining context before auto-compaction, e.g. "10%"
    pub context: String,
}

/// Parse the status bar from the decoration block at the bottom of the screen.
///
/// The bar is made of " · " separated segments:
///
/// ```text
/// ⏵⏵ bypass permissions on (shift+tab to cycle) · 5 files +415 -44 · PR #498
/// ? for shortcuts                     Context left until auto-compact: 10%
/// ```
pub fn parse_status_bar(lines: &[&str]) -> StatusBar {
    let mut bar = StatusBar::default();

    for line in lines.iter().rev() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !is_decoration(trimmed) {
            break;
        }

        let lower = trimmed.to_lowercase();

        if bar.mode.is_empty() {
            if let Some((_, tag)) = MODE_BANNERS.iter().find(|(phrase, _)| lower.contains(phrase)) {
                bar.mode = (*tag).to_string();
            }
        }

        // `lower` and `trimmed` only share byte offsets while lowercasing
        // kept every byte length, which holds for the ASCII hint itself.
        if let Some(idx) = lower.find(CONTEXT_HINT) {
            if let Some(rest) = trimmed.get(idx + CONTEXT_HINT.len()..) {
                bar.context = rest.trim().to_string();
            }
        }

        for segment in trimmed.split(SEGMENT_SEPARATOR) {
            let segment = segment.trim();
            let seg_lower = segment.to_lowercase();
            if seg_lower.starts_with(PR_PREFIX) {
                bar.pr = segment.to_string();
            }
            if seg_lower.contains("file") && segment.contains('+') {
                bar.changes = segment.to_string();
            }
        }
    }

    bar
}

/// Most recent completed step, taken from the lowest action marker line.
pub fn last_action(lines: &[&str]) -> String {
    lines
        .iter()
        .rev()
        .map(|l| l.trim())
        .find_map(|l| l.strip_prefix(ACTION_MARKER))
        .map(|action| truncate(action.trim(), MAX_ACTION_CHARS))
        .unwrap_or_default()
}

/// Truncate to `max` characters, replacing the tail with "..." when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<&str> {
        s.split('\n').collect()
    }

    #[test]
    fn test_mode_detection() {
        let cases = [
            ("  ⏵⏵ bypass permissions on (shift+tab to cycle)", "bypass"),
            ("  ⏸ plan mode on (shift+tab to cycle)", "plan"),
            ("  auto-accept edits on", "auto-edit"),
            ("  ? for shortcuts", ""),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_status_bar(&lines(input)).mode, expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_segments_and_context() {
        let screen = "⏺ Done.\n\n❯\n───────────────\n  ⏵⏵ bypass permissions on (shift+tab to cycle) · 5 files +415 -44 · PR #498\n  ? for shortcuts            Context left until auto-compact: 10%";
        let bar = parse_status_bar(&lines(screen));
        assert_eq!(bar.mode, "bypass");
        assert_eq!(bar.changes, "5 files +415 -44");
        assert_eq!(bar.pr, "PR #498");
        assert_eq!(bar.context, "10%");
    }

    #[test]
    fn test_parse_stops_at_content() {
        // The banner above the prompt is not part of the bottom bar.
        let screen = "  ⏵⏵ bypass permissions on\n❯\n  ? for shortcuts";
        assert_eq!(parse_status_bar(&lines(screen)).mode, "");
    }

    #[test]
    fn test_last_action() {
        assert_eq!(last_action(&lines("⏺ Read(main.go)\n\n❯")), "Read(main.go)");
        assert_eq!(
            last_action(&lines("⏺ This is a very long action description that exceeds the maximum length limit\n\n❯")),
            "This is a very long action descriptio..."
        );
        assert_eq!(last_action(&lines("⏺ First action\n\n⏺ Second action\n\n❯")), "Second action");
        assert_eq!(last_action(&lines("❯")), "");
    }
}
