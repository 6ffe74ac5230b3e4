use super::patterns::{DECORATION_PHRASES, DECORATION_PREFIXES};

/// Whether a trimmed line is UI chrome rather than conversation content.
pub fn is_decoration(trimmed: &str) -> bool {
    let lower = trimmed.to_lowercase();
    DECORATION_PHRASES.iter().any(|p| lower.contains(p))
        || DECORATION_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Strip the agent's frame from captured output for display in a preview.
///
/// Leading blank lines and trailing blank lines are dropped as well.
pub fn strip_frame(output: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if kept.is_empty() && trimmed.is_empty() {
            continue;
        }
        if is_decoration(trimmed) && !trimmed.starts_with('│') {
            continue;
        }
        kept.push(line);
    }

    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }

    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoration_lines() {
        let cases = [
            ("───────────────", true),
            ("╌╌╌╌╌╌╌╌╌╌╌╌╌", true),
            ("? for shortcuts", true),
            ("⏵⏵ bypass permissions on (shift+tab to cycle)", true),
            ("⏸ plan mode on (shift+tab to cycle)", true),
            ("auto-accept edits on", true),
            ("╭ some box", true),
            ("╰ box end", true),
            ("│ box content", true),
            ("2. Yes, and bypass permissions", false),
            ("❯ prompt", false),
            ("⏺ Read(foo.go)", false),
            ("some normal output", false),
        ];
        for (line, expected) in cases {
            assert_eq!(is_decoration(line), expected, "line: {line:?}");
        }
    }

    #[test]
    fn test_strip_frame_keeps_conversation() {
        let output = "\n\n⏺ Read(main.rs)\n  fn main() {}\n\n❯\n───────────\n  ? for shortcuts\n\n";
        assert_eq!(strip_frame(output), "⏺ Read(main.rs)\n  fn main() {}\n\n❯");
    }
}
