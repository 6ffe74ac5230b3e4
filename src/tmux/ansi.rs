use once_cell::sync::Lazy;
use regex::Regex;

static RE_ANSI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap());

/// Plain text of a `capture-pane -e` dump.
///
/// Runs rendered dim, bright black or reverse video are dropped first: the
/// agent draws autocomplete suggestions that way and they are not on screen
/// as far as the user is concerned. Remaining escape sequences are removed.
pub fn clean_capture(raw: &str) -> String {
    let visible = strip_ghost_text(raw);
    RE_ANSI.replace_all(&visible, "").into_owned()
}

fn strip_ghost_text(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut ghost = false;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'[') {
            let mut j = i + 2;
            while j < bytes.len() && (bytes[j].is_ascii_digit() || bytes[j] == b';') {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'm' {
                let params = &s[i + 2..j];
                j += 1;
                if has_sgr(params, "2") || has_sgr(params, "90") || has_sgr(params, "7") {
                    ghost = true;
                    i = j;
                    continue;
                }
                if params.is_empty()
                    || has_sgr(params, "0")
                    || has_sgr(params, "22")
                    || has_sgr(params, "27")
                    || has_sgr(params, "39")
                {
                    ghost = false;
                }
                if !ghost {
                    out.extend_from_slice(&bytes[i..j]);
                }
                i = j;
                continue;
            }
        }
        if !ghost {
            out.push(bytes[i]);
        }
        i += 1;
    }

    // Only whole escape sequences and whole UTF-8 runs between them are cut.
    String::from_utf8_lossy(&out).into_owned()
}

/// Whether an SGR parameter list sets `code`, skipping the operands of
/// extended colours (`38;2;r;g;b`, `38;5;n` and the `48` variants).
fn has_sgr(params: &str, code: &str) -> bool {
    let parts: Vec<&str> = params.split(';').collect();
    let mut i = 0;
    while i < parts.len() {
        let p = parts[i];
        if (p == "38" || p == "48") && i + 1 < parts.len() {
            match parts[i + 1] {
                "2" => {
                    i += 5;
                    continue;
                }
                "5" => {
                    i += 3;
                    continue;
                }
                _ => {}
            }
        }
        if p == code {
            return true;
        }
        i += 1;
    }
    false
}
