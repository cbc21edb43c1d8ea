use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const WINDOWS_RESERVED: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];
const EMPTY_NAME: &str = "untitled";

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
// Member names end in " <index>.<ext>".
static MEMBER_TAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\s\d{1,6})?\.[A-Za-z0-9]+$").unwrap());

/// Make `text` usable as a single path component.
pub fn sanitize_name(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|ch| !ch.is_control() || ch.is_whitespace())
        .map(|ch| if INVALID_FILENAME_CHARS.contains(&ch) { '_' } else { ch })
        .collect();
    let cleaned = WHITESPACE_RE.replace_all(&cleaned, " ");
    let cleaned = cleaned.trim_matches(|ch: char| ch == '.' || ch.is_whitespace());

    if cleaned.is_empty() {
        return EMPTY_NAME.into();
    }
    let lowered = cleaned.to_ascii_lowercase();
    let base = lowered.split('.').next().unwrap_or("");
    if WINDOWS_RESERVED.contains(&base) {
        return format!("_{}", cleaned);
    }
    cleaned.to_string()
}

/// First `n` characters of `text`.
pub fn char_prefix(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Shorten a file or directory name to `max_len` characters for console output.
pub fn short_name(path: &Path, max_len: usize) -> String {
    const HEAD_LEN: usize = 4;
    const TAIL_LEN: usize = 7;
    const PLACEHOLDER: &str = "...";

    let max_len = max_len.max(HEAD_LEN + TAIL_LEN + PLACEHOLDER.len() + 1);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= max_len {
        return name;
    }

    let tail_start = match MEMBER_TAIL_RE.find(&name) {
        Some(m) if m.as_str().chars().count() < max_len - HEAD_LEN - PLACEHOLDER.len() => {
            chars.len() - m.as_str().chars().count()
        }
        _ => chars.len() - TAIL_LEN,
    };
    let tail: String = chars[tail_start..].iter().collect();
    let body_len = max_len - PLACEHOLDER.len() - (chars.len() - tail_start);
    let head: String = chars[..body_len].iter().collect();

    format!("{}{}{}", head, PLACEHOLDER, tail)
}
