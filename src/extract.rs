use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid text encoding at byte {offset}")]
    InvalidEncoding { offset: usize },

    #[error("binary content")]
    Binary,
}

/// Turns the raw bytes of a document into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// Read a document (or only its first `limit` bytes) and extract its text.
pub fn read_text(
    extractor: &dyn TextExtractor,
    path: &Path,
    limit: Option<usize>,
) -> Result<String, ExtractError> {
    let mut bytes = Vec::new();
    match limit {
        Some(n) => {
            File::open(path)?.take(n as u64).read_to_end(&mut bytes)?;
            // A fixed offset can land inside a multi-byte sequence.
            if let Err(e) = std::str::from_utf8(&bytes) {
                if e.error_len().is_none() {
                    bytes.truncate(e.valid_up_to());
                }
            }
        }
        None => {
            File::open(path)?.read_to_end(&mut bytes)?;
        }
    }
    extractor.extract(&bytes)
}

/// Strips RTF control words, groups and ignorable destinations.
#[derive(Debug, Default, Clone, Copy)]
pub struct RtfExtractor;

impl TextExtractor for RtfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        if bytes.contains(&0) {
            return Err(ExtractError::Binary);
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(to_plain_text(text)),
            Err(e) => {
                // Keep whatever decodes before the first corrupt byte.
                let offset = e.valid_up_to();
                let salvaged = std::str::from_utf8(&bytes[..offset]).unwrap_or_default();
                let text = to_plain_text(salvaged);
                if text.trim().is_empty() {
                    return Err(ExtractError::InvalidEncoding { offset });
                }
                Ok(text)
            }
        }
    }
}

fn to_plain_text(text: &str) -> String {
    if text.trim_start().starts_with("{\\rtf") {
        strip_rtf(text)
    } else {
        text.to_string()
    }
}

const SKIP_DESTINATIONS: &[&str] = &[
    "fonttbl", "colortbl", "stylesheet", "info", "pict", "object", "header", "headerl",
    "headerr", "headerf", "footer", "footerl", "footerr", "footerf", "fldinst", "listtable",
    "listoverridetable", "rsidtbl", "generator", "xmlnstbl", "themedata", "colorschememapping",
    "datastore", "latentstyles", "filetbl", "revtbl", "pgdsctbl", "mmathPr", "xmlopen",
    "bkmkstart", "bkmkend", "nonshppict", "shppict",
];

#[derive(Clone, Copy)]
struct GroupState {
    skip: bool,
    uc_skip: usize,
}

fn strip_rtf(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() / 2);
    let mut stack: Vec<GroupState> = Vec::new();
    let mut state = GroupState { skip: false, uc_skip: 1 };
    // Fallback characters still to swallow after a \uN escape.
    let mut pending_fallback = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' => {
                stack.push(state);
                pending_fallback = 0;
                i += 1;
            }
            '}' => {
                // Unbalanced closing braces are ignored.
                if let Some(prev) = stack.pop() {
                    state = prev;
                }
                pending_fallback = 0;
                i += 1;
            }
            '\\' => {
                i += 1;
                let Some(&next) = chars.get(i) else { break };
                match next {
                    '\\' | '{' | '}' => {
                        emit(&mut out, next, state.skip, &mut pending_fallback);
                        i += 1;
                    }
                    '\'' => {
                        let hex: String = chars.iter().skip(i + 1).take(2).collect();
                        i += 1 + hex.len();
                        if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                            emit(&mut out, cp1252(byte), state.skip, &mut pending_fallback);
                        }
                    }
                    '*' => {
                        state.skip = true;
                        i += 1;
                    }
                    '~' => {
                        emit(&mut out, ' ', state.skip, &mut pending_fallback);
                        i += 1;
                    }
                    '_' => {
                        emit(&mut out, '-', state.skip, &mut pending_fallback);
                        i += 1;
                    }
                    '-' => i += 1,
                    '\n' | '\r' => {
                        if !state.skip {
                            out.push('\n');
                        }
                        i += 1;
                    }
                    c if c.is_ascii_alphabetic() => {
                        let start = i;
                        while i < chars.len() && chars[i].is_ascii_alphabetic() {
                            i += 1;
                        }
                        let word: String = chars[start..i].iter().collect();

                        let param_start = i;
                        if i < chars.len() && chars[i] == '-' {
                            i += 1;
                        }
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                        let param: Option<i32> = if i > param_start {
                            chars[param_start..i].iter().collect::<String>().parse().ok()
                        } else {
                            None
                        };
                        // A single space terminates the control word and is consumed.
                        if i < chars.len() && chars[i] == ' ' {
                            i += 1;
                        }

                        control_word(&word, param, &mut state, &mut out, &mut pending_fallback);
                    }
                    _ => i += 1,
                }
            }
            '\r' | '\n' => i += 1,
            _ => {
                emit(&mut out, c, state.skip, &mut pending_fallback);
                i += 1;
            }
        }
    }

    out
}

fn control_word(
    word: &str,
    param: Option<i32>,
    state: &mut GroupState,
    out: &mut String,
    pending_fallback: &mut usize,
) {
    if SKIP_DESTINATIONS.contains(&word) {
        state.skip = true;
        return;
    }
    if state.skip {
        return;
    }
    match word {
        "par" | "line" | "sect" | "row" | "page" => out.push('\n'),
        "tab" | "cell" => out.push('\t'),
        "emdash" => out.push('\u{2014}'),
        "endash" => out.push('\u{2013}'),
        "bullet" => out.push('\u{2022}'),
        "lquote" => out.push('\u{2018}'),
        "rquote" => out.push('\u{2019}'),
        "ldblquote" => out.push('\u{201C}'),
        "rdblquote" => out.push('\u{201D}'),
        "uc" => state.uc_skip = param.unwrap_or(1).max(0) as usize,
        "u" => {
            if let Some(mut code) = param {
                if code < 0 {
                    code += 65536;
                }
                if let Some(ch) = char::from_u32(code as u32) {
                    out.push(ch);
                }
                *pending_fallback = state.uc_skip;
            }
        }
        _ => {}
    }
}

fn emit(out: &mut String, c: char, skip: bool, pending_fallback: &mut usize) {
    if *pending_fallback > 0 {
        *pending_fallback -= 1;
        return;
    }
    if !skip {
        out.push(c);
    }
}

/// Windows-1252 differs from Latin-1 only in 0x80..=0x9F.
fn cp1252(byte: u8) -> char {
    const HIGH: [char; 32] = [
        '\u{20AC}', '\u{FFFD}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}',
        '\u{2021}', '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{FFFD}',
        '\u{017D}', '\u{FFFD}', '\u{FFFD}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
        '\u{2022}', '\u{2013}', '\u{2014}', '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}',
        '\u{0153}', '\u{FFFD}', '\u{017E}', '\u{0178}',
    ];
    match byte {
        0x80..=0x9F => HIGH[(byte - 0x80) as usize],
        _ => byte as char,
    }
}
