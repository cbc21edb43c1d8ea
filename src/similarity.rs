use ahash::AHashSet;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::extract::{read_text, ExtractError, TextExtractor};

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+(?:['’-]\w+)*").unwrap());

/// Word-level tokens of a document's text.
#[derive(Debug, Clone, Default)]
pub struct TokenSet(AHashSet<String>);

impl TokenSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }
}

impl<S: Into<String>> FromIterator<S> for TokenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        TokenSet(iter.into_iter().map(Into::into).collect())
    }
}

pub fn tokenize(text: &str) -> TokenSet {
    WORD_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// Shared tokens as a percentage of the smaller set.
///
/// Unlike Jaccard, a short excerpt is not penalized for the extra content of
/// the longer document it came from. Empty input scores 0 (no evidence).
pub fn score(a: &TokenSet, b: &TokenSet) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let shared = small.0.iter().filter(|t| large.contains(t.as_str())).count();
    100.0 * shared as f64 / small.len() as f64
}

/// Score `tokens` against the document at `path`, reading only a prefix first.
///
/// The full document is read when the prefix score reaches `threshold` or is
/// exactly 0 (the prefix may be nothing but markup). Any other prefix score
/// stands. A prefix that cannot be parsed counts as 0.
pub fn compare_to_document(
    tokens: &TokenSet,
    path: &Path,
    threshold: f64,
    prefix_len: usize,
    extractor: &dyn TextExtractor,
) -> Result<f64, ExtractError> {
    let prefix_score = match read_text(extractor, path, Some(prefix_len)) {
        Ok(text) => score(tokens, &tokenize(&text)),
        Err(_) => 0.0,
    };

    if prefix_score >= threshold || prefix_score == 0.0 {
        let text = read_text(extractor, path, None)?;
        return Ok(score(tokens, &tokenize(&text)));
    }
    Ok(prefix_score)
}
