//! Text normalization and edit distance for turn fingerprints.
//!
//! Normalization is deliberately light: NFKC, lowercase, punctuation to
//! spaces, whitespace collapsed, and a short list of filler words dropped.
//! Two messages that differ only in casing, spacing, punctuation or
//! politeness words normalize to the same string.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}']+").unwrap());

/// Filler words removed before hashing. Kept short on purpose: content
/// words such as "to", "from" or "not" change the meaning of travel queries.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "please", "pls", "plz", "hi", "hello", "hey", "um", "uh", "just",
        "so", "well", "ok", "okay", "really", "kindly",
    ]
    .into_iter()
    .collect()
});

/// Tokenize `text` into lowercase words without stop-word removal.
pub fn tokenize(text: &str) -> Vec<String> {
    let folded: String = text.nfkc().collect::<String>().to_lowercase();
    NON_WORD_RE
        .split(&folded)
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalize `text` for fingerprinting.
///
/// Stop words are dropped unless the message consists only of stop words,
/// in which case the full token list is kept so "hello" and "hey" still
/// produce distinct fingerprints.
pub fn normalize_text(text: &str) -> String {
    let tokens = tokenize(text);
    let content: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|t| !STOP_WORDS.contains(t))
        .collect();
    if content.is_empty() {
        tokens.join(" ")
    } else {
        content.join(" ")
    }
}

/// Normalize without stop-word removal, used for command phrase matching.
pub fn normalize_phrase(text: &str) -> String {
    tokenize(text).join(" ")
}

/// Levenshtein distance over Unicode scalar values.
pub fn edit_distance(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Edit distance divided by the longer length, in `[0.0, 1.0]`.
pub fn normalized_edit_distance(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0.0;
    }
    edit_distance(a, b) as f64 / longest as f64
}
