//! Pluggable turn similarity used by repetition detection.
//!
//! The loop guard only asks "is this turn a repeat of that one?". The
//! default answer is an exact fingerprint match with a normalized edit
//! distance fallback for near-duplicates such as typos.

use serde::Serialize;

use crate::utils::normalize::normalized_edit_distance;

/// Fingerprint of one user turn as kept in the repetition window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnFingerprint {
    /// SHA-256 of the normalized text.
    pub hash: String,
    /// Normalized text, kept for fuzzy comparison.
    #[serde(skip)]
    pub normalized: String,
}

/// Decides whether two turns count as the same question.
pub trait SimilarityComparator: Send + Sync {
    fn is_similar(&self, a: &TurnFingerprint, b: &TurnFingerprint) -> bool;
}

/// Exact hash equality only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl SimilarityComparator for ExactMatch {
    fn is_similar(&self, a: &TurnFingerprint, b: &TurnFingerprint) -> bool {
        a.hash == b.hash
    }
}

/// Exact hash first, then normalized edit distance at or below `max_distance`.
///
/// Character edit distance cannot tell "2 adults" from "3 adults", so two
/// turns whose numeric tokens differ are never near-duplicates.
#[derive(Debug, Clone, Copy)]
pub struct ExactOrEditDistance {
    max_distance: f64,
}

impl ExactOrEditDistance {
    pub fn new(max_distance: f64) -> Self {
        Self {
            max_distance: max_distance.clamp(0.0, 1.0),
        }
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }
}

impl SimilarityComparator for ExactOrEditDistance {
    fn is_similar(&self, a: &TurnFingerprint, b: &TurnFingerprint) -> bool {
        if a.hash == b.hash {
            return true;
        }
        if self.max_distance <= 0.0 || a.normalized.is_empty() || b.normalized.is_empty() {
            return false;
        }
        if !numbers(&a.normalized).eq(numbers(&b.normalized)) {
            return false;
        }
        normalized_edit_distance(&a.normalized, &b.normalized) <= self.max_distance
    }
}

fn numbers(normalized: &str) -> impl Iterator<Item = &str> {
    normalized
        .split_whitespace()
        .filter(|token| token.chars().any(|c| c.is_numeric()))
}
