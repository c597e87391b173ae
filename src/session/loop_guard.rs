//! Repetition window for detecting users stuck asking the same question.
//!
//! Keeps the fingerprints of the last K user turns and counts how many of
//! them match the newest one under a [`SimilarityComparator`].

use std::collections::VecDeque;

use super::similarity::{SimilarityComparator, TurnFingerprint};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopGuardDecision {
    Continue,
    Repeating {
        /// Matching fingerprints in the window, newest included.
        occurrences: usize,
    },
}

/// Bounded window of recent user-turn fingerprints.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    window: usize,
    repetition_threshold: usize,
    recent: VecDeque<TurnFingerprint>,
}

impl LoopGuard {
    pub fn new(window: usize, repetition_threshold: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            repetition_threshold: repetition_threshold.max(2),
            recent: VecDeque::with_capacity(window),
        }
    }

    /// Push a fingerprint, dropping the oldest when the window is full.
    pub fn push(&mut self, fingerprint: TurnFingerprint) {
        self.recent.push_back(fingerprint);
        while self.recent.len() > self.window {
            let _ = self.recent.pop_front();
        }
    }

    /// How many fingerprints in the window match the newest, newest included.
    pub fn occurrences(&self, comparator: &dyn SimilarityComparator) -> usize {
        let Some(newest) = self.recent.back() else {
            return 0;
        };
        self.recent
            .iter()
            .filter(|fp| comparator.is_similar(newest, fp))
            .count()
    }

    /// Evaluate the window against the repetition threshold.
    pub fn evaluate(&self, comparator: &dyn SimilarityComparator) -> LoopGuardDecision {
        let occurrences = self.occurrences(comparator);
        if occurrences >= self.repetition_threshold {
            LoopGuardDecision::Repeating { occurrences }
        } else {
            LoopGuardDecision::Continue
        }
    }

    /// Change window size and threshold. Shrinking drops the oldest entries.
    pub fn reconfigure(&mut self, window: usize, repetition_threshold: usize) {
        self.window = window.max(1);
        self.repetition_threshold = repetition_threshold.max(2);
        while self.recent.len() > self.window {
            let _ = self.recent.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }

    /// Fingerprint hashes, oldest first.
    pub fn hashes(&self) -> Vec<String> {
        self.recent.iter().map(|fp| fp.hash.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}
