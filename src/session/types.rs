//! Conversation session types.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::loop_guard::{LoopGuard, LoopGuardDecision};
use super::similarity::{SimilarityComparator, TurnFingerprint};
use crate::utils::fingerprint::{hash_text, FingerprintBuilder};
use crate::utils::normalize::normalize_text;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Conversation state machine.
///
/// `Active -> Repeating` when the repetition threshold is reached,
/// `Repeating -> Active` when the next user turn is different enough, and
/// any state `-> Terminating` on a termination phrase. A terminating
/// session is removed from the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Active,
    Repeating,
    Terminating,
}

/// One message in a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Normalized text, computed once at append time.
    #[serde(skip)]
    pub normalized: String,
    /// Hash of `normalized`.
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        let text = text.into();
        let normalized = normalize_text(&text);
        let fingerprint = hash_text(&normalized);
        Self {
            role,
            text,
            normalized,
            fingerprint,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn turn_fingerprint(&self) -> TurnFingerprint {
        TurnFingerprint {
            hash: self.fingerprint.clone(),
            normalized: self.normalized.clone(),
        }
    }
}

/// Request parameters folded into the cache fingerprint alongside the
/// conversation text (target language, persona, model, ...).
///
/// Ordered, so insertion order never changes the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintParams(BTreeMap<String, String>);

impl FingerprintParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-session dialogue state. Owned by
/// [`ConversationManager`](super::ConversationManager); callers only see
/// [`SessionView`] snapshots.
#[derive(Debug)]
pub struct ConversationSession {
    pub(crate) id: String,
    pub(crate) turns: VecDeque<Turn>,
    /// Turns appended since creation or the last reset, truncation included.
    pub(crate) total_turns: u64,
    pub(crate) guard: LoopGuard,
    pub(crate) state: SessionState,
    pub(crate) repeat_occurrences: usize,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_active_ms: u64,
    /// Set once the session has left the manager's map.
    pub(crate) closed: bool,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>, window: usize, repeat_threshold: usize, now_ms: u64) -> Self {
        Self {
            id: id.into(),
            turns: VecDeque::new(),
            total_turns: 0,
            guard: LoopGuard::new(window, repeat_threshold),
            state: SessionState::Active,
            repeat_occurrences: 0,
            created_at: Utc::now(),
            last_active_ms: now_ms,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn total_turns(&self) -> u64 {
        self.total_turns
    }

    /// Append a turn. User turns feed the repetition window.
    pub(crate) fn push(&mut self, turn: Turn) {
        if turn.role == Role::User {
            self.guard.push(turn.turn_fingerprint());
        }
        self.turns.push_back(turn);
        self.total_turns += 1;
    }

    /// Compare the newest user fingerprint against the window. On a hit the
    /// session moves to [`SessionState::Repeating`].
    pub fn detect_repetition(&mut self, comparator: &dyn SimilarityComparator) -> bool {
        match self.guard.evaluate(comparator) {
            LoopGuardDecision::Repeating { occurrences } => {
                self.repeat_occurrences = occurrences;
                if self.state == SessionState::Active {
                    self.state = SessionState::Repeating;
                }
                true
            }
            LoopGuardDecision::Continue => {
                self.repeat_occurrences = self.guard.occurrences(comparator);
                false
            }
        }
    }

    /// Deterministic hash over the last `lookback` turns and `params`.
    ///
    /// Depends only on turn roles, normalized texts and parameters, never
    /// on timestamps.
    pub fn fingerprint(&self, lookback: usize, params: &FingerprintParams) -> String {
        let skip = self.turns.len().saturating_sub(lookback.max(1));
        let mut builder = FingerprintBuilder::new("context");
        for turn in self.turns.iter().skip(skip) {
            builder = builder.pair(turn.role.as_str(), &turn.normalized);
        }
        builder = builder.field("params");
        for (key, value) in params.iter() {
            builder = builder.pair(key, value);
        }
        builder.finish()
    }

    /// Drop the oldest turns beyond `max_turns`. The repetition window is
    /// left alone. Returns the number of turns dropped.
    pub fn truncate(&mut self, max_turns: usize) -> usize {
        let excess = self.turns.len().saturating_sub(max_turns);
        self.turns.drain(..excess);
        excess
    }

    /// Back to the state of a brand-new session with the same id.
    pub(crate) fn reset(&mut self, now_ms: u64) {
        self.turns.clear();
        self.total_turns = 0;
        self.guard.clear();
        self.state = SessionState::Active;
        self.repeat_occurrences = 0;
        self.created_at = Utc::now();
        self.last_active_ms = now_ms;
    }

    /// Copies of the last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    /// Read-only snapshot with the last `tail` turns.
    pub fn view(&self, tail: usize) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            state: self.state,
            total_turns: self.total_turns,
            history: self.recent_turns(tail),
            recent_fingerprints: self.guard.hashes(),
            repeat_occurrences: self.repeat_occurrences,
            created_at: self.created_at,
        }
    }
}

/// Snapshot of a session returned by every manager operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub state: SessionState,
    pub total_turns: u64,
    /// Most recent turns, oldest first.
    pub history: Vec<Turn>,
    /// User-turn fingerprint window, oldest first.
    pub recent_fingerprints: Vec<String>,
    /// Matches for the newest user turn in the window, itself included.
    pub repeat_occurrences: usize,
    pub created_at: DateTime<Utc>,
}

impl SessionView {
    pub fn is_repeating(&self) -> bool {
        self.state == SessionState::Repeating
    }

    pub fn is_terminating(&self) -> bool {
        self.state == SessionState::Terminating
    }

    /// Text of the newest turn, if any.
    pub fn last_text(&self) -> Option<&str> {
        self.history.last().map(|t| t.text.as_str())
    }
}
