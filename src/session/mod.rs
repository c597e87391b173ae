//! Conversation sessions: history, repetition detection and lifecycle.

pub mod loop_guard;
pub mod manager;
pub mod pruner;
pub mod similarity;
pub mod types;

pub use loop_guard::{LoopGuard, LoopGuardDecision};
pub use manager::{ConversationManager, UserTurnOutcome};
pub use pruner::spawn_pruner;
pub use similarity::{ExactMatch, ExactOrEditDistance, SimilarityComparator, TurnFingerprint};
pub use types::{ConversationSession, FingerprintParams, Role, SessionState, SessionView, Turn};
