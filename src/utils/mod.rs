//! Shared helpers: clocks, text normalization and fingerprint hashing.

pub mod clock;
pub mod fingerprint;
pub mod normalize;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fingerprint::{hash_text, FingerprintBuilder};
pub use normalize::{normalize_phrase, normalize_text, normalized_edit_distance};
