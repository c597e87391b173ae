//! SHA-256 content fingerprints.
//!
//! Every field is length-prefixed before hashing so that field boundaries
//! cannot collide (`["ab", "c"]` and `["a", "bc"]` hash differently).

use sha2::{Digest, Sha256};

/// Hash a single already-normalized text.
pub fn hash_text(normalized: &str) -> String {
    FingerprintBuilder::new("turn").field(normalized).finish()
}

/// Incremental length-prefixed SHA-256 hasher.
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    /// Start a fingerprint in the given domain. Different domains never
    /// produce equal digests for equal fields.
    pub fn new(domain: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.push(domain.as_bytes());
        builder
    }

    /// Append one field.
    pub fn field(mut self, value: &str) -> Self {
        self.push(value.as_bytes());
        self
    }

    /// Append a key/value pair.
    pub fn pair(self, key: &str, value: &str) -> Self {
        self.field(key).field(value)
    }

    /// Hex-encoded digest.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }

    fn push(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }
}
