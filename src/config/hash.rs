//! Digests for change detection.
//!
//! Deterministic SHA-256 digests of the configuration, of attribute maps and
//! of whole state snapshots. Saved plans carry the state digest so a plan
//! computed against an older state is rejected at apply.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::spec::Configuration;
use super::value::Attributes;

/// Hasher for computing configuration and state digests.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a digest of the entire configuration.
    ///
    /// Variables, resources and outputs keep declaration order, attribute
    /// maps are sorted, so equal documents hash equally.
    #[must_use]
    pub fn hash_config(&self, config: &Configuration) -> String {
        self.hash_serialized(config)
    }

    /// Computes a digest of one attribute map.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &Attributes) -> String {
        self.hash_serialized(attributes)
    }

    /// Computes a digest of any serializable value through its JSON form.
    #[must_use]
    pub fn hash_serialized<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        self.hash_bytes(&bytes)
    }

    /// Computes a digest of raw bytes.
    #[must_use]
    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
