//! State types for tracking applied resources.
//!
//! One [`StateRecord`] per resource instance holds what the provider reported
//! after the last successful operation on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::address::ResourceAddress;
use crate::config::{Attributes, ConfigHasher};
use crate::error::{InfraError, Result, StateError};

/// Current version of the record format.
pub const STATE_VERSION: &str = "1.0";

/// Every record of a store, keyed by address.
pub type StateSnapshot = BTreeMap<ResourceAddress, StateRecord>;

/// The recorded state of one resource instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Record format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Resource address.
    pub address: ResourceAddress,
    /// Provider-assigned identity.
    pub identity: String,
    /// Attributes reported by the provider after the last operation.
    pub attributes: Attributes,
    /// Addresses this resource depended on when it was applied.
    #[serde(default)]
    pub dependencies: BTreeSet<ResourceAddress>,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Digest of `attributes`.
    pub digest: String,
}

impl StateRecord {
    /// Creates a record for a freshly created resource.
    #[must_use]
    pub fn new(
        address: ResourceAddress,
        identity: impl Into<String>,
        attributes: Attributes,
        dependencies: BTreeSet<ResourceAddress>,
    ) -> Self {
        let now = Utc::now();
        let digest = ConfigHasher::new().hash_attributes(&attributes);
        Self {
            version: default_version(),
            address,
            identity: identity.into(),
            attributes,
            dependencies,
            created_at: now,
            updated_at: now,
            digest,
        }
    }

    /// Returns a copy with new attributes and dependencies, keeping creation time.
    #[must_use]
    pub fn updated(&self, attributes: Attributes, dependencies: BTreeSet<ResourceAddress>) -> Self {
        let digest = ConfigHasher::new().hash_attributes(&attributes);
        Self {
            version: self.version.clone(),
            address: self.address.clone(),
            identity: self.identity.clone(),
            attributes,
            dependencies,
            created_at: self.created_at,
            updated_at: Utc::now(),
            digest,
        }
    }

    /// Checks that the record can be persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if any attribute is still unknown.
    pub fn ensure_persistable(&self) -> Result<()> {
        if let Some((name, _)) = self.attributes.iter().find(|(_, v)| v.contains_unknown()) {
            return Err(InfraError::State(StateError::serialization(format!(
                "{}: attribute '{name}' is not known yet",
                self.address
            ))));
        }
        Ok(())
    }

    /// Returns true if the stored digest matches the attributes.
    #[must_use]
    pub fn digest_matches(&self) -> bool {
        ConfigHasher::hashes_match(
            &self.digest,
            &ConfigHasher::new().hash_attributes(&self.attributes),
        )
    }
}

/// Computes the digest of a whole snapshot.
///
/// Saved plans carry this digest; applying one against a store whose digest
/// differs is refused.
#[must_use]
pub fn state_digest(snapshot: &StateSnapshot) -> String {
    let entries: Vec<(String, &str, &str)> = snapshot
        .values()
        .map(|r| (r.address.to_string(), r.identity.as_str(), r.digest.as_str()))
        .collect();
    ConfigHasher::new().hash_serialized(&entries)
}

fn default_version() -> String {
    String::from(STATE_VERSION)
}
