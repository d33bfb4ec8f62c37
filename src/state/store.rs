//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::{StateRecord, StateSnapshot};
use crate::address::ResourceAddress;
use crate::error::Result;

/// Trait for state storage backends.
///
/// `commit` and `remove` are atomic per address: a reader sees either the
/// previous record or the new one.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads every record.
    async fn load(&self) -> Result<StateSnapshot>;

    /// Loads the record at one address.
    async fn get(&self, address: &ResourceAddress) -> Result<Option<StateRecord>> {
        Ok(self.load().await?.remove(address))
    }

    /// Writes the record at its address, replacing any previous record.
    async fn commit(&self, record: &StateRecord) -> Result<()>;

    /// Removes the record at an address. Removing a missing record succeeds.
    async fn remove(&self, address: &ResourceAddress) -> Result<()>;

    /// Acquires the state lock.
    ///
    /// Fails with `StateError::Locked` if an unexpired lock is held.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Extends the expiry of the held lock by its time to live.
    ///
    /// Fails with `StateError::LockFailed` if `lock_id` no longer holds the
    /// lock.
    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` matches the held lock.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock regardless of holder.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets current lock information if locked.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked by an unexpired lock.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self.lock_info().await?.is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
