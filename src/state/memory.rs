//! In-memory state storage backend.
//!
//! Same semantics as the local backend, without persistence. Clones share
//! the same records and lock, so one store can serve several runs.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::lock::{DEFAULT_LOCK_TTL, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{StateRecord, StateSnapshot};
use crate::address::ResourceAddress;
use crate::error::{InfraError, Result, StateError};

#[derive(Debug, Default)]
struct Inner {
    records: StateSnapshot,
    lock: Option<LockInfo>,
}

/// In-memory state store.
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Inner>>,
    lock_ttl: Duration,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::with_records(StateSnapshot::new())
    }
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the given records.
    #[must_use]
    pub fn with_records(records: StateSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                records,
                lock: None,
            })),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    /// Sets the time to live of locks acquired through this handle.
    #[must_use]
    pub const fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        Ok(self.inner.lock().await.records.clone())
    }

    async fn get(&self, address: &ResourceAddress) -> Result<Option<StateRecord>> {
        Ok(self.inner.lock().await.records.get(address).cloned())
    }

    async fn commit(&self, record: &StateRecord) -> Result<()> {
        record.ensure_persistable()?;
        debug!("Committing {}", record.address);
        self.inner
            .lock()
            .await
            .records
            .insert(record.address.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, address: &ResourceAddress) -> Result<()> {
        debug!("Removing {address}");
        self.inner.lock().await.records.remove(address);
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = &inner.lock {
            if !existing.is_expired() {
                return Err(InfraError::State(StateError::Locked {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock = LockInfo::with_ttl(&holder_id, self.lock_ttl);
        inner.lock = Some(lock.clone());
        info!("Acquired state lock: {}", lock.lock_id);
        Ok(lock)
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let mut inner = self.inner.lock().await;
        match inner.lock.as_mut() {
            Some(existing) if existing.lock_id == lock_id => {
                existing.refresh();
                Ok(existing.clone())
            }
            _ => Err(InfraError::State(StateError::LockFailed {
                message: format!("lock {lock_id} is no longer held"),
            })),
        }
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match &inner.lock {
            Some(existing) if existing.lock_id == lock_id => {
                inner.lock = None;
                info!("Released state lock: {lock_id}");
            }
            Some(existing) => {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        self.inner.lock().await.lock = None;
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.inner.lock().await.lock.clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
