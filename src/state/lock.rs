//! Advisory state lock.
//!
//! Serializes whole plan and apply cycles between processes sharing a state
//! store. A held lock is renewed by a heartbeat so that only abandoned locks
//! expire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::StateStore;
use crate::error::Result;

/// Seconds after which an abandoned lock may be taken over.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Default lock time to live.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(LOCK_EXPIRY_SECS.unsigned_abs());

/// Delay between lock attempts while waiting.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(250);

const fn default_ttl_ms() -> u64 {
    LOCK_EXPIRY_SECS.unsigned_abs() * 1000
}

/// Lock record written by the holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Token required to release the lock.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// Acquisition time.
    pub acquired_at: DateTime<Utc>,
    /// Takeover deadline.
    pub expires_at: DateTime<Utc>,
    /// Lifetime granted by each renewal, in milliseconds.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

impl LockInfo {
    /// Creates a lock record for `holder`, expiring after [`LOCK_EXPIRY_SECS`].
    #[must_use]
    pub fn new(holder: &str) -> Self {
        Self::with_ttl(holder, DEFAULT_LOCK_TTL)
    }

    /// Creates a lock record for `holder` expiring after `ttl`.
    #[must_use]
    pub fn with_ttl(holder: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        let mut lock = Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        lock.refresh();
        lock
    }

    /// Lifetime granted by each renewal.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Pushes the expiry one time to live past now.
    pub fn refresh(&mut self) {
        let ttl = chrono::Duration::from_std(self.ttl())
            .unwrap_or_else(|_| chrono::Duration::seconds(LOCK_EXPIRY_SECS));
        self.expires_at = Utc::now() + ttl;
    }

    /// Whether another holder may take the lock over.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Seconds left before expiry, never negative.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Holder id of the form `host-pid-nonce` for this process.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get().map_or_else(|_| "localhost".to_owned(), |h| h.to_string_lossy().into_owned());
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{host}-{}-{}", std::process::id(), &nonce[..8])
}

/// Acquires the lock, retrying while it is held elsewhere.
///
/// A zero timeout makes a single attempt.
///
/// # Errors
///
/// Returns `StateError::Locked` once the timeout elapses, or any other
/// store error immediately.
pub async fn acquire_lock_with_timeout(
    store: &dyn StateStore,
    holder: &str,
    timeout: Duration,
) -> Result<LockInfo> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match store.acquire_lock(holder).await {
            Ok(lock) => return Ok(lock),
            Err(e) if e.is_locked() && tokio::time::Instant::now() < deadline => {
                debug!("State is locked, retrying: {e}");
                tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A held lock, renewed in the background until released.
///
/// Dropping the guard without calling [`LockGuard::release`] still releases
/// the lock from a spawned task.
pub struct LockGuard {
    store: Arc<dyn StateStore>,
    lock: LockInfo,
    stop: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
}

impl LockGuard {
    /// Starts renewing `lock` every third of its time to live.
    #[must_use]
    pub fn hold(store: Arc<dyn StateStore>, lock: LockInfo) -> Self {
        let stop = CancellationToken::new();
        let interval = (lock.ttl() / 3).max(Duration::from_millis(10));
        let heartbeat = tokio::spawn(renew_until_stopped(
            Arc::clone(&store),
            lock.lock_id.clone(),
            interval,
            stop.clone(),
        ));
        Self {
            store,
            lock,
            stop,
            heartbeat: Some(heartbeat),
        }
    }

    /// The lock as acquired.
    #[must_use]
    pub const fn lock(&self) -> &LockInfo {
        &self.lock
    }

    /// Stops the heartbeat and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns the store's release error.
    pub async fn release(mut self) -> Result<()> {
        self.stop.cancel();
        if let Some(heartbeat) = self.heartbeat.take() {
            let _ = heartbeat.await;
        }
        self.store.release_lock(&self.lock.lock_id).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(heartbeat) = self.heartbeat.take() else {
            return;
        };
        self.stop.cancel();

        let store = Arc::clone(&self.store);
        let lock_id = self.lock.lock_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = heartbeat.await;
                    if let Err(e) = store.release_lock(&lock_id).await {
                        warn!("Failed to release abandoned state lock {lock_id}: {e}");
                    }
                });
            }
            Err(_) => {
                heartbeat.abort();
                warn!("State lock {lock_id} left held until it expires");
            }
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("backend", &self.store.backend_type())
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

async fn renew_until_stopped(
    store: Arc<dyn StateStore>,
    lock_id: String,
    interval: Duration,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        // A renewal in flight finishes before the loop observes `stop`.
        match store.renew_lock(&lock_id).await {
            Ok(lock) => debug!("Renewed state lock {lock_id} until {}", lock.expires_at),
            Err(e) => warn!("Failed to renew state lock {lock_id}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InfraError, StateError};
    use crate::state::MemoryStateStore;

    #[test]
    fn test_lock_creation() {
        let lock = LockInfo::new("test-holder");
        assert_eq!(lock.holder, "test-holder");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);

        let pid = std::process::id().to_string();
        assert!(id1.contains(&pid));
    }

    #[tokio::test]
    async fn test_timeout_reports_holder() {
        let store = MemoryStateStore::new();
        let _held = store.acquire_lock("first").await.expect("lock");

        let err = acquire_lock_with_timeout(&store, "second", Duration::from_millis(300))
            .await
            .unwrap_err();
        match err {
            InfraError::State(StateError::Locked { holder, .. }) => assert_eq!(holder, "first"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_waits_for_release() {
        let store = MemoryStateStore::new();
        let held = store.acquire_lock("first").await.expect("lock");

        let releaser = store.clone();
        let lock_id = held.lock_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            releaser.release_lock(&lock_id).await.expect("release");
        });

        let lock = acquire_lock_with_timeout(&store, "second", Duration::from_secs(5))
            .await
            .expect("acquired after release");
        assert_eq!(lock.holder, "second");
    }

    #[tokio::test]
    async fn test_guard_renews_and_releases() {
        let store = MemoryStateStore::new().with_lock_ttl(Duration::from_millis(150));
        let lock = store.acquire_lock("first").await.expect("lock");
        let guard = LockGuard::hold(Arc::new(store.clone()), lock);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.acquire_lock("second").await.unwrap_err().is_locked());

        guard.release().await.expect("release");
        assert!(!store.is_locked().await.expect("is_locked"));

        let lock = store.acquire_lock("third").await.expect("lock");
        drop(LockGuard::hold(Arc::new(store.clone()), lock));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.is_locked().await.expect("is_locked"));
    }
}
