//! Local file-based state storage backend.
//!
//! Layout under the state directory:
//!
//! ```text
//! resources/<type>.<name>[.<index>].json   one record per resource instance
//! state.lock                               advisory run lock
//! ```
//!
//! Each record is written to a temporary file, synced, and renamed over the
//! previous one, so a crash never leaves a half-written record.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::address::ResourceAddress;
use crate::config::DEFAULT_STATE_DIR;
use crate::error::{InfraError, Result, StateError};

use super::lock::{DEFAULT_LOCK_TTL, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{StateRecord, StateSnapshot};

/// Directory holding one file per record.
const RESOURCES_DIR: &str = "resources";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Publish attempts before contention is reported as `Locked`.
const ACQUIRE_ATTEMPTS: usize = 5;

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Directory of record files.
    resources_dir: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// Time to live of locks acquired through this handle.
    lock_ttl: Duration,
}

impl LocalStateStore {
    /// Creates a store in `.infragraph` under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| InfraError::internal(format!("Cannot determine current directory: {e}")))?
            .join(DEFAULT_STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let resources_dir = base_dir.join(RESOURCES_DIR);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            resources_dir,
            lock_path,
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    /// Sets the time to live of locks acquired through this handle.
    #[must_use]
    pub const fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, address: &ResourceAddress) -> PathBuf {
        self.resources_dir.join(format!("{}.json", address.file_stem()))
    }

    /// Ensures the record directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.resources_dir).await.map_err(|e| {
            InfraError::State(StateError::io(format!(
                "Failed to create state directory {}: {e}",
                self.resources_dir.display()
            )))
        })
    }

    async fn read_record(path: &Path) -> Result<StateRecord> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            InfraError::State(StateError::io(format!("Failed to read {}: {e}", path.display())))
        })?;

        let record: StateRecord = serde_json::from_str(&content).map_err(|e| {
            InfraError::State(StateError::corrupted(format!(
                "Failed to parse {}: {e}",
                path.display()
            )))
        })?;

        if !record.digest_matches() {
            warn!("Digest mismatch in {}", path.display());
        }
        Ok(record)
    }

    /// Writes `content` to `path` and syncs it.
    async fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(path).await?;
        file.write_all(content).await?;
        file.sync_all().await
    }

    /// Writes `content` next to `path` and renames it into place.
    async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("json.tmp");

        Self::write_synced(&temp_path, content).await.map_err(|e| {
            InfraError::State(StateError::io(format!("Failed to write state file: {e}")))
        })?;

        fs::rename(&temp_path, path).await.map_err(|e| {
            InfraError::State(StateError::io(format!("Failed to rename state file: {e}")))
        })?;

        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        Self::read_lock_at(&self.lock_path).await
    }

    async fn read_lock_at(path: &Path) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(lock_failed(format!("Failed to read lock file: {e}"))),
        };

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            InfraError::State(StateError::corrupted(format!("Failed to parse lock file: {e}")))
        })?;

        Ok(Some(lock_info))
    }

    /// Writes `lock_info` to a private file beside the lock file.
    async fn write_lock_temp(&self, lock_info: &LockInfo) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            InfraError::State(StateError::io(format!("Failed to create state directory: {e}")))
        })?;

        let content = serde_json::to_vec_pretty(lock_info).map_err(|e| {
            InfraError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;

        let temp_path = self
            .base_dir
            .join(format!("{LOCK_FILE}.{}.tmp", Uuid::new_v4().simple()));
        Self::write_synced(&temp_path, &content)
            .await
            .map_err(|e| lock_failed(format!("Failed to write lock file: {e}")))?;
        Ok(temp_path)
    }

    /// Publishes the lock file; returns false if one already exists.
    ///
    /// The file is complete before it becomes visible: it is written under
    /// a private name and hard-linked into place, which fails if the target
    /// exists.
    async fn publish_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        let temp_path = self.write_lock_temp(lock_info).await?;
        let linked = fs::hard_link(&temp_path, &self.lock_path).await;
        remove_quietly(&temp_path).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(lock_failed(format!("Failed to create lock file: {e}"))),
        }
    }

    /// Removes the lock file if it still holds `expired`.
    ///
    /// The file is first renamed to a private name, so of several runs
    /// racing for the same expired lock only one moves it. A run that moved
    /// a newer lock instead links it back.
    async fn discard_expired_lock(&self, expired: &LockInfo) -> Result<()> {
        let parked = self
            .base_dir
            .join(format!("{LOCK_FILE}.{}.stale", Uuid::new_v4().simple()));

        match fs::rename(&self.lock_path, &parked).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(lock_failed(format!("Failed to move expired lock: {e}"))),
        }

        let moved = Self::read_lock_at(&parked).await;
        if !matches!(&moved, Ok(Some(lock)) if lock.lock_id == expired.lock_id) {
            debug!("Lock changed during takeover, restoring it");
            match fs::hard_link(&parked, &self.lock_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!("Lock replaced while restoring {}", parked.display());
                }
                Err(e) => {
                    remove_quietly(&parked).await;
                    return Err(lock_failed(format!("Failed to restore lock file: {e}")));
                }
            }
        }
        remove_quietly(&parked).await;
        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(lock_failed(format!("Failed to delete lock file: {e}"))),
        }
    }
}

fn lock_failed(message: String) -> InfraError {
    InfraError::State(StateError::LockFailed { message })
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        warn!("Failed to remove {}: {e}", path.display());
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        let mut snapshot = StateSnapshot::new();

        let mut entries = match fs::read_dir(&self.resources_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("State directory does not exist: {}", self.resources_dir.display());
                return Ok(snapshot);
            }
            Err(e) => {
                return Err(InfraError::State(StateError::io(format!(
                    "Failed to list {}: {e}",
                    self.resources_dir.display()
                ))));
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| InfraError::State(StateError::io(format!("Failed to list state: {e}"))))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let record = Self::read_record(&path).await?;
            if self.record_path(&record.address) != path {
                return Err(InfraError::State(StateError::corrupted(format!(
                    "{} holds the record of {}",
                    path.display(),
                    record.address
                ))));
            }
            snapshot.insert(record.address.clone(), record);
        }

        debug!("Loaded {} records from {}", snapshot.len(), self.base_dir.display());
        Ok(snapshot)
    }

    async fn get(&self, address: &ResourceAddress) -> Result<Option<StateRecord>> {
        let path = self.record_path(address);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_record(&path).await.map(Some)
    }

    async fn commit(&self, record: &StateRecord) -> Result<()> {
        record.ensure_persistable()?;
        self.ensure_dir().await?;

        let content = serde_json::to_vec_pretty(record).map_err(|e| {
            InfraError::State(StateError::serialization(format!(
                "Failed to serialize {}: {e}",
                record.address
            )))
        })?;

        Self::write_atomic(&self.record_path(&record.address), &content).await?;
        debug!("Committed {}", record.address);
        Ok(())
    }

    async fn remove(&self, address: &ResourceAddress) -> Result<()> {
        match fs::remove_file(self.record_path(address)).await {
            Ok(()) => {
                debug!("Removed {address}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(InfraError::State(StateError::io(format!(
                "Failed to remove {address}: {e}"
            )))),
        }
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock_info = LockInfo::with_ttl(&holder_id, self.lock_ttl);

        for _ in 0..ACQUIRE_ATTEMPTS {
            if self.publish_lock_file(&lock_info).await? {
                info!(
                    "Acquired state lock: {} (expires in {}s)",
                    lock_info.lock_id,
                    lock_info.remaining_secs()
                );
                return Ok(lock_info);
            }

            match self.read_lock_file().await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(InfraError::State(StateError::Locked {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }));
                }
                Some(existing) => {
                    debug!("Expired lock of {} found, taking over", existing.holder);
                    self.discard_expired_lock(&existing).await?;
                }
                None => debug!("Lock released while acquiring, retrying"),
            }
        }

        let holder = self
            .read_lock_file()
            .await?
            .map_or_else(|| String::from("unknown"), |l| l.holder);
        Err(InfraError::State(StateError::Locked {
            holder,
            since: String::from("just now"),
        }))
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let Some(mut lock_info) = self
            .read_lock_file()
            .await?
            .filter(|existing| existing.lock_id == lock_id)
        else {
            return Err(lock_failed(format!("lock {lock_id} is no longer held")));
        };

        lock_info.refresh();
        let temp_path = self.write_lock_temp(&lock_info).await?;
        if let Err(e) = fs::rename(&temp_path, &self.lock_path).await {
            remove_quietly(&temp_path).await;
            return Err(lock_failed(format!("Failed to renew lock file: {e}")));
        }
        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        warn!("Force-removing state lock at {}", self.lock_path.display());
        self.delete_lock_file().await
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Attributes, Value};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());
        (store, temp_dir)
    }

    fn record(address: ResourceAddress) -> StateRecord {
        let mut attrs = Attributes::new();
        attrs.insert("cidr_block".into(), Value::from("10.0.1.0/24"));
        StateRecord::new(address, "subnet-1234", attrs, BTreeSet::new())
    }

    #[tokio::test]
    async fn test_commit_and_load() {
        let (store, temp) = create_test_store();

        let address = ResourceAddress::indexed("subnet", "public", 0);
        store.commit(&record(address.clone())).await.expect("commit");

        assert!(temp.path().join("resources/subnet.public.0.json").exists());

        let loaded = store.load().await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&address].identity, "subnet-1234");
        assert_eq!(
            store.get(&address).await.expect("get").map(|r| r.identity),
            Some(String::from("subnet-1234"))
        );
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();
        assert!(store.load().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn test_leftover_temp_files_are_ignored() {
        let (store, temp) = create_test_store();
        let address = ResourceAddress::new("vpc", "main");
        store.commit(&record(address)).await.expect("commit");

        std::fs::write(temp.path().join("resources/vpc.other.json.tmp"), "{ partial").expect("write");

        let loaded = store.load().await.expect("load");
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, _temp) = create_test_store();
        let address = ResourceAddress::new("vpc", "main");
        store.commit(&record(address.clone())).await.expect("commit");

        store.remove(&address).await.expect("remove");
        store.remove(&address).await.expect("remove twice");
        assert!(store.load().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let other = LocalStateStore::with_base_dir(temp.path());
        let err = other.acquire_lock("holder-2").await.unwrap_err();
        match err {
            InfraError::State(StateError::Locked { holder, .. }) => assert_eq!(holder, "holder-1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_expired_lock_taken_over() {
        let (store, temp) = create_test_store();

        let mut stale = LockInfo::new("crashed-run");
        stale.expires_at = stale.acquired_at - chrono::Duration::seconds(1);
        std::fs::write(
            temp.path().join(LOCK_FILE),
            serde_json::to_string(&stale).expect("serialize"),
        )
        .expect("write");

        let lock = store.acquire_lock("next-run").await.expect("takeover");
        assert_eq!(lock.holder, "next-run");
        assert_eq!(
            store.lock_info().await.expect("info").map(|l| l.holder),
            Some(String::from("next-run"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_yields_one_holder() {
        for _ in 0..50 {
            let (store, temp) = create_test_store();
            let other = LocalStateStore::with_base_dir(temp.path());

            let first = tokio::spawn(async move { store.acquire_lock("holder-1").await });
            let second = tokio::spawn(async move { other.acquire_lock("holder-2").await });
            let results = [
                first.await.expect("join"),
                second.await.expect("join"),
            ];

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            for result in &results {
                if let Err(e) = result {
                    assert!(e.is_locked(), "unexpected error: {e}");
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_takeover_of_expired_lock_yields_one_holder() {
        for _ in 0..50 {
            let (store, temp) = create_test_store();
            let mut stale = LockInfo::new("crashed-run");
            stale.expires_at = stale.acquired_at - chrono::Duration::seconds(1);
            std::fs::write(
                temp.path().join(LOCK_FILE),
                serde_json::to_string(&stale).expect("serialize"),
            )
            .expect("write");

            let other = LocalStateStore::with_base_dir(temp.path());
            let first = tokio::spawn(async move { store.acquire_lock("holder-1").await });
            let second = tokio::spawn(async move { other.acquire_lock("holder-2").await });
            let results = [
                first.await.expect("join"),
                second.await.expect("join"),
            ];

            let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1);
            assert!(results.iter().all(|r| r.as_ref().map_or_else(InfraError::is_locked, |_| true)));

            let current = LocalStateStore::with_base_dir(temp.path())
                .lock_info()
                .await
                .expect("info")
                .expect("held");
            assert_eq!(current.lock_id, winners[0].lock_id);
        }
    }

    #[tokio::test]
    async fn test_renewal_keeps_lock_past_its_ttl() {
        let (store, temp) = create_test_store();
        let store = store.with_lock_ttl(Duration::from_millis(300));
        let lock = store.acquire_lock("holder-1").await.expect("lock");

        tokio::time::sleep(Duration::from_millis(200)).await;
        store.renew_lock(&lock.lock_id).await.expect("renew");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let other = LocalStateStore::with_base_dir(temp.path());
        assert!(other.acquire_lock("holder-2").await.unwrap_err().is_locked());
        assert!(store.renew_lock("not-the-lock").await.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let taken = other.acquire_lock("holder-2").await.expect("takeover after expiry");
        assert!(store.renew_lock(&lock.lock_id).await.is_err());
        assert_eq!(taken.holder, "holder-2");
    }

    #[tokio::test]
    async fn test_lock_temp_files_are_cleaned_up() {
        let (store, temp) = create_test_store();
        let lock = store.acquire_lock("holder-1").await.expect("lock");
        let other = LocalStateStore::with_base_dir(temp.path());
        assert!(other.acquire_lock("holder-2").await.is_err());
        store.renew_lock(&lock.lock_id).await.expect("renew");

        let names: Vec<String> = std::fs::read_dir(temp.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![String::from(LOCK_FILE)]);
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let (store, _temp) = create_test_store();
        let _lock = store.acquire_lock("holder").await.expect("lock");
        store.force_unlock().await.expect("force");
        assert!(store.lock_info().await.expect("info").is_none());
    }
}
