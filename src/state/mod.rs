//! State management module.
//!
//! This module provides persistent state storage for applied resources:
//! one record per resource instance, plus an advisory lock that serializes
//! runs sharing a store.

mod local;
mod lock;
mod memory;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{
    DEFAULT_LOCK_TTL, LOCK_EXPIRY_SECS, LockGuard, LockInfo, acquire_lock_with_timeout,
    generate_holder_id,
};
pub use memory::MemoryStateStore;
pub use store::StateStore;
pub use types::{STATE_VERSION, StateRecord, StateSnapshot, state_digest};
