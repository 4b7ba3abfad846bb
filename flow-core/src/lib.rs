//! # Flow Offline Core
//!
//! Core data structures for the Flow portal's offline layer: the
//! document cache, the offline mutation queue, the persistence
//! adapter, and conflict resolution. This crate is deliberately free
//! of any async runtime so it can be embedded anywhere; the async
//! coordination lives in `flow-sync`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 flow-core                   │
//! ├─────────────────────────────────────────────┤
//! │  CacheStore      │  MutationQueue           │
//! │  - TTL policy    │  - FIFO replay order     │
//! │  - size eviction │  - bounded retries       │
//! ├─────────────────────────────────────────────┤
//! │  PersistenceAdapter  │  Conflict resolution │
//! │  - cache + queue     │  - last-write-wins   │
//! │  - quota recovery    │  - merge / manual    │
//! └─────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod category;
pub mod conflict;
pub mod document;
pub mod persist;
pub mod queue;

pub use cache::{CacheStats, CacheStore};
pub use category::Category;
pub use conflict::{detect_conflict, resolve, ConflictStrategy, Resolution};
pub use document::{updated_at_ms, Document};
pub use persist::{
    FileBackend, LoadedState, MemoryBackend, PersistenceAdapter, StorageBackend, StorageError,
};
pub use queue::{FailureDisposition, MutationQueue, OperationKind, QueuedOperation, MAX_ATTEMPTS};

/// Flow core version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the current Unix timestamp in milliseconds.
#[must_use]
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| {
            // Timestamp will not exceed u64 max for millennia
            #[allow(clippy::cast_possible_truncation)]
            {
                d.as_millis() as u64
            }
        })
}
