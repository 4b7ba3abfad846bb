//! Durable persistence for the cache and the mutation queue.
//!
//! The adapter has no opinion on what it stores: it serializes the
//! cache's value map, its timestamp index, and the queue array to
//! three well-known keys on a [`StorageBackend`], and restores them on
//! startup. Quota failures trigger an eviction-and-retry; corrupted
//! data triggers a full discard of all three keys rather than risking
//! inconsistent partial state.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::cache::CacheStore;
use crate::queue::{MutationQueue, QueuedOperation};

/// Storage key holding the cache value map.
pub const CACHE_KEY: &str = "flow_cache_data";
/// Storage key holding the cache timestamp index.
pub const TIMESTAMP_KEY: &str = "flow_cache_timestamps";
/// Storage key holding the mutation queue array.
pub const QUEUE_KEY: &str = "flow_offline_queue";

/// Fraction of cache entries evicted when the backend reports a quota
/// failure, before the single retry.
const QUOTA_EVICTION_FRACTION: f64 = 0.2;

/// Errors from the storage backend or (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend is out of space.
    #[error("storage quota exceeded")]
    QuotaExceeded,
    /// An I/O error from the backing store.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted data could not be parsed.
    #[error("corrupt persisted data under {0}")]
    Corrupt(String),
    /// A value could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable string-keyed storage, the local-storage analog.
pub trait StorageBackend: Send + Sync {
    /// Read the value under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the backend cannot be read.
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QuotaExceeded`] when out of space, or
    /// [`StorageError::Io`] on other failures.
    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the backend cannot be written.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Filesystem backend: one JSON file per key in a data directory.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create a backend rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        match std::fs::write(self.path_for(key), value) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::StorageFull => {
                Err(StorageError::QuotaExceeded)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory backend with an optional byte quota, for tests and
/// ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: HashMap<String, String>,
    /// Total stored bytes above which writes fail with a quota error.
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    /// Create an unbounded in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that rejects writes once total stored bytes
    /// would exceed `quota_bytes`.
    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            map: HashMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Raise or remove the quota (used to simulate space being freed).
    pub fn set_quota(&mut self, quota_bytes: Option<usize>) {
        self.quota_bytes = quota_bytes;
    }

    fn stored_bytes_excluding(&self, key: &str) -> usize {
        self.map
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.map.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota_bytes {
            let projected = self.stored_bytes_excluding(key) + key.len() + value.len();
            if projected > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.map.remove(key);
        Ok(())
    }
}

/// State recovered from storage on startup.
#[derive(Debug, Default)]
pub struct LoadedState {
    /// Cache value map keyed by composite `category:docId` keys.
    pub cache_values: HashMap<String, Value>,
    /// Cache timestamp index under the same keys.
    pub timestamps: HashMap<String, u64>,
    /// Pending queue operations in replay order.
    pub queue: Vec<QueuedOperation>,
}

/// Serializes cache and queue state to a [`StorageBackend`].
pub struct PersistenceAdapter {
    backend: Box<dyn StorageBackend>,
}

impl PersistenceAdapter {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Persist the cache snapshot and the queue.
    ///
    /// On a quota failure the oldest ~20% of cache entries are evicted
    /// and the save is retried once; if the retry also fails the cycle
    /// is logged and abandoned, never fatal to the application.
    ///
    /// # Errors
    ///
    /// Returns the final [`StorageError`] after the retry path is
    /// exhausted; callers treat this as a skipped cycle.
    pub fn save(
        &mut self,
        cache: &mut CacheStore,
        queue: &MutationQueue,
    ) -> Result<(), StorageError> {
        match self.write_all(cache, queue) {
            Ok(()) => Ok(()),
            Err(StorageError::QuotaExceeded) => {
                let evicted = cache.evict_oldest_fraction(QUOTA_EVICTION_FRACTION);
                tracing::warn!(evicted, "storage quota exceeded, evicted oldest entries and retrying");
                self.write_all(cache, queue).map_err(|e| {
                    tracing::warn!(error = %e, "persistence retry failed, giving up for this cycle");
                    e
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "persistence failed");
                Err(e)
            }
        }
    }

    /// Persist only the queue. Queue durability is immediate and never
    /// debounced: a lost mutation is unacceptable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the queue cannot be written.
    pub fn save_queue(&mut self, queue: &MutationQueue) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(&queue.snapshot())?;
        self.backend.write(QUEUE_KEY, &encoded)
    }

    fn write_all(
        &mut self,
        cache: &CacheStore,
        queue: &MutationQueue,
    ) -> Result<(), StorageError> {
        let (values, timestamps) = cache.snapshot();
        self.backend
            .write(CACHE_KEY, &serde_json::to_string(&values)?)?;
        self.backend
            .write(TIMESTAMP_KEY, &serde_json::to_string(&timestamps)?)?;
        self.backend
            .write(QUEUE_KEY, &serde_json::to_string(&queue.snapshot())?)?;
        Ok(())
    }

    /// Restore persisted state.
    ///
    /// Any parse failure discards all three keys and starts clean;
    /// partial state would be worse than no state.
    #[must_use]
    pub fn load(&mut self) -> LoadedState {
        match self.try_load() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "discarding corrupted persisted state");
                self.clear();
                LoadedState::default()
            }
        }
    }

    fn try_load(&self) -> Result<LoadedState, StorageError> {
        let cache_values = match self.backend.read(CACHE_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|_| StorageError::Corrupt(CACHE_KEY.to_string()))?,
            None => HashMap::new(),
        };
        let timestamps = match self.backend.read(TIMESTAMP_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|_| StorageError::Corrupt(TIMESTAMP_KEY.to_string()))?,
            None => HashMap::new(),
        };
        let queue = match self.backend.read(QUEUE_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|_| StorageError::Corrupt(QUEUE_KEY.to_string()))?,
            None => Vec::new(),
        };
        Ok(LoadedState {
            cache_values,
            timestamps,
            queue,
        })
    }

    /// Remove all three persisted keys, best effort.
    pub fn clear(&mut self) {
        for key in [CACHE_KEY, TIMESTAMP_KEY, QUEUE_KEY] {
            if let Err(e) = self.backend.remove(key) {
                tracing::warn!(key, error = %e, "failed to remove persisted key");
            }
        }
    }
}

impl std::fmt::Debug for PersistenceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceAdapter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::queue::QueuedOperation;
    use serde_json::json;

    fn populated_state() -> (CacheStore, MutationQueue) {
        let mut cache = CacheStore::new();
        cache.set(Category::Profile, "u1", json!({"name": "Alice"}));
        cache.set(Category::Applications, "a1", json!({"status": "draft"}));
        let mut queue = MutationQueue::new();
        queue.enqueue(QueuedOperation::update(
            Category::Applications,
            "a1",
            json!({"status": "submitted"}),
        ));
        (cache, queue)
    }

    #[test]
    fn test_save_load_round_trip_memory() {
        let (mut cache, queue) = populated_state();
        let mut adapter = PersistenceAdapter::new(Box::new(MemoryBackend::new()));
        adapter.save(&mut cache, &queue).expect("save");

        let loaded = adapter.load();
        assert_eq!(loaded.cache_values.len(), 2);
        assert_eq!(loaded.timestamps.len(), 2);
        assert_eq!(loaded.queue.len(), 1);

        let mut restored = CacheStore::new();
        restored.restore(loaded.cache_values, &loaded.timestamps);
        assert!(restored.has(Category::Profile, "u1"));
    }

    #[test]
    fn test_save_load_round_trip_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut cache, queue) = populated_state();
        let backend = FileBackend::new(dir.path()).expect("backend");
        let mut adapter = PersistenceAdapter::new(Box::new(backend));
        adapter.save(&mut cache, &queue).expect("save");

        // Fresh adapter over the same directory sees the state.
        let backend2 = FileBackend::new(dir.path()).expect("backend2");
        let mut adapter2 = PersistenceAdapter::new(Box::new(backend2));
        let loaded = adapter2.load();
        assert_eq!(loaded.cache_values.len(), 2);
        assert_eq!(loaded.queue.len(), 1);
    }

    #[test]
    fn test_load_empty_storage_starts_clean() {
        let mut adapter = PersistenceAdapter::new(Box::new(MemoryBackend::new()));
        let loaded = adapter.load();
        assert!(loaded.cache_values.is_empty());
        assert!(loaded.timestamps.is_empty());
        assert!(loaded.queue.is_empty());
    }

    #[test]
    fn test_corrupt_data_discards_all_three_keys() {
        let mut backend = MemoryBackend::new();
        backend.write(CACHE_KEY, "{\"ok\": true}").expect("write");
        backend.write(TIMESTAMP_KEY, "not json at all").expect("write");
        backend
            .write(QUEUE_KEY, "[]")
            .expect("write");
        let mut adapter = PersistenceAdapter::new(Box::new(backend));

        let loaded = adapter.load();
        assert!(loaded.cache_values.is_empty());
        assert!(loaded.queue.is_empty());
        // All three keys were removed, so a second load is clean too.
        let again = adapter.load();
        assert!(again.cache_values.is_empty());
    }

    #[test]
    fn test_quota_exceeded_evicts_and_retries() {
        let mut cache = CacheStore::new();
        for i in 0..20 {
            cache.set(Category::Generic, &format!("g{i}"), json!("x".repeat(64)));
        }
        let queue = MutationQueue::new();

        // Quota large enough to hold the state only after a 20% eviction.
        let serialized = serde_json::to_string(&cache.snapshot().0).expect("encode");
        let quota = serialized.len() + 300;
        let mut adapter = PersistenceAdapter::new(Box::new(MemoryBackend::with_quota(quota)));

        let before = cache.len();
        let result = adapter.save(&mut cache, &queue);
        assert!(result.is_ok(), "retry after eviction should fit: {result:?}");
        assert_eq!(cache.len(), before - 4, "20% of 20 entries evicted");
    }

    #[test]
    fn test_quota_retry_failure_gives_up_without_panic() {
        let (mut cache, queue) = populated_state();
        // Quota too small for anything; both attempts fail.
        let mut adapter = PersistenceAdapter::new(Box::new(MemoryBackend::with_quota(4)));
        let result = adapter.save(&mut cache, &queue);
        assert!(matches!(result, Err(StorageError::QuotaExceeded)));
    }

    #[test]
    fn test_save_queue_alone() {
        let mut queue = MutationQueue::new();
        queue.enqueue(QueuedOperation::delete(Category::Messages, "m1"));
        let mut adapter = PersistenceAdapter::new(Box::new(MemoryBackend::new()));
        adapter.save_queue(&queue).expect("save queue");

        let loaded = adapter.load();
        assert_eq!(loaded.queue.len(), 1);
        assert!(loaded.cache_values.is_empty());
    }

    #[test]
    fn test_file_backend_missing_key_reads_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path()).expect("backend");
        assert!(backend.read("absent").expect("read").is_none());
    }
}
