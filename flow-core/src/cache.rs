//! Time-stamped key-value cache for server documents.
//!
//! Entries are scoped by [`Category`] and expire per the category's
//! TTL table. Freshness is a hard contract: [`CacheStore::get`] never
//! returns an expired value, it evicts it and reports a miss.

use std::collections::HashMap;

use serde_json::Value;

use crate::category::{Category, AGGREGATE_CAP_FACTOR, PER_CATEGORY_CAP};
use crate::document::{composite_key, split_key};
use crate::now_ms;

/// A single cached value with its capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Opaque document payload.
    pub value: Value,
    /// Capture time, epoch milliseconds.
    pub timestamp: u64,
}

/// Per-category and aggregate cache counts, for UI inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total live entries across all categories.
    pub total: usize,
    /// Live entry count per category.
    pub per_category: HashMap<Category, usize>,
}

/// Collection-scoped map from document key to timestamped value.
///
/// One instance is owned by the sync context; there are no module-level
/// globals, so teardown and multi-instance tests stay clean.
#[derive(Debug)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    per_category_cap: usize,
    /// Set on every mutation, consumed by the debounced persistence cycle.
    dirty: bool,
}

impl CacheStore {
    /// Create an empty store with the default per-category cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_per_category_cap(PER_CATEGORY_CAP)
    }

    /// Create an empty store with a custom per-category cap.
    #[must_use]
    pub fn with_per_category_cap(cap: usize) -> Self {
        Self {
            entries: HashMap::new(),
            per_category_cap: cap.max(1),
            dirty: false,
        }
    }

    /// Store `value` under `category:doc_id` with the current timestamp.
    ///
    /// Overwrites any previous entry for the key and enforces the
    /// two-tier size policy (per-category cap, then the aggregate cap
    /// at [`AGGREGATE_CAP_FACTOR`]× per category).
    pub fn set(&mut self, category: Category, doc_id: &str, value: Value) {
        self.set_at(category, doc_id, value, now_ms());
    }

    fn set_at(&mut self, category: Category, doc_id: &str, value: Value, timestamp: u64) {
        let key = composite_key(category, doc_id);
        self.entries.insert(key, CacheEntry { value, timestamp });
        self.enforce_category_cap(category);
        self.enforce_aggregate_cap();
        self.dirty = true;
    }

    /// Get a fresh value, or evict the stale entry and report a miss.
    pub fn get(&mut self, category: Category, doc_id: &str) -> Option<Value> {
        self.get_at(category, doc_id, now_ms())
    }

    fn get_at(&mut self, category: Category, doc_id: &str, now: u64) -> Option<Value> {
        let key = composite_key(category, doc_id);
        let entry = self.entries.get(&key)?;
        if expired(entry.timestamp, category, now) {
            tracing::debug!(key = %key, "evicting expired cache entry on read");
            self.entries.remove(&key);
            self.dirty = true;
            return None;
        }
        Some(entry.value.clone())
    }

    /// Whether a fresh entry exists for the key. Pure; never evicts.
    #[must_use]
    pub fn has(&self, category: Category, doc_id: &str) -> bool {
        let key = composite_key(category, doc_id);
        self.entries
            .get(&key)
            .is_some_and(|e| !expired(e.timestamp, category, now_ms()))
    }

    /// Whether an entry exists for the key but has passed its TTL.
    #[must_use]
    pub fn is_expired(&self, category: Category, doc_id: &str) -> bool {
        let key = composite_key(category, doc_id);
        self.entries
            .get(&key)
            .is_some_and(|e| expired(e.timestamp, category, now_ms()))
    }

    /// Remove a single entry. Returns whether it existed.
    pub fn delete(&mut self, category: Category, doc_id: &str) -> bool {
        let key = composite_key(category, doc_id);
        let removed = self.entries.remove(&key).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Remove every entry in a category. Returns how many were removed.
    pub fn clear_category(&mut self, category: Category) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| split_key(key).0 != category);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Remove every entry in user-scoped categories (the sign-out path).
    ///
    /// Shared data such as program listings stays cached.
    pub fn clear_user_scoped(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !split_key(key).0.user_scoped());
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::info!(removed, "cleared user-scoped cache entries");
            self.dirty = true;
        }
        removed
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    /// Drop every entry past its TTL. Returns how many were removed.
    pub fn sweep_expired(&mut self) -> usize {
        let now = now_ms();
        let before = self.entries.len();
        self.entries
            .retain(|key, entry| !expired(entry.timestamp, split_key(key).0, now));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "TTL sweep removed entries");
            self.dirty = true;
        }
        removed
    }

    /// Evict the oldest `fraction` of entries across all categories.
    ///
    /// Used by the persistence adapter when the backing storage
    /// reports a quota failure. Returns how many entries were evicted.
    pub fn evict_oldest_fraction(&mut self, fraction: f64) -> usize {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        #[allow(clippy::cast_precision_loss)]
        let target = ((self.entries.len() as f64) * fraction.clamp(0.0, 1.0)).ceil() as usize;
        if target == 0 {
            return 0;
        }
        let mut keys: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.timestamp))
            .collect();
        keys.sort_by_key(|(_, ts)| *ts);
        for (key, _) in keys.into_iter().take(target) {
            self.entries.remove(&key);
        }
        self.dirty = true;
        target
    }

    /// Total live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entry count for one category.
    #[must_use]
    pub fn category_len(&self, category: Category) -> usize {
        self.entries
            .keys()
            .filter(|key| split_key(key).0 == category)
            .count()
    }

    /// Counts for the UI layer.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut per_category: HashMap<Category, usize> = HashMap::new();
        for key in self.entries.keys() {
            *per_category.entry(split_key(key).0).or_default() += 1;
        }
        CacheStats {
            total: self.entries.len(),
            per_category,
        }
    }

    /// Consume the dirty flag; true means a mutation happened since the
    /// last persistence cycle.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// The persisted representation: value map and timestamp index,
    /// both keyed by the composite `category:docId` key.
    #[must_use]
    pub fn snapshot(&self) -> (HashMap<String, Value>, HashMap<String, u64>) {
        let mut values = HashMap::with_capacity(self.entries.len());
        let mut timestamps = HashMap::with_capacity(self.entries.len());
        for (key, entry) in &self.entries {
            values.insert(key.clone(), entry.value.clone());
            timestamps.insert(key.clone(), entry.timestamp);
        }
        (values, timestamps)
    }

    /// Rebuild the store from a persisted snapshot.
    ///
    /// Values without a matching timestamp are dropped rather than
    /// admitted with a fabricated capture time.
    pub fn restore(&mut self, values: HashMap<String, Value>, timestamps: &HashMap<String, u64>) {
        self.entries.clear();
        for (key, value) in values {
            if let Some(&timestamp) = timestamps.get(&key) {
                self.entries.insert(key, CacheEntry { value, timestamp });
            } else {
                tracing::warn!(key = %key, "dropping restored entry without timestamp");
            }
        }
        self.dirty = false;
    }

    /// Drop the oldest entries in `category` until it is at the cap.
    fn enforce_category_cap(&mut self, category: Category) {
        let mut in_category: Vec<(String, u64)> = self
            .entries
            .iter()
            .filter(|(key, _)| split_key(key).0 == category)
            .map(|(key, entry)| (key.clone(), entry.timestamp))
            .collect();
        if in_category.len() <= self.per_category_cap {
            return;
        }
        in_category.sort_by_key(|(_, ts)| *ts);
        let excess = in_category.len() - self.per_category_cap;
        for (key, _) in in_category.into_iter().take(excess) {
            tracing::debug!(key = %key, %category, "size eviction");
            self.entries.remove(&key);
        }
    }

    /// Second tier: bound the whole store at `cap × AGGREGATE_CAP_FACTOR`.
    fn enforce_aggregate_cap(&mut self) {
        let aggregate_cap = self.per_category_cap * AGGREGATE_CAP_FACTOR;
        if self.entries.len() <= aggregate_cap {
            return;
        }
        let mut keys: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.timestamp))
            .collect();
        keys.sort_by_key(|(_, ts)| *ts);
        let excess = keys.len() - aggregate_cap;
        for (key, _) in keys.into_iter().take(excess) {
            self.entries.remove(&key);
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

/// TTL check against the category policy table.
const fn expired(timestamp: u64, category: Category, now: u64) -> bool {
    now.saturating_sub(timestamp) > category.max_age_ms()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_fresh() {
        let mut cache = CacheStore::new();
        cache.set(Category::Profile, "u1", json!({"name": "Alice"}));
        assert_eq!(
            cache.get(Category::Profile, "u1"),
            Some(json!({"name": "Alice"}))
        );
        assert!(cache.has(Category::Profile, "u1"));
    }

    #[test]
    fn test_get_is_category_scoped() {
        let mut cache = CacheStore::new();
        cache.set(Category::Profile, "u1", json!(1));
        assert_eq!(cache.get(Category::Messages, "u1"), None);
    }

    #[test]
    fn test_stale_read_rejected_and_entry_removed() {
        let mut cache = CacheStore::new();
        let now = now_ms();
        let stale = now - Category::Profile.max_age_ms() - 1;
        cache.set_at(Category::Profile, "u1", json!({"name": "Alice"}), stale);

        assert_eq!(cache.get_at(Category::Profile, "u1", now), None);
        // The stale entry is gone from the underlying store too.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_entry_valid_exactly_at_max_age() {
        let mut cache = CacheStore::new();
        let now = now_ms();
        let at_boundary = now - Category::Messages.max_age_ms();
        cache.set_at(Category::Messages, "m1", json!("hi"), at_boundary);
        // now - timestamp == max_age is still valid per the TTL invariant.
        assert_eq!(cache.get_at(Category::Messages, "m1", now), Some(json!("hi")));
    }

    #[test]
    fn test_is_expired_predicate() {
        let mut cache = CacheStore::new();
        let stale = now_ms() - Category::Messages.max_age_ms() - 1;
        cache.set_at(Category::Messages, "m1", json!("old"), stale);
        assert!(cache.is_expired(Category::Messages, "m1"));
        assert!(!cache.has(Category::Messages, "m1"));
        // Unknown keys are neither present nor expired.
        assert!(!cache.is_expired(Category::Messages, "m2"));
    }

    #[test]
    fn test_delete_and_clear() {
        let mut cache = CacheStore::new();
        cache.set(Category::Programs, "p1", json!(1));
        cache.set(Category::Programs, "p2", json!(2));
        assert!(cache.delete(Category::Programs, "p1"));
        assert!(!cache.delete(Category::Programs, "p1"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_under_pressure_keeps_newest() {
        let mut cache = CacheStore::with_per_category_cap(3);
        let base = now_ms();
        for i in 0..5_u64 {
            cache.set_at(
                Category::Messages,
                &format!("m{i}"),
                json!(i),
                base + i,
            );
        }
        assert_eq!(cache.category_len(Category::Messages), 3);
        // Oldest-by-timestamp entries m0 and m1 are the ones removed.
        assert!(!cache.has(Category::Messages, "m0"));
        assert!(!cache.has(Category::Messages, "m1"));
        assert!(cache.has(Category::Messages, "m4"));
    }

    #[test]
    fn test_eviction_is_per_category() {
        let mut cache = CacheStore::with_per_category_cap(2);
        let base = now_ms();
        cache.set_at(Category::Messages, "m1", json!(1), base);
        cache.set_at(Category::Programs, "p1", json!(1), base + 1);
        cache.set_at(Category::Messages, "m2", json!(2), base + 2);
        cache.set_at(Category::Messages, "m3", json!(3), base + 3);
        // Messages evicted down to 2; programs untouched.
        assert_eq!(cache.category_len(Category::Messages), 2);
        assert!(cache.has(Category::Programs, "p1"));
    }

    #[test]
    fn test_aggregate_cap_second_tier() {
        // cap 1 → aggregate cap 10; fill 11 distinct categories with
        // one entry each and the oldest overall goes.
        let mut cache = CacheStore::with_per_category_cap(1);
        let base = now_ms();
        for (i, category) in Category::ALL.iter().enumerate() {
            cache.set_at(*category, "only", json!(i), base + i as u64);
        }
        assert_eq!(cache.len(), 10);
        assert!(!cache.has(Category::Profile, "only"));
    }

    #[test]
    fn test_logout_clears_user_scoped_only() {
        let mut cache = CacheStore::new();
        cache.set(Category::Profile, "u1", json!({"name": "Alice"}));
        cache.set(Category::Applications, "a1", json!({"status": "draft"}));
        cache.set(Category::Messages, "m1", json!("hello"));
        cache.set(Category::Programs, "p1", json!({"title": "CS"}));

        let removed = cache.clear_user_scoped();
        assert_eq!(removed, 3);
        assert!(!cache.has(Category::Profile, "u1"));
        assert!(!cache.has(Category::Applications, "a1"));
        assert!(!cache.has(Category::Messages, "m1"));
        assert!(cache.has(Category::Programs, "p1"));
    }

    #[test]
    fn test_sweep_expired() {
        let mut cache = CacheStore::new();
        let now = now_ms();
        cache.set_at(Category::Messages, "old", json!(1), now - Category::Messages.max_age_ms() - 5);
        cache.set_at(Category::Messages, "new", json!(2), now);
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_oldest_fraction() {
        let mut cache = CacheStore::new();
        let base = now_ms();
        for i in 0..10_u64 {
            cache.set_at(Category::Generic, &format!("g{i}"), json!(i), base + i);
        }
        let evicted = cache.evict_oldest_fraction(0.2);
        assert_eq!(evicted, 2);
        assert!(!cache.has(Category::Generic, "g0"));
        assert!(!cache.has(Category::Generic, "g1"));
        assert!(cache.has(Category::Generic, "g9"));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut cache = CacheStore::new();
        cache.set(Category::Profile, "u1", json!({"name": "Alice"}));
        cache.set(Category::Programs, "p1", json!({"title": "CS"}));
        let (values, timestamps) = cache.snapshot();

        let mut restored = CacheStore::new();
        restored.restore(values, &timestamps);
        assert_eq!(restored.len(), 2);
        assert!(restored.has(Category::Profile, "u1"));
    }

    #[test]
    fn test_restore_drops_values_without_timestamp() {
        let mut cache = CacheStore::new();
        let mut values = HashMap::new();
        values.insert("profile:u1".to_string(), json!(1));
        values.insert("profile:u2".to_string(), json!(2));
        let mut timestamps = HashMap::new();
        timestamps.insert("profile:u1".to_string(), now_ms());
        cache.restore(values, &timestamps);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_dirty_flag_tracks_mutation() {
        let mut cache = CacheStore::new();
        assert!(!cache.take_dirty());
        cache.set(Category::Profile, "u1", json!(1));
        assert!(cache.take_dirty());
        assert!(!cache.take_dirty());
    }

    #[test]
    fn test_last_write_wins_on_same_key() {
        let mut cache = CacheStore::new();
        cache.set(Category::Profile, "u1", json!("first"));
        cache.set(Category::Profile, "u1", json!("second"));
        assert_eq!(cache.get(Category::Profile, "u1"), Some(json!("second")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stats() {
        let mut cache = CacheStore::new();
        cache.set(Category::Messages, "m1", json!(1));
        cache.set(Category::Messages, "m2", json!(2));
        cache.set(Category::Programs, "p1", json!(3));
        let stats = cache.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.per_category.get(&Category::Messages), Some(&2));
        assert_eq!(stats.per_category.get(&Category::Programs), Some(&1));
    }
}
