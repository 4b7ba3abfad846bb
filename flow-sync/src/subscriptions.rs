//! Live subscription management.
//!
//! One server listener per subscription key: opening a key that is
//! already live detaches the old listener first. Every change batch is
//! written through to the cache before the [`SyncEvent::CategoryUpdated`]
//! event goes out, so an event consumer reading the cache always sees
//! at least the batch it was told about.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use flow_core::{CacheStore, Category, Document};
use serde_json::json;

use crate::connectivity::ConnectivityMonitor;
use crate::events::{DocumentDelta, EventBus, SyncEvent};
use crate::remote::{
    AuthSession, ChangeBatch, DetachHandle, RemoteError, RemoteStore, Role, SubscriptionRequest,
};

/// Identity of one live listener.
///
/// Two subscriptions on the same category differ only by scope, so the
/// owner id (and the optional secondary scope, e.g. an institution id)
/// is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    /// Collection being listened on.
    pub category: Category,
    /// Owning user id.
    pub owner_id: String,
    /// Secondary scope, such as an institution id.
    pub secondary: Option<String>,
}

impl SubscriptionKey {
    /// A plain owner-scoped key.
    #[must_use]
    pub fn new(category: Category, owner_id: impl Into<String>) -> Self {
        Self {
            category,
            owner_id: owner_id.into(),
            secondary: None,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.secondary {
            Some(secondary) => write!(f, "{}:{}:{}", self.category, self.owner_id, secondary),
            None => write!(f, "{}:{}", self.category, self.owner_id),
        }
    }
}

struct ActiveSubscription {
    detach: DetachHandle,
    pump: tokio::task::JoinHandle<()>,
}

/// Owns every live listener and its pump task.
pub struct SubscriptionManager {
    cache: Arc<RwLock<CacheStore>>,
    monitor: ConnectivityMonitor,
    bus: EventBus,
    active: Mutex<HashMap<SubscriptionKey, ActiveSubscription>>,
}

impl SubscriptionManager {
    /// Create a manager over the shared cache.
    #[must_use]
    pub fn new(cache: Arc<RwLock<CacheStore>>, monitor: ConnectivityMonitor, bus: EventBus) -> Self {
        Self {
            cache,
            monitor,
            bus,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or replace) the listener for `key`.
    ///
    /// If a listener for the key is already live it is detached first,
    /// so at most one server-side listener exists per key.
    ///
    /// # Errors
    ///
    /// Returns the [`RemoteError`] from opening the listener; an error
    /// detaching the previous listener is logged, not propagated.
    pub async fn subscribe(
        &self,
        remote: &dyn RemoteStore,
        key: SubscriptionKey,
        request: SubscriptionRequest,
    ) -> Result<(), RemoteError> {
        self.detach_key(&key);

        let subscription = remote.subscribe(request).await?;
        tracing::debug!(key = %key, "subscription opened");

        let pump = spawn_pump(
            key.clone(),
            subscription.batches,
            Arc::clone(&self.cache),
            self.monitor.clone(),
            self.bus.clone(),
        );
        let mut active = self.lock_active();
        active.insert(
            key,
            ActiveSubscription {
                detach: subscription.detach,
                pump,
            },
        );
        Ok(())
    }

    /// Open every listener the session's role calls for: the shared
    /// categories plus the role's own data categories.
    ///
    /// Institution sessions scope their data listeners by institution
    /// id when one is present.
    ///
    /// # Errors
    ///
    /// Returns the first [`RemoteError`] encountered; listeners opened
    /// before the failure stay live.
    pub async fn open_for_session(
        &self,
        remote: &dyn RemoteStore,
        session: &AuthSession,
    ) -> Result<(), RemoteError> {
        for category in Role::SHARED_CATEGORIES {
            let key = SubscriptionKey::new(category, &session.user_id);
            let request = SubscriptionRequest::new(category, &session.user_id);
            self.subscribe(remote, key, request).await?;
        }
        for &category in session.role.data_categories() {
            let mut key = SubscriptionKey::new(category, &session.user_id);
            let mut request = SubscriptionRequest::new(category, &session.user_id);
            if session.role == Role::Institution {
                if let Some(institution_id) = &session.institution_id {
                    key.secondary = Some(institution_id.clone());
                    request = request.with_filter("institutionId", json!(institution_id));
                }
            }
            self.subscribe(remote, key, request).await?;
        }
        Ok(())
    }

    /// Detach the listener for `key`, if live.
    pub fn detach_key(&self, key: &SubscriptionKey) {
        let existing = self.lock_active().remove(key);
        if let Some(mut subscription) = existing {
            subscription.pump.abort();
            if let Err(e) = subscription.detach.detach() {
                tracing::warn!(key = %key, "detach failed: {e}");
            } else {
                tracing::debug!(key = %key, "subscription detached");
            }
        }
    }

    /// Detach every live listener (sign-out and shutdown).
    ///
    /// Detach failures are logged and skipped; one broken listener
    /// never blocks tearing down the rest.
    pub fn cleanup_all(&self) {
        let drained: Vec<(SubscriptionKey, ActiveSubscription)> =
            self.lock_active().drain().collect();
        let count = drained.len();
        for (key, mut subscription) in drained {
            subscription.pump.abort();
            if let Err(e) = subscription.detach.detach() {
                tracing::warn!(key = %key, "detach failed during cleanup: {e}");
            }
        }
        if count > 0 {
            tracing::info!(count, "detached all live subscriptions");
        }
    }

    /// Number of live listeners.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock_active().len()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionKey, ActiveSubscription>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}

/// Receive batches for one key until the sender drops.
fn spawn_pump(
    key: SubscriptionKey,
    mut batches: tokio::sync::mpsc::Receiver<ChangeBatch>,
    cache: Arc<RwLock<CacheStore>>,
    monitor: ConnectivityMonitor,
    bus: EventBus,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // Previous batch's documents, for delta computation.
        let mut last: HashMap<String, serde_json::Value> = HashMap::new();
        while let Some(batch) = batches.recv().await {
            if let Some(error) = batch.error {
                tracing::warn!(key = %key, error = %error, "subscription stream error");
                monitor.note_stream_error();
                bus.emit(SyncEvent::CategoryUpdated {
                    category: key.category,
                    documents: Vec::new(),
                    delta: DocumentDelta::default(),
                    error: Some(error),
                });
                continue;
            }
            monitor.note_stream_recovered();

            let delta = compute_delta(&last, &batch.documents);
            last = batch
                .documents
                .iter()
                .map(|doc| (doc.id.clone(), doc.data.clone()))
                .collect();

            // Cache write-through happens before the event goes out.
            {
                let mut cache = cache.write().unwrap_or_else(PoisonError::into_inner);
                for doc in &batch.documents {
                    cache.set(key.category, &doc.id, doc.data.clone());
                }
                for removed_id in &delta.removed {
                    cache.delete(key.category, removed_id);
                }
            }

            if !delta.is_empty() {
                tracing::debug!(
                    key = %key,
                    added = delta.added.len(),
                    modified = delta.modified.len(),
                    removed = delta.removed.len(),
                    "subscription batch applied"
                );
            }
            bus.emit(SyncEvent::CategoryUpdated {
                category: key.category,
                documents: batch.documents,
                delta,
                error: None,
            });
        }
        tracing::debug!(key = %key, "subscription stream ended");
    })
}

/// Diff the current batch against the previous one.
fn compute_delta(last: &HashMap<String, serde_json::Value>, current: &[Document]) -> DocumentDelta {
    let mut delta = DocumentDelta::default();
    for doc in current {
        match last.get(&doc.id) {
            None => delta.added.push(doc.clone()),
            Some(previous) if *previous != doc.data => delta.modified.push(doc.clone()),
            Some(_) => {}
        }
    }
    let current_ids: std::collections::HashSet<&str> =
        current.iter().map(|doc| doc.id.as_str()).collect();
    delta.removed = last
        .keys()
        .filter(|id| !current_ids.contains(id.as_str()))
        .cloned()
        .collect();
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delta_added_modified_removed() {
        let mut last = HashMap::new();
        last.insert("a".to_string(), json!(1));
        last.insert("b".to_string(), json!(2));

        let current = vec![
            Document::new("a", json!(1)),
            Document::new("c", json!(3)),
        ];
        let delta = compute_delta(&last, &current);
        assert!(delta.added.iter().any(|d| d.id == "c"));
        assert!(delta.modified.is_empty());
        assert_eq!(delta.removed, vec!["b".to_string()]);

        let current = vec![Document::new("a", json!(99))];
        let delta = compute_delta(&last, &current);
        assert!(delta.modified.iter().any(|d| d.id == "a"));
    }

    #[test]
    fn test_delta_empty_when_unchanged() {
        let mut last = HashMap::new();
        last.insert("a".to_string(), json!({"x": 1}));
        let current = vec![Document::new("a", json!({"x": 1}))];
        assert!(compute_delta(&last, &current).is_empty());
    }

    #[test]
    fn test_key_display_includes_secondary() {
        let mut key = SubscriptionKey::new(Category::Applications, "u1");
        assert_eq!(key.to_string(), "applications:u1");
        key.secondary = Some("inst-1".to_string());
        assert_eq!(key.to_string(), "applications:u1:inst-1");
    }
}
