//! Sync engine.
//!
//! Owns the status machine, the offline queue drain, conflict
//! reconciliation, the consistency-check and debounced persistence
//! cycles, and the sign-in/sign-out/visibility/pause entry points.
//! Reads prefer the cache; writes go to the server when online and
//! into the queue otherwise.
//!
//! Locking discipline: the cache, queue, persistence, status, and
//! session locks are std locks, never held across an `.await`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use flow_core::{
    detect_conflict, now_ms, resolve, CacheStats, CacheStore, Category, ConflictStrategy,
    Document, FailureDisposition, MutationQueue, OperationKind, PersistenceAdapter,
    QueuedOperation, StorageBackend, StorageError,
};
use serde_json::Value;

use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe, DEFAULT_PROBE_INTERVAL};
use crate::events::{EventBus, SyncEvent};
use crate::remote::{AuthSession, RemoteError, RemoteStore, Role};
use crate::status::{StatusMachine, SyncStatus};
use crate::subscriptions::SubscriptionManager;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval of the consistency check (TTL sweep + queue drain).
    pub consistency_interval: Duration,
    /// Interval of the debounced cache persistence cycle.
    pub persistence_interval: Duration,
    /// Interval of the HTTP reachability probe.
    pub probe_interval: Duration,
    /// Cancellation deadline for individual remote requests; an
    /// elapsed deadline counts as a transient failure.
    pub fetch_timeout: Duration,
    /// How detected conflicts are resolved.
    pub strategy: ConflictStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            consistency_interval: Duration::from_secs(5),
            persistence_interval: Duration::from_secs(60),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            fetch_timeout: Duration::from_secs(10),
            strategy: ConflictStrategy::default(),
        }
    }
}

/// Engine-level errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote store failed and the operation was not queueable.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The persistence layer failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The operation requires an authenticated session.
    #[error("no authenticated session")]
    NotAuthenticated,
}

/// Where a write landed.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Applied against the server directly. Creates and uploads carry
    /// the server-assigned document.
    Applied {
        /// The created/uploaded document, when the server returns one.
        document: Option<Document>,
    },
    /// Captured in the offline queue for later replay.
    Queued {
        /// Queue length after the enqueue.
        queue_len: usize,
    },
}

/// The orchestrator. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<RwLock<CacheStore>>,
    queue: Arc<Mutex<MutationQueue>>,
    persistence: Arc<Mutex<PersistenceAdapter>>,
    monitor: ConnectivityMonitor,
    subscriptions: Arc<SubscriptionManager>,
    bus: EventBus,
    status: Arc<Mutex<StatusMachine>>,
    session: Arc<Mutex<Option<AuthSession>>>,
    last_sync: Arc<AtomicU64>,
    draining: Arc<AtomicBool>,
    config: SyncConfig,
}

impl SyncEngine {
    /// Build an engine over a remote store and a storage backend.
    ///
    /// The engine starts in [`SyncStatus::Initializing`] and optimistic
    /// about connectivity; call [`SyncEngine::initialize`] to restore
    /// persisted state before anything else.
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        backend: Box<dyn StorageBackend>,
        config: SyncConfig,
    ) -> Self {
        let bus = EventBus::new();
        let monitor = ConnectivityMonitor::new(true, bus.clone());
        let cache = Arc::new(RwLock::new(CacheStore::new()));
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&cache),
            monitor.clone(),
            bus.clone(),
        ));
        Self {
            remote,
            cache,
            queue: Arc::new(Mutex::new(MutationQueue::new())),
            persistence: Arc::new(Mutex::new(PersistenceAdapter::new(backend))),
            monitor,
            subscriptions,
            bus,
            status: Arc::new(Mutex::new(StatusMachine::new())),
            session: Arc::new(Mutex::new(None)),
            last_sync: Arc::new(AtomicU64::new(0)),
            draining: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// The engine's event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// The engine's connectivity monitor.
    #[must_use]
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Restore persisted state and move to [`SyncStatus::Ready`].
    pub fn initialize(&self) {
        let loaded = self.lock_persistence().load();
        // Values without timestamps are dropped on restore.
        let restored_entries = loaded
            .cache_values
            .keys()
            .filter(|key| loaded.timestamps.contains_key(*key))
            .count();
        let restored_queue_len = loaded.queue.len();
        self.lock_cache()
            .restore(loaded.cache_values, &loaded.timestamps);
        self.lock_queue().restore(loaded.queue);

        tracing::info!(restored_entries, restored_queue_len, "offline state restored");
        self.bus.emit(SyncEvent::OfflineReady {
            restored_entries,
            restored_queue_len,
        });
        if let Some(status) = self.lock_status().mark_ready() {
            self.bus.emit(SyncEvent::SyncStatusChanged { status });
        }
        self.bus.emit(SyncEvent::SyncReady);
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.lock_status().current()
    }

    /// Pending queue length.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Pending operations in replay order, for UI inspection.
    #[must_use]
    pub fn queue_status(&self) -> Vec<QueuedOperation> {
        self.lock_queue().snapshot()
    }

    /// Cache counts, for UI inspection.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    /// Number of live server listeners.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.active_count()
    }

    /// Epoch-ms time of the last completed resync, 0 if never.
    #[must_use]
    pub fn last_sync_ms(&self) -> u64 {
        self.last_sync.load(Ordering::Relaxed)
    }

    /// Read a document, cache first.
    ///
    /// A fresh cached value is served without touching the network.
    /// On a miss the document is fetched, cached, and returned; while
    /// offline, or when the fetch times out or fails transiently,
    /// the miss stands.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] when the server rejects the fetch.
    pub async fn get_document(
        &self,
        category: Category,
        doc_id: &str,
    ) -> Result<Option<Value>, SyncError> {
        if let Some(value) = self.lock_cache().get(category, doc_id) {
            return Ok(Some(value));
        }
        if !self.monitor.is_online() {
            return Ok(None);
        }
        match self
            .with_deadline(self.remote.fetch_document(category, doc_id))
            .await
        {
            Ok(Some(doc)) => {
                self.lock_cache().set(category, &doc.id, doc.data.clone());
                Ok(Some(doc.data))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_transient() => {
                tracing::debug!(error = %e, "fetch gave up, serving cache miss");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a document, queueing while offline.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] on a non-transient server
    /// rejection; transient failures queue instead.
    pub async fn create(&self, category: Category, data: Value) -> Result<WriteOutcome, SyncError> {
        if !self.monitor.is_online() {
            return Ok(self.enqueue(QueuedOperation::create(category, data)));
        }
        match self.with_deadline(self.remote.create(category, &data)).await {
            Ok(doc) => {
                self.lock_cache().set(category, &doc.id, doc.data.clone());
                Ok(WriteOutcome::Applied {
                    document: Some(doc),
                })
            }
            Err(e) if e.is_transient() => {
                tracing::info!(error = %e, "create failed transiently, queueing");
                self.monitor.note_stream_error();
                Ok(self.enqueue(QueuedOperation::create(category, data)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Update a document, queueing while offline. The cache picks up
    /// the new value once the write lands or queues; a rejected write
    /// leaves the cached copy untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] on a non-transient server
    /// rejection; transient failures queue instead.
    pub async fn update(
        &self,
        category: Category,
        doc_id: &str,
        data: Value,
    ) -> Result<WriteOutcome, SyncError> {
        if !self.monitor.is_online() {
            self.lock_cache().set(category, doc_id, data.clone());
            return Ok(self.enqueue(QueuedOperation::update(category, doc_id, data)));
        }
        match self
            .with_deadline(self.remote.update(category, doc_id, &data))
            .await
        {
            Ok(()) => {
                self.lock_cache().set(category, doc_id, data);
                Ok(WriteOutcome::Applied { document: None })
            }
            Err(e) if e.is_transient() => {
                tracing::info!(error = %e, "update failed transiently, queueing");
                self.monitor.note_stream_error();
                self.lock_cache().set(category, doc_id, data.clone());
                Ok(self.enqueue(QueuedOperation::update(category, doc_id, data)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a document, queueing while offline. As with updates, the
    /// cached copy is only removed once the delete lands or queues.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] on a non-transient server
    /// rejection; transient failures queue instead.
    pub async fn delete(&self, category: Category, doc_id: &str) -> Result<WriteOutcome, SyncError> {
        if !self.monitor.is_online() {
            self.lock_cache().delete(category, doc_id);
            return Ok(self.enqueue(QueuedOperation::delete(category, doc_id)));
        }
        match self.with_deadline(self.remote.delete(category, doc_id)).await {
            Ok(()) => {
                self.lock_cache().delete(category, doc_id);
                Ok(WriteOutcome::Applied { document: None })
            }
            Err(e) if e.is_transient() => {
                tracing::info!(error = %e, "delete failed transiently, queueing");
                self.monitor.note_stream_error();
                self.lock_cache().delete(category, doc_id);
                Ok(self.enqueue(QueuedOperation::delete(category, doc_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Upload a file reference, queueing while offline.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] on a non-transient server
    /// rejection; transient failures queue instead.
    pub async fn upload(
        &self,
        category: Category,
        file_name: &str,
        reference: Value,
    ) -> Result<WriteOutcome, SyncError> {
        if !self.monitor.is_online() {
            return Ok(self.enqueue(QueuedOperation::upload(category, file_name, reference)));
        }
        match self
            .with_deadline(self.remote.upload(category, file_name, &reference))
            .await
        {
            Ok(doc) => {
                self.lock_cache().set(category, &doc.id, doc.data.clone());
                Ok(WriteOutcome::Applied {
                    document: Some(doc),
                })
            }
            Err(e) if e.is_transient() => {
                tracing::info!(error = %e, "upload failed transiently, queueing");
                self.monitor.note_stream_error();
                Ok(self.enqueue(QueuedOperation::upload(category, file_name, reference)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replay the queue against the server in FIFO order.
    ///
    /// A no-op while offline or while another drain is running. Replay
    /// failures bump the operation's attempt count; at the retry cap
    /// the operation is dropped and surfaced as
    /// [`SyncEvent::OperationFailed`]. The drain continues past
    /// failures so one bad operation never blocks the rest.
    ///
    /// Returns how many operations were replayed successfully.
    pub async fn drain_queue(&self) -> usize {
        if !self.monitor.is_online() {
            return 0;
        }
        if self.draining.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let ops = self.lock_queue().snapshot();
        if ops.is_empty() {
            self.draining.store(false, Ordering::SeqCst);
            return 0;
        }
        tracing::info!(pending = ops.len(), "draining offline queue");

        let mut processed = 0_usize;
        let mut failed = 0_usize;
        for op in ops {
            match self.replay(&op).await {
                Ok(()) => {
                    if self.lock_queue().dequeue(&op.id).is_some() {
                        processed += 1;
                    }
                }
                Err(e) => {
                    let disposition = self.lock_queue().record_failure(&op.id);
                    if let Some(FailureDisposition::Dropped(dropped)) = disposition {
                        failed += 1;
                        self.bus.emit(SyncEvent::OperationFailed {
                            operation: dropped,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
        self.draining.store(false, Ordering::SeqCst);

        let remaining = {
            let queue = self.lock_queue();
            if let Err(e) = self.lock_persistence().save_queue(&queue) {
                tracing::warn!(error = %e, "failed to persist queue after drain");
            }
            queue.len()
        };
        self.bus.emit(SyncEvent::QueueChanged { len: remaining });
        self.bus.emit(SyncEvent::QueueProcessed {
            processed,
            failed,
            remaining,
        });
        tracing::info!(processed, failed, remaining, "queue drain finished");
        processed
    }

    /// Re-fetch the session's collections directly, reconciling each
    /// document against the cache (reconnect path).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthenticated`] without a session, or
    /// the first [`SyncError::Remote`] from a collection fetch.
    pub async fn sync_cached_data(&self) -> Result<(), SyncError> {
        let session = self
            .lock_session()
            .clone()
            .ok_or(SyncError::NotAuthenticated)?;

        let mut categories: Vec<Category> = Role::SHARED_CATEGORIES.to_vec();
        categories.extend_from_slice(session.role.data_categories());

        for category in categories {
            let documents = self
                .with_deadline(self.remote.fetch_collection(category, &session.user_id))
                .await?;
            self.reconcile(category, &documents);
        }
        self.last_sync.store(now_ms(), Ordering::Relaxed);
        tracing::debug!("cache resync complete");
        Ok(())
    }

    /// TTL sweep plus queue drain; runs on the consistency interval and
    /// when the page becomes visible again.
    ///
    /// Runs while authenticated, hidden tabs included, so retained
    /// queue work still replays in the background. An explicit pause
    /// suspends it.
    pub async fn perform_consistency_check(&self) {
        let status = self.status();
        if !status.authenticated() || status == SyncStatus::Paused {
            return;
        }
        let swept = self.lock_cache().sweep_expired();
        if swept > 0 {
            tracing::debug!(swept, "consistency check swept expired entries");
        }
        if self.queue_len() > 0 {
            self.drain_queue().await;
        }
        self.last_sync.store(now_ms(), Ordering::Relaxed);
    }

    /// Sign-in entry point: opens the role's subscriptions, drains any
    /// queued work, and resyncs the cache.
    ///
    /// Signing in over a different user's live session (a user switch
    /// without sign-out) detaches that user's listeners and clears
    /// their user-scoped cache entries first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] when a subscription cannot be
    /// opened; the session and status change stick either way.
    pub async fn handle_sign_in(&self, session: AuthSession) -> Result<(), SyncError> {
        tracing::info!(user_id = %session.user_id, role = ?session.role, "sign-in");
        let previous = self.lock_session().replace(session.clone());
        if previous.is_some_and(|p| p.user_id != session.user_id) {
            tracing::info!("user switched without sign-out, detaching prior session");
            self.subscriptions.cleanup_all();
            self.lock_cache().clear_user_scoped();
        }
        if let Some(status) = self.lock_status().auth_changed(true) {
            self.bus.emit(SyncEvent::SyncStatusChanged { status });
        }

        self.subscriptions
            .open_for_session(self.remote.as_ref(), &session)
            .await?;
        self.drain_queue().await;
        match self.sync_cached_data().await {
            Ok(()) | Err(SyncError::NotAuthenticated) => {}
            Err(e) => tracing::warn!(error = %e, "initial resync failed"),
        }
        Ok(())
    }

    /// Sign-out entry point: detaches all listeners, clears user-scoped
    /// cache entries, and flushes persistence.
    ///
    /// Queued operations survive sign-out; they replay on the next
    /// online interval regardless of who is signed in, because dropping
    /// them would lose writes the user already made.
    pub fn handle_sign_out(&self) {
        tracing::info!("sign-out");
        self.subscriptions.cleanup_all();
        self.lock_cache().clear_user_scoped();
        self.flush();
        *self.lock_session() = None;
        if let Some(status) = self.lock_status().auth_changed(false) {
            self.bus.emit(SyncEvent::SyncStatusChanged { status });
        }
    }

    /// Page visibility entry point; returning to visible triggers a
    /// consistency check.
    pub async fn set_visibility(&self, visible: bool) {
        if let Some(status) = self.lock_status().visibility_changed(visible) {
            self.bus.emit(SyncEvent::SyncStatusChanged { status });
            if status == SyncStatus::Active {
                self.perform_consistency_check().await;
            }
        }
    }

    /// Explicit pause.
    pub fn pause(&self) {
        if let Some(status) = self.lock_status().pause() {
            self.bus.emit(SyncEvent::SyncStatusChanged { status });
        }
    }

    /// Explicit resume.
    pub fn resume(&self) {
        if let Some(status) = self.lock_status().resume() {
            self.bus.emit(SyncEvent::SyncStatusChanged { status });
        }
    }

    /// Persist the cache and queue now, outside the debounce cycle.
    /// Failures are logged; the in-memory state is unaffected.
    pub fn flush(&self) {
        let mut cache = self.lock_cache();
        let queue = self.lock_queue();
        cache.take_dirty();
        if let Err(e) = self.lock_persistence().save(&mut cache, &queue) {
            tracing::warn!(error = %e, "explicit flush failed");
        }
    }

    /// Spawn the engine's background loops: the consistency check, the
    /// debounced persistence cycle, the connectivity watcher, and (when
    /// a probe is given) the reachability probe.
    ///
    /// The loops run until the returned handles are aborted or dropped
    /// along with every engine clone.
    pub fn spawn_background_tasks(
        &self,
        probe: Option<Arc<dyn ReachabilityProbe>>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let engine = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.consistency_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                engine.perform_consistency_check().await;
            }
        }));

        let engine = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.persistence_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                engine.persist_if_dirty();
            }
        }));

        let engine = self.clone();
        let mut watcher = self.monitor.watch();
        handles.push(tokio::spawn(async move {
            while watcher.changed().await.is_ok() {
                let online = *watcher.borrow_and_update();
                engine.on_connectivity(online).await;
            }
        }));

        if let Some(probe) = probe {
            handles.push(self.monitor.spawn_probe(probe, self.config.probe_interval));
        }
        handles
    }

    /// Drive a connectivity edge through the status machine; coming
    /// back online drains the queue and resyncs the cache.
    pub async fn on_connectivity(&self, online: bool) {
        if let Some(status) = self.lock_status().connectivity_changed(online) {
            self.bus.emit(SyncEvent::SyncStatusChanged { status });
        }
        if online {
            self.drain_queue().await;
            if self.status().authenticated() {
                match self.sync_cached_data().await {
                    Ok(()) | Err(SyncError::NotAuthenticated) => {}
                    Err(e) => tracing::warn!(error = %e, "reconnect resync failed"),
                }
            }
        }
    }

    /// Persist the cache only when something changed since the last
    /// cycle; queue durability is handled separately on every enqueue.
    fn persist_if_dirty(&self) {
        let dirty = self.lock_cache().take_dirty();
        if !dirty {
            return;
        }
        let mut cache = self.lock_cache();
        let queue = self.lock_queue();
        if let Err(e) = self.lock_persistence().save(&mut cache, &queue) {
            tracing::warn!(error = %e, "debounced persistence cycle failed");
        }
    }

    /// Queue an operation and persist the queue immediately.
    fn enqueue(&self, op: QueuedOperation) -> WriteOutcome {
        let queue_len = {
            let mut queue = self.lock_queue();
            let len = queue.enqueue(op);
            if let Err(e) = self.lock_persistence().save_queue(&queue) {
                tracing::warn!(error = %e, "failed to persist queue after enqueue");
            }
            len
        };
        self.bus.emit(SyncEvent::QueueChanged { len: queue_len });
        WriteOutcome::Queued { queue_len }
    }

    /// Replay one queued operation against the server.
    async fn replay(&self, op: &QueuedOperation) -> Result<(), RemoteError> {
        match op.kind {
            OperationKind::Create => {
                let doc = self
                    .with_deadline(self.remote.create(op.category, &op.data))
                    .await?;
                self.lock_cache().set(op.category, &doc.id, doc.data);
            }
            OperationKind::Update => {
                let Some(doc_id) = &op.doc_id else {
                    tracing::warn!(id = %op.id, "dropping malformed update without doc id");
                    return Ok(());
                };
                self.with_deadline(self.remote.update(op.category, doc_id, &op.data))
                    .await?;
                self.lock_cache().set(op.category, doc_id, op.data.clone());
            }
            OperationKind::Delete => {
                let Some(doc_id) = &op.doc_id else {
                    tracing::warn!(id = %op.id, "dropping malformed delete without doc id");
                    return Ok(());
                };
                self.with_deadline(self.remote.delete(op.category, doc_id))
                    .await?;
                self.lock_cache().delete(op.category, doc_id);
            }
            OperationKind::Upload => {
                let Some(file_name) = &op.file_name else {
                    tracing::warn!(id = %op.id, "dropping malformed upload without file name");
                    return Ok(());
                };
                let doc = self
                    .with_deadline(self.remote.upload(op.category, file_name, &op.data))
                    .await?;
                self.lock_cache().set(op.category, &doc.id, doc.data);
            }
        }
        Ok(())
    }

    /// Bound a remote request by the configured fetch timeout; the
    /// request future is dropped (cancelled) at the deadline and the
    /// elapsed deadline counts as a transient failure.
    async fn with_deadline<T>(
        &self,
        request: impl std::future::Future<Output = Result<T, RemoteError>> + Send,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.config.fetch_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Unavailable("request deadline elapsed".into())),
        }
    }

    /// Apply freshly fetched documents over the cache, resolving any
    /// divergence per the configured strategy.
    fn reconcile(&self, category: Category, documents: &[Document]) {
        let mut conflicts = Vec::new();
        {
            let mut cache = self.lock_cache();
            for doc in documents {
                let cached = cache.get(category, &doc.id);
                let value = match cached {
                    Some(cached_value) if detect_conflict(&cached_value, &doc.data) => {
                        let resolution = resolve(self.config.strategy, &cached_value, &doc.data);
                        if resolution.surface_conflict {
                            conflicts.push((doc.id.clone(), cached_value, doc.data.clone()));
                        }
                        resolution.value
                    }
                    _ => doc.data.clone(),
                };
                cache.set(category, &doc.id, value);
            }
        }
        for (doc_id, cached, server) in conflicts {
            tracing::warn!(%category, doc_id = %doc_id, "data conflict surfaced");
            self.bus.emit(SyncEvent::DataConflict {
                category,
                doc_id,
                cached,
                server,
                strategy: self.config.strategy,
            });
        }
    }

    fn lock_cache(&self) -> RwLockWriteGuard<'_, CacheStore> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_queue(&self) -> MutexGuard<'_, MutationQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_persistence(&self) -> MutexGuard<'_, PersistenceAdapter> {
        self.persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_status(&self) -> MutexGuard<'_, StatusMachine> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<AuthSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("status", &self.status())
            .field("online", &self.monitor.is_online())
            .field("queue_len", &self.queue_len())
            .finish_non_exhaustive()
    }
}
