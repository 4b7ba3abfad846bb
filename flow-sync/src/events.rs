//! Typed application events.
//!
//! The portal's UI layer consumes sync signals through a single
//! broadcast channel of [`SyncEvent`] values, so every event name and
//! payload shape is enforced at compile time. Send errors when nobody
//! is listening are expected during startup and logged at debug.

use flow_core::{Category, ConflictStrategy, Document, QueuedOperation};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::status::SyncStatus;

/// Broadcast channel capacity; slow consumers lag rather than block.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// The documents that changed between two batches of a subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentDelta {
    /// Documents present now but not in the previous batch.
    pub added: Vec<Document>,
    /// Documents present in both batches with different payloads.
    pub modified: Vec<Document>,
    /// Ids present previously but missing now.
    pub removed: Vec<String>,
}

impl DocumentDelta {
    /// Whether the batch changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Everything the sync layer reports to the application.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Persisted state was restored and the offline layer is usable.
    OfflineReady {
        /// Cache entries restored from storage.
        restored_entries: usize,
        /// Queued operations restored from storage.
        restored_queue_len: usize,
    },
    /// The connectivity monitor observed an online/offline edge.
    NetworkStatusChanged {
        /// The new state.
        online: bool,
    },
    /// The mutation queue length changed.
    QueueChanged {
        /// New queue length.
        len: usize,
    },
    /// An operation exhausted its retries and was dropped.
    ///
    /// Data loss is possible here and must stay visible to the user
    /// layer, never silently swallowed.
    OperationFailed {
        /// The dropped operation.
        operation: QueuedOperation,
        /// The final replay error.
        error: String,
    },
    /// A drain cycle finished.
    QueueProcessed {
        /// Operations replayed successfully.
        processed: usize,
        /// Operations dropped after retry exhaustion.
        failed: usize,
        /// Operations still queued for the next cycle.
        remaining: usize,
    },
    /// The sync engine finished starting up.
    SyncReady,
    /// The status machine moved.
    SyncStatusChanged {
        /// The new status.
        status: SyncStatus,
    },
    /// A live subscription delivered a change batch (or an error).
    CategoryUpdated {
        /// The subscription's category.
        category: Category,
        /// Full current document set for the subscription.
        documents: Vec<Document>,
        /// What changed since the previous batch.
        delta: DocumentDelta,
        /// Transport error surfaced in-band; the subscription itself
        /// stays attached and recovers on its own.
        error: Option<String>,
    },
    /// Cached and server state diverged under the manual strategy.
    ///
    /// The server value has already been applied provisionally; the
    /// application may react but nothing blocks on it.
    DataConflict {
        /// Category of the conflicting document.
        category: Category,
        /// The document id.
        doc_id: String,
        /// The value the cache held.
        cached: Value,
        /// The value the server returned (already applied).
        server: Value,
        /// The strategy that produced this event.
        strategy: ConflictStrategy,
    },
}

/// Cloneable handle to the sync layer's broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Attach a new listener.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to every listener.
    ///
    /// No receivers is expected during startup; log at debug rather
    /// than surfacing an error.
    pub fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!("event emit skipped: no receivers ({e})");
        }
    }

    /// Current number of attached listeners.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_without_receivers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(SyncEvent::SyncReady);
    }

    #[tokio::test]
    async fn test_events_reach_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(SyncEvent::QueueChanged { len: 2 });

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.expect("event") {
                SyncEvent::QueueChanged { len } => assert_eq!(len, 2),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn test_delta_is_empty() {
        assert!(DocumentDelta::default().is_empty());
        let delta = DocumentDelta {
            added: vec![Document::new("d1", json!(1))],
            ..DocumentDelta::default()
        };
        assert!(!delta.is_empty());
    }
}
