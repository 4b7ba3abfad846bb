//! Offline mutation queue.
//!
//! An ordered, persisted list of write operations captured while the
//! client cannot reach the server. Replay is strictly FIFO across all
//! documents; an operation leaves the queue exactly once: after a
//! confirmed successful replay, or after exhausting its retries.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::category::Category;
use crate::now_ms;

/// Maximum replay attempts before an operation is dropped and surfaced
/// as a failure event.
pub const MAX_ATTEMPTS: u32 = 3;

/// The kind of a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Create a new document.
    Create,
    /// Update an existing document.
    Update,
    /// Delete a document.
    Delete,
    /// Upload a file and attach its reference.
    Upload,
}

/// A single pending write operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique id: enqueue time plus a random suffix.
    pub id: String,
    /// What the replay should do.
    pub kind: OperationKind,
    /// Target collection.
    pub category: Category,
    /// Target document id; absent for creates (server assigns one).
    pub doc_id: Option<String>,
    /// Document data, or the upload's opaque file reference.
    pub data: Value,
    /// Original file name for uploads.
    pub file_name: Option<String>,
    /// Enqueue time, epoch milliseconds.
    pub enqueued_at: u64,
    /// Replay attempts so far.
    pub attempts: u32,
}

impl QueuedOperation {
    fn new(
        kind: OperationKind,
        category: Category,
        doc_id: Option<String>,
        data: Value,
        file_name: Option<String>,
    ) -> Self {
        let enqueued_at = now_ms();
        Self {
            id: generate_id(enqueued_at),
            kind,
            category,
            doc_id,
            data,
            file_name,
            enqueued_at,
            attempts: 0,
        }
    }

    /// A pending document creation.
    #[must_use]
    pub fn create(category: Category, data: Value) -> Self {
        Self::new(OperationKind::Create, category, None, data, None)
    }

    /// A pending document update.
    #[must_use]
    pub fn update(category: Category, doc_id: impl Into<String>, data: Value) -> Self {
        Self::new(OperationKind::Update, category, Some(doc_id.into()), data, None)
    }

    /// A pending document deletion.
    #[must_use]
    pub fn delete(category: Category, doc_id: impl Into<String>) -> Self {
        Self::new(
            OperationKind::Delete,
            category,
            Some(doc_id.into()),
            Value::Null,
            None,
        )
    }

    /// A pending file upload; `reference` is opaque to this layer.
    #[must_use]
    pub fn upload(category: Category, file_name: impl Into<String>, reference: Value) -> Self {
        Self::new(
            OperationKind::Upload,
            category,
            None,
            reference,
            Some(file_name.into()),
        )
    }
}

/// What happened to an operation after a failed replay.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    /// Attempts bumped; the operation stays queued for the next drain
    /// cycle.
    Retained {
        /// Attempts recorded so far.
        attempts: u32,
    },
    /// The retry cap was reached; the operation was removed and must be
    /// surfaced to the application as a failure.
    Dropped(QueuedOperation),
}

/// FIFO queue of pending offline writes.
///
/// The queue holds state only; replaying against the remote store is
/// the sync engine's job. Global order is preserved trivially because
/// this is a single list, not a per-document structure.
#[derive(Debug, Default)]
pub struct MutationQueue {
    pending: VecDeque<QueuedOperation>,
}

impl MutationQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation. Returns the new queue length.
    pub fn enqueue(&mut self, op: QueuedOperation) -> usize {
        tracing::debug!(id = %op.id, kind = ?op.kind, category = %op.category, "queued offline operation");
        self.pending.push_back(op);
        self.pending.len()
    }

    /// Remove an operation by id. Returns it if it was queued.
    pub fn dequeue(&mut self, id: &str) -> Option<QueuedOperation> {
        let index = self.pending.iter().position(|op| op.id == id)?;
        self.pending.remove(index)
    }

    /// Record a failed replay for `id`.
    ///
    /// Below [`MAX_ATTEMPTS`] the operation is retained in place (its
    /// queue position, and therefore FIFO order, is unchanged); at the
    /// cap it is removed and handed back for the failure event.
    pub fn record_failure(&mut self, id: &str) -> Option<FailureDisposition> {
        let index = self.pending.iter().position(|op| op.id == id)?;
        let op = &mut self.pending[index];
        op.attempts += 1;
        if op.attempts >= MAX_ATTEMPTS {
            let dropped = self.pending.remove(index)?;
            tracing::warn!(id = %dropped.id, attempts = dropped.attempts, "dropping operation after retry exhaustion");
            Some(FailureDisposition::Dropped(dropped))
        } else {
            let attempts = op.attempts;
            Some(FailureDisposition::Retained { attempts })
        }
    }

    /// Pending operations in replay order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.pending.iter().cloned().collect()
    }

    /// Rebuild the queue from a persisted snapshot.
    pub fn restore(&mut self, ops: Vec<QueuedOperation>) {
        self.pending = ops.into();
    }

    /// Number of pending operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything (sign-out path).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Operation ids are the enqueue time plus a short random suffix, so
/// they sort roughly by age and never collide within a burst.
fn generate_id(enqueued_at: u64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{enqueued_at}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enqueue_reports_length_and_preserves_order() {
        let mut queue = MutationQueue::new();
        let a = QueuedOperation::create(Category::Applications, json!({"n": 1}));
        let b = QueuedOperation::update(Category::Applications, "a1", json!({"n": 2}));
        let c = QueuedOperation::delete(Category::Messages, "m1");

        assert_eq!(queue.enqueue(a.clone()), 1);
        assert_eq!(queue.enqueue(b.clone()), 2);
        assert_eq!(queue.enqueue(c.clone()), 3);

        let ids: Vec<_> = queue.snapshot().into_iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_dequeue_by_id() {
        let mut queue = MutationQueue::new();
        let op = QueuedOperation::delete(Category::Messages, "m1");
        let id = op.id.clone();
        queue.enqueue(op);

        let removed = queue.dequeue(&id).expect("op should be queued");
        assert_eq!(removed.id, id);
        assert!(queue.is_empty());
        assert!(queue.dequeue(&id).is_none());
    }

    #[test]
    fn test_failure_below_cap_retains_in_place() {
        let mut queue = MutationQueue::new();
        let first = QueuedOperation::create(Category::Applications, json!(1));
        let second = QueuedOperation::create(Category::Applications, json!(2));
        let first_id = first.id.clone();
        queue.enqueue(first);
        queue.enqueue(second);

        let disposition = queue.record_failure(&first_id).expect("queued");
        assert_eq!(disposition, FailureDisposition::Retained { attempts: 1 });
        // Still first in line for the next drain cycle.
        assert_eq!(queue.snapshot()[0].id, first_id);
    }

    #[test]
    fn test_failure_at_cap_drops_exactly_once() {
        let mut queue = MutationQueue::new();
        let op = QueuedOperation::update(Category::Profile, "u1", json!({}));
        let id = op.id.clone();
        queue.enqueue(op);

        for attempt in 1..MAX_ATTEMPTS {
            assert_eq!(
                queue.record_failure(&id),
                Some(FailureDisposition::Retained { attempts: attempt })
            );
        }
        match queue.record_failure(&id) {
            Some(FailureDisposition::Dropped(dropped)) => {
                assert_eq!(dropped.attempts, MAX_ATTEMPTS);
            }
            other => panic!("expected drop at retry cap, got {other:?}"),
        }
        assert!(queue.is_empty());
        // A further failure report for the same id is a no-op.
        assert_eq!(queue.record_failure(&id), None);
    }

    #[test]
    fn test_upload_carries_file_name() {
        let op = QueuedOperation::upload(
            Category::Documents,
            "transcript.pdf",
            json!({"blob": "ref-123"}),
        );
        assert_eq!(op.kind, OperationKind::Upload);
        assert_eq!(op.file_name.as_deref(), Some("transcript.pdf"));
        assert!(op.doc_id.is_none());
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut queue = MutationQueue::new();
        queue.enqueue(QueuedOperation::create(Category::Applications, json!(1)));
        queue.enqueue(QueuedOperation::delete(Category::Messages, "m1"));
        let snapshot = queue.snapshot();

        let mut restored = MutationQueue::new();
        restored.restore(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = QueuedOperation::create(Category::Generic, json!(1));
        let b = QueuedOperation::create(Category::Generic, json!(1));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_serde_round_trip() {
        let op = QueuedOperation::update(Category::Applications, "a1", json!({"status": "sent"}));
        let json = serde_json::to_string(&op).expect("serialize");
        let back: QueuedOperation = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, op);
    }
}
