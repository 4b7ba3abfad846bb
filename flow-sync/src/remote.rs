//! Boundaries to the portal's external collaborators.
//!
//! The sync layer talks to the document backend and the auth client
//! only through these traits; production wires them to the real
//! services, tests wire them to in-memory fakes.

use async_trait::async_trait;
use flow_core::{Category, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Errors from the remote document store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The backend could not be reached; safe to retry.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    /// The backend rejected the request. Retry accounting treats this
    /// the same as a connectivity failure, but it is logged distinctly.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether this error suggests a connectivity problem rather than a
    /// bad request.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// Portal user roles; each opens a different set of subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// An applying student.
    Student,
    /// An institution administrator.
    Institution,
    /// A school counselor with assigned students.
    Counselor,
    /// A parent with linked children.
    Parent,
    /// A recommender with assigned requests.
    Recommender,
}

impl Role {
    /// Subscriptions every authenticated user gets, regardless of role.
    pub const SHARED_CATEGORIES: [Category; 3] = [
        Category::Profile,
        Category::Messages,
        Category::Notifications,
    ];

    /// The role-specific data categories.
    #[must_use]
    pub const fn data_categories(self) -> &'static [Category] {
        match self {
            Role::Student => &[Category::Applications, Category::Documents],
            Role::Institution => &[Category::Programs, Category::Applications],
            Role::Counselor => &[Category::Students],
            Role::Parent => &[Category::Children],
            Role::Recommender => &[Category::Requests],
        }
    }
}

/// The authenticated user as the sync layer sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// The user's id; also the owner id for their subscriptions.
    pub user_id: String,
    /// The user's portal role.
    pub role: Role,
    /// Institution id for institution-scoped views.
    pub institution_id: Option<String>,
}

impl AuthSession {
    /// A session without an institution scope.
    #[must_use]
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            institution_id: None,
        }
    }
}

/// An equality filter on a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Field name.
    pub field: String,
    /// Required value.
    pub equals: Value,
}

/// Sort order for a subscription's document set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field to sort on.
    pub field: String,
    /// Newest-first when true.
    pub descending: bool,
}

/// Everything needed to open one live listener.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    /// Collection to listen on.
    pub category: Category,
    /// Owning user id.
    pub owner_id: String,
    /// Additional equality filters (e.g. institution scoping).
    pub filters: Vec<QueryFilter>,
    /// Optional sort order.
    pub order_by: Option<OrderBy>,
}

impl SubscriptionRequest {
    /// A plain owner-scoped subscription.
    #[must_use]
    pub fn new(category: Category, owner_id: impl Into<String>) -> Self {
        Self {
            category,
            owner_id: owner_id.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    /// Add an equality filter.
    #[must_use]
    pub fn with_filter(mut self, field: impl Into<String>, equals: Value) -> Self {
        self.filters.push(QueryFilter {
            field: field.into(),
            equals,
        });
        self
    }
}

/// One delivery from a live subscription: either the full current
/// document set, or an in-band transport error.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    /// Full current document set for the subscribed query.
    pub documents: Vec<Document>,
    /// Transport error, if this delivery reports one. The stream stays
    /// attached and recovers per its own transport.
    pub error: Option<String>,
}

impl ChangeBatch {
    /// A successful delivery.
    #[must_use]
    pub fn documents(documents: Vec<Document>) -> Self {
        Self {
            documents,
            error: None,
        }
    }

    /// An in-band error delivery.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            documents: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// Opaque cleanup for a live listener.
///
/// Calling [`DetachHandle::detach`] releases the server-side listener;
/// failures are reported so the caller can log and continue.
pub struct DetachHandle(Option<Box<dyn FnOnce() -> Result<(), RemoteError> + Send>>);

impl DetachHandle {
    /// Wrap a detach closure.
    #[must_use]
    pub fn new(f: impl FnOnce() -> Result<(), RemoteError> + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// A handle with nothing to release.
    #[must_use]
    pub fn noop() -> Self {
        Self(None)
    }

    /// Release the listener. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`RemoteError`] if the listener could not
    /// be released; the handle is spent either way.
    pub fn detach(&mut self) -> Result<(), RemoteError> {
        match self.0.take() {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for DetachHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DetachHandle")
            .field(&self.0.is_some())
            .finish()
    }
}

/// A live listener: its change-batch stream plus the detach handle.
#[derive(Debug)]
pub struct RemoteSubscription {
    /// Change batches as the server pushes them.
    pub batches: mpsc::Receiver<ChangeBatch>,
    /// Releases the server-side listener.
    pub detach: DetachHandle,
}

/// The remote document backend.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a document; the server assigns the id.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the backend is unreachable or
    /// rejects the write.
    async fn create(&self, category: Category, data: &Value) -> Result<Document, RemoteError>;

    /// Overwrite a document's payload.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the backend is unreachable or
    /// rejects the write.
    async fn update(
        &self,
        category: Category,
        doc_id: &str,
        data: &Value,
    ) -> Result<(), RemoteError>;

    /// Delete a document.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the backend is unreachable or
    /// rejects the write.
    async fn delete(&self, category: Category, doc_id: &str) -> Result<(), RemoteError>;

    /// Upload a file and register its document; `reference` is opaque
    /// to the sync layer.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the backend is unreachable or
    /// rejects the upload.
    async fn upload(
        &self,
        category: Category,
        file_name: &str,
        reference: &Value,
    ) -> Result<Document, RemoteError>;

    /// Fetch one document directly, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the backend is unreachable.
    async fn fetch_document(
        &self,
        category: Category,
        doc_id: &str,
    ) -> Result<Option<Document>, RemoteError>;

    /// Fetch an owner's collection directly, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the backend is unreachable.
    async fn fetch_collection(
        &self,
        category: Category,
        owner_id: &str,
    ) -> Result<Vec<Document>, RemoteError>;

    /// Open a live listener for a query.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the listener cannot be opened.
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<RemoteSubscription, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_fan_out_tables() {
        assert_eq!(
            Role::Student.data_categories(),
            &[Category::Applications, Category::Documents]
        );
        assert_eq!(Role::Parent.data_categories(), &[Category::Children]);
        assert!(Role::SHARED_CATEGORIES.contains(&Category::Profile));
    }

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Unavailable("down".into()).is_transient());
        assert!(!RemoteError::Rejected("bad payload".into()).is_transient());
    }

    #[test]
    fn test_detach_is_idempotent() {
        let mut calls = 0;
        // Count side effects through a channel since FnOnce moves.
        let (tx, rx) = std::sync::mpsc::channel();
        let mut handle = DetachHandle::new(move || {
            tx.send(()).ok();
            Ok(())
        });
        handle.detach().expect("first detach");
        handle.detach().expect("second detach is a no-op");
        while rx.try_recv().is_ok() {
            calls += 1;
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_subscription_request_builder() {
        let request = SubscriptionRequest::new(Category::Applications, "inst-1")
            .with_filter("institutionId", serde_json::json!("inst-1"));
        assert_eq!(request.filters.len(), 1);
        assert_eq!(request.filters[0].field, "institutionId");
    }
}
