//! # Flow Sync
//!
//! Async coordination layer for the Flow portal's offline support:
//! connectivity monitoring, live server subscriptions, offline queue
//! draining, periodic consistency checks, and conflict reconciliation.
//! Built on the data structures in `flow-core`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   flow-sync                     │
//! ├─────────────────────────────────────────────────┤
//! │  ConnectivityMonitor  │  SubscriptionManager    │
//! │  - platform signals   │  - one listener per key │
//! │  - reachability probe │  - write-through + delta│
//! │  - stream state       │  - role fan-out         │
//! ├─────────────────────────────────────────────────┤
//! │  SyncEngine                                     │
//! │  - status machine     - queue draining          │
//! │  - consistency checks - conflict resolution     │
//! │  - debounced persistence                        │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! All application-visible signals flow through a typed [`EventBus`];
//! there is no string-keyed event surface.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod connectivity;
pub mod engine;
pub mod events;
pub mod remote;
pub mod status;
pub mod subscriptions;

pub use connectivity::{ConnectivityMonitor, HttpProbe, ReachabilityProbe};
pub use engine::{SyncConfig, SyncEngine, SyncError, WriteOutcome};
pub use events::{DocumentDelta, EventBus, SyncEvent};
pub use remote::{
    AuthSession, ChangeBatch, DetachHandle, OrderBy, QueryFilter, RemoteError, RemoteStore,
    RemoteSubscription, Role, SubscriptionRequest,
};
pub use status::SyncStatus;
pub use subscriptions::{SubscriptionKey, SubscriptionManager};

/// Flow sync version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
