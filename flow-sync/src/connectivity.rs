//! Connectivity monitoring.
//!
//! Online state is a single boolean derived from three inputs: platform
//! online/offline signals, subscription stream health, and a periodic
//! HTTP reachability probe. Consumers watch the state through a
//! [`tokio::sync::watch`] channel; only genuine edges are published, so
//! repeated signals in the same direction cost nothing downstream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::events::{EventBus, SyncEvent};

/// Default interval between reachability probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout applied to each probe request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// An active check that the backend is actually reachable.
///
/// Platform signals report the network interface, not the service;
/// the probe closes that gap.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns `true` when the backend answered.
    async fn check(&self) -> bool;
}

/// Probe that issues a `HEAD` request against a health endpoint.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    /// Create a probe against `url`.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`reqwest::Error`] if the client cannot
    /// be constructed.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("reachability probe failed: {e}");
                false
            }
        }
    }
}

/// Tracks online/offline state and publishes edges.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
    bus: EventBus,
}

impl ConnectivityMonitor {
    /// Start in the given state. Browsers report an initial value;
    /// headless hosts start optimistic.
    #[must_use]
    pub fn new(initially_online: bool, bus: EventBus) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self {
            tx: Arc::new(tx),
            bus,
        }
    }

    /// Current online state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Watch for state edges.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Feed a platform online/offline signal.
    pub fn note_platform_signal(&self, online: bool) {
        self.transition(online, "platform signal");
    }

    /// A live subscription reported a transport error.
    pub fn note_stream_error(&self) {
        self.transition(false, "subscription stream error");
    }

    /// A live subscription delivered data again.
    pub fn note_stream_recovered(&self) {
        self.transition(true, "subscription stream recovery");
    }

    /// Run one probe and feed its verdict in.
    pub async fn probe_once(&self, probe: &dyn ReachabilityProbe) {
        let online = probe.check().await;
        self.transition(online, "reachability probe");
    }

    /// Spawn the periodic probe loop. The task ends when every monitor
    /// clone is dropped.
    pub fn spawn_probe(
        &self,
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup
            // state comes from the platform signal instead.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                monitor.probe_once(probe.as_ref()).await;
            }
        })
    }

    /// Publish only genuine edges.
    fn transition(&self, online: bool, source: &str) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, source, "connectivity changed");
            self.bus.emit(SyncEvent::NetworkStatusChanged { online });
        }
    }
}
