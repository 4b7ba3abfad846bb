//! Conflict detection and resolution between cached and server state.
//!
//! A cached document and a freshly fetched one conflict when both
//! carry an `updatedAt`-like timestamp and the two differ by more than
//! a fixed tolerance. Resolution always produces a value to apply;
//! even the manual strategy applies the server value provisionally
//! while flagging the conflict for the application layer.

use serde_json::Value;

use crate::document::updated_at_ms;

/// Timestamps within this window are treated as the same write.
pub const CONFLICT_TOLERANCE_MS: u64 = 1_000;

/// How detected conflicts are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Server value wins; the server fetch is definitionally newer at
    /// sync time.
    #[default]
    LastWriteWins,
    /// Shallow merge of both objects, server fields winning.
    Merge,
    /// Apply the server value provisionally and surface the conflict
    /// as an event; the system never blocks on human input.
    Manual,
}

/// Outcome of resolving one cached/server pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The value to write into the cache.
    pub value: Value,
    /// Whether a manual-strategy conflict must be surfaced as an event.
    pub surface_conflict: bool,
}

/// Whether `cached` and `server` diverge beyond the tolerance window.
///
/// Documents lacking a usable timestamp on either side never conflict;
/// the server value simply replaces the cache.
#[must_use]
pub fn detect_conflict(cached: &Value, server: &Value) -> bool {
    match (updated_at_ms(cached), updated_at_ms(server)) {
        (Some(local), Some(remote)) => local.abs_diff(remote) > CONFLICT_TOLERANCE_MS,
        _ => false,
    }
}

/// Resolve a detected conflict under `strategy`.
#[must_use]
pub fn resolve(strategy: ConflictStrategy, cached: &Value, server: &Value) -> Resolution {
    match strategy {
        ConflictStrategy::LastWriteWins => Resolution {
            value: server.clone(),
            surface_conflict: false,
        },
        ConflictStrategy::Merge => Resolution {
            value: shallow_merge(cached, server),
            surface_conflict: false,
        },
        ConflictStrategy::Manual => Resolution {
            value: server.clone(),
            surface_conflict: true,
        },
    }
}

/// Shallow merge: cached fields as the base, server fields on top.
///
/// Non-object inputs degrade to the server value.
fn shallow_merge(cached: &Value, server: &Value) -> Value {
    match (cached.as_object(), server.as_object()) {
        (Some(base), Some(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => server.clone(),
    }
}
