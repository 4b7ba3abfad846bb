//! Sync status machine.
//!
//! Status transitions are driven only by authentication state, page
//! visibility, and connectivity, never by arbitrary UI code, so sync
//! behavior stays predictable. Transitions outside the table are
//! rejected with a warning and leave the state untouched.

use serde::{Deserialize, Serialize};

/// The engine's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Engine constructed, persisted state not yet restored.
    Initializing,
    /// Restored and waiting for authentication.
    Ready,
    /// Authenticated, visible, syncing.
    Active,
    /// Authenticated but the page is hidden.
    Background,
    /// Explicitly paused by the user.
    Paused,
    /// Connectivity lost; the prior state resumes on reconnect.
    Offline,
    /// No authenticated user.
    Inactive,
}

impl SyncStatus {
    /// Whether this state represents an authenticated session.
    #[must_use]
    pub const fn authenticated(self) -> bool {
        matches!(
            self,
            SyncStatus::Active | SyncStatus::Background | SyncStatus::Paused
        )
    }
}

/// Tracks the current status and the state to resume after an offline
/// interval.
#[derive(Debug)]
pub struct StatusMachine {
    current: SyncStatus,
    /// Where to return when connectivity recovers.
    resume_to: SyncStatus,
}

impl StatusMachine {
    /// Start in [`SyncStatus::Initializing`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: SyncStatus::Initializing,
            resume_to: SyncStatus::Ready,
        }
    }

    /// The current status.
    #[must_use]
    pub const fn current(&self) -> SyncStatus {
        self.current
    }

    /// `Initializing → Ready`, once persisted state is restored.
    pub fn mark_ready(&mut self) -> Option<SyncStatus> {
        self.transition(SyncStatus::Initializing, SyncStatus::Ready)
    }

    /// Authentication changed.
    ///
    /// `Ready | Inactive → Active` on sign-in;
    /// `Active | Background | Paused → Inactive` on sign-out. While
    /// offline, only the resume target moves.
    pub fn auth_changed(&mut self, authenticated: bool) -> Option<SyncStatus> {
        let target = if authenticated {
            SyncStatus::Active
        } else {
            SyncStatus::Inactive
        };
        if self.current == SyncStatus::Offline {
            self.resume_to = target;
            return None;
        }
        let valid = if authenticated {
            matches!(self.current, SyncStatus::Ready | SyncStatus::Inactive)
        } else {
            self.current.authenticated()
        };
        if valid {
            self.set(target)
        } else {
            self.reject(target);
            None
        }
    }

    /// Page visibility changed: `Active ↔ Background`.
    ///
    /// A no-op in every other state (pausing and offline handling take
    /// precedence over visibility).
    pub fn visibility_changed(&mut self, visible: bool) -> Option<SyncStatus> {
        match (self.current, visible) {
            (SyncStatus::Active, false) => self.set(SyncStatus::Background),
            (SyncStatus::Background, true) => self.set(SyncStatus::Active),
            _ => {
                if self.current == SyncStatus::Offline {
                    // Track visibility for the resume target instead.
                    match (self.resume_to, visible) {
                        (SyncStatus::Active, false) => self.resume_to = SyncStatus::Background,
                        (SyncStatus::Background, true) => self.resume_to = SyncStatus::Active,
                        _ => {}
                    }
                }
                None
            }
        }
    }

    /// Explicit user pause: `Active → Paused`. Valid only when
    /// authenticated and active.
    pub fn pause(&mut self) -> Option<SyncStatus> {
        self.transition(SyncStatus::Active, SyncStatus::Paused)
    }

    /// Explicit user resume: `Paused → Active`.
    pub fn resume(&mut self) -> Option<SyncStatus> {
        self.transition(SyncStatus::Paused, SyncStatus::Active)
    }

    /// Connectivity changed.
    ///
    /// Loss moves any state to `Offline` and remembers it; recovery
    /// restores the remembered state.
    pub fn connectivity_changed(&mut self, online: bool) -> Option<SyncStatus> {
        if online {
            if self.current == SyncStatus::Offline {
                let target = self.resume_to;
                self.set(target)
            } else {
                None
            }
        } else if self.current == SyncStatus::Offline {
            None
        } else {
            self.resume_to = self.current;
            self.set(SyncStatus::Offline)
        }
    }

    fn transition(&mut self, from: SyncStatus, to: SyncStatus) -> Option<SyncStatus> {
        if self.current == from {
            self.set(to)
        } else {
            self.reject(to);
            None
        }
    }

    fn set(&mut self, to: SyncStatus) -> Option<SyncStatus> {
        tracing::debug!(from = ?self.current, to = ?to, "sync status transition");
        self.current = to;
        Some(to)
    }

    fn reject(&self, to: SyncStatus) {
        tracing::warn!(
            from = ?self.current,
            to = ?to,
            "rejected invalid sync status transition"
        );
    }
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}
