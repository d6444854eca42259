use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Readiness of the runtime container, as reported by its lifecycle frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    Init,
    /// Container is connecting or loading its scripts.
    Load,
    /// Fully initialized; any message may be written.
    CryptoReady,
    /// Waiting for the user to restore wallet data. Only maintenance
    /// messages may be written.
    RequireRestore,
    Reloading,
}

impl std::fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportStatus::Init => write!(f, "init"),
            TransportStatus::Load => write!(f, "load"),
            TransportStatus::CryptoReady => write!(f, "crypto_ready"),
            TransportStatus::RequireRestore => write!(f, "require_restore"),
            TransportStatus::Reloading => write!(f, "reloading"),
        }
    }
}

pub const DEFAULT_MAINTENANCE_PREFIX: &str = "mobile(";

/// Holds the single current [`TransportStatus`] and notifies observers of
/// transitions.
///
/// Observers use a `watch` receiver, so intermediate values may be coalesced;
/// they see the latest status, not necessarily every one.
#[derive(Debug)]
pub struct StatusTracker {
    tx: watch::Sender<TransportStatus>,
    maintenance_prefix: String,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::with_maintenance_prefix(DEFAULT_MAINTENANCE_PREFIX)
    }

    pub fn with_maintenance_prefix(prefix: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(TransportStatus::Init);
        Self {
            tx,
            maintenance_prefix: prefix.into(),
        }
    }

    pub fn current(&self) -> TransportStatus {
        *self.tx.borrow()
    }

    /// Push a new status. Returns the previous value if it changed.
    pub fn set(&self, status: TransportStatus) -> Option<TransportStatus> {
        let mut previous = None;
        self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            previous = Some(*current);
            *current = status;
            true
        });
        if let Some(from) = previous {
            tracing::info!(from = %from, to = %status, "Transport status changed");
        }
        previous
    }

    /// Register an observer of status transitions.
    pub fn on_status_change(&self) -> watch::Receiver<TransportStatus> {
        self.tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.current() == TransportStatus::CryptoReady
    }

    pub fn is_maintenance(&self, message: &str) -> bool {
        message.starts_with(&self.maintenance_prefix)
    }

    /// Whether `message` may be written to the transport right now.
    pub fn can_send(&self, message: &str) -> bool {
        match self.current() {
            TransportStatus::CryptoReady => true,
            TransportStatus::RequireRestore => self.is_maintenance(message),
            _ => false,
        }
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
