use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for metrics backends. Implementations can forward to an external
/// collector or simply log.
pub trait MetricsBackend: Send + Sync {
    fn record_counter(&self, name: &str, value: u64);
}

/// Atomic counters for bridge traffic.
pub struct BridgeMetrics {
    pub sent: AtomicU64,
    pub deferred: AtomicU64,
    pub resolved: AtomicU64,
    pub rejected: AtomicU64,
    pub streamed: AtomicU64,
    pub unknown: AtomicU64,
    pub dapp_forwarded: AtomicU64,
    pub resets: AtomicU64,
    pub replayed: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for BridgeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            streamed: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
            dapp_forwarded: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            backend: None,
        }
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    fn bump(&self, counter: &AtomicU64, name: &str) {
        let val = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter(name, val);
        }
    }

    pub fn record_sent(&self) {
        self.bump(&self.sent, "thinbridge.sent");
    }

    pub fn record_deferred(&self) {
        self.bump(&self.deferred, "thinbridge.deferred");
    }

    pub fn record_resolved(&self) {
        self.bump(&self.resolved, "thinbridge.resolved");
    }

    pub fn record_rejected(&self) {
        self.bump(&self.rejected, "thinbridge.rejected");
    }

    pub fn record_streamed(&self) {
        self.bump(&self.streamed, "thinbridge.streamed");
    }

    pub fn record_unknown(&self) {
        self.bump(&self.unknown, "thinbridge.unknown");
    }

    pub fn record_dapp_forwarded(&self) {
        self.bump(&self.dapp_forwarded, "thinbridge.dapp_forwarded");
    }

    pub fn record_reset(&self) {
        self.bump(&self.resets, "thinbridge.resets");
    }

    pub fn record_replayed(&self) {
        self.bump(&self.replayed, "thinbridge.replayed");
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            streamed: self.streamed.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            dapp_forwarded: self.dapp_forwarded.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of bridge metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub sent: u64,
    pub deferred: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub streamed: u64,
    pub unknown: u64,
    pub dapp_forwarded: u64,
    pub resets: u64,
    pub replayed: u64,
}

/// Logging-based metrics backend. Emits metrics as structured log events.
pub struct LoggingMetricsBackend;

impl MetricsBackend for LoggingMetricsBackend {
    fn record_counter(&self, name: &str, value: u64) {
        tracing::debug!(metric = name, value = value, kind = "counter", "metric");
    }
}
