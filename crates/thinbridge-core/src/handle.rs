use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::bridge::{Bridge, SettleHook, Subscription};
use crate::error::BridgeError;
use crate::lifecycle::LifecycleSignal;
use crate::metrics::BridgeMetrics;
use crate::registry::Subscriber;
use crate::status::TransportStatus;

/// Cloneable, task-safe handle to a [`Bridge`].
///
/// The lock is only held while a bridge operation runs; awaiting a reply
/// happens after it is released.
#[derive(Clone)]
pub struct BridgeHandle {
    inner: Arc<Mutex<Bridge>>,
}

impl BridgeHandle {
    pub fn new(bridge: Bridge) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bridge)),
        }
    }

    /// Lock the bridge for a sequence of operations that must not interleave
    /// with other tasks (e.g. reattach followed by replay).
    pub async fn lock(&self) -> MutexGuard<'_, Bridge> {
        self.inner.lock().await
    }

    /// Send a one-shot request and wait for its reply.
    pub async fn send_message(&self, message: &str, request: Option<Value>) -> Result<Value, BridgeError> {
        let response = self.inner.lock().await.send_message(message, request, None)?;
        response.await
    }

    pub async fn subscribe_message(
        &self,
        message: &str,
        request: Option<Value>,
        on_settle: Option<SettleHook>,
        subscriber: Subscriber,
    ) -> Result<Subscription, BridgeError> {
        self.inner
            .lock()
            .await
            .subscribe_message(message, request, on_settle, subscriber)
    }

    pub async fn unsubscribe(&self, id: &str) -> bool {
        self.inner.lock().await.unsubscribe(id)
    }

    pub async fn hold_relayed(&self, id: &str) -> bool {
        self.inner.lock().await.hold_relayed(id)
    }

    pub async fn release_relayed(&self, id: &str) -> bool {
        self.inner.lock().await.release_relayed(id)
    }

    pub async fn listen_message(&self, raw: &str) {
        self.inner.lock().await.listen_message(raw);
    }

    pub async fn handle_lifecycle(&self, signal: LifecycleSignal) {
        self.inner.lock().await.handle_lifecycle(signal);
    }

    pub async fn reset_all(&self) -> usize {
        self.inner.lock().await.reset_all()
    }

    pub async fn replay_all(&self) -> Result<usize, BridgeError> {
        self.inner.lock().await.replay_all()
    }

    pub async fn status(&self) -> TransportStatus {
        self.inner.lock().await.status()
    }

    pub async fn on_status_change(&self) -> watch::Receiver<TransportStatus> {
        self.inner.lock().await.on_status_change()
    }

    pub async fn metrics(&self) -> Arc<BridgeMetrics> {
        self.inner.lock().await.metrics()
    }
}
