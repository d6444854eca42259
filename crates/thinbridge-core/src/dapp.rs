use tokio::sync::broadcast;

/// A raw reply relayed on behalf of a third-party page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DappEvent {
    pub id: String,
    /// The inbound message, serialized as JSON.
    pub raw: String,
}

/// Secondary delivery path for replies to relayed dApp requests.
///
/// The bridge never interprets these messages; the provider bridge that
/// issued the request matches them by `id`.
pub trait DappEventBus: Send + Sync {
    fn emit(&self, id: &str, raw: String);
}

/// Broadcast-backed event bus. Every subscriber sees every event and filters
/// by the ids it owns.
#[derive(Debug, Clone)]
pub struct BroadcastDappBus {
    tx: broadcast::Sender<DappEvent>,
}

impl BroadcastDappBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DappEvent> {
        self.tx.subscribe()
    }
}

impl DappEventBus for BroadcastDappBus {
    fn emit(&self, id: &str, raw: String) {
        let event = DappEvent {
            id: id.to_string(),
            raw,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!(id, "No dApp bus listeners, event dropped");
        }
    }
}
