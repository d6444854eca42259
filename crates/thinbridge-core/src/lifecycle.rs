//! Reload handling and subscription replay.
//!
//! A reload fails everything outstanding with [`BridgeError::NotReady`] but
//! keeps the record of restartable subscriptions, marked detached. Once the
//! embedding application decides the container is healthy again it
//! re-registers the subscriptions it still wants ([`Bridge::reattach`]) and calls
//! [`Bridge::replay_all`]; the bridge never replays on its own.

use serde_json::Value;

use crate::bridge::{Bridge, ResponseFuture, SettleHook, completion_pair};
use crate::error::BridgeError;
use crate::message::OutboundMessage;
use crate::namespace::classify;
use crate::registry::Subscriber;
use crate::status::TransportStatus;

/// External signals driving the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Status(TransportStatus),
    ReloadBegin,
}

/// A subscription request kept so it can be reissued after a reload.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartableRequest {
    pub id: String,
    pub message: String,
    pub request: Option<Value>,
    pub origin: Option<String>,
}

impl From<&OutboundMessage> for RestartableRequest {
    fn from(message: &OutboundMessage) -> Self {
        Self {
            id: message.id.clone(),
            message: message.message.clone(),
            request: message.request.clone(),
            origin: message.origin.clone(),
        }
    }
}

impl RestartableRequest {
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            id: self.id.clone(),
            message: self.message.clone(),
            request: self.request.clone(),
            origin: self.origin.clone(),
        }
    }
}

/// Where a restartable request stands relative to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attachment {
    /// Registered and live.
    Live,
    /// Rejected by a reload; waiting to be reattached or dropped.
    Detached,
    /// Registered again after a reload; reissued by the next replay.
    Reattached,
}

/// Restartable requests in registration order.
#[derive(Debug, Default)]
pub struct RestartSet {
    entries: Vec<(RestartableRequest, Attachment)>,
}

impl RestartSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert as live, replacing any previous request under the same id in
    /// place.
    pub fn insert(&mut self, request: RestartableRequest) {
        match self.entries.iter_mut().find(|(r, _)| r.id == request.id) {
            Some(existing) => *existing = (request, Attachment::Live),
            None => self.entries.push((request, Attachment::Live)),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<RestartableRequest> {
        let pos = self.entries.iter().position(|(r, _)| r.id == id)?;
        Some(self.entries.remove(pos).0)
    }

    pub fn get(&self, id: &str) -> Option<&RestartableRequest> {
        self.entries.iter().find(|(r, _)| r.id == id).map(|(r, _)| r)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|(r, _)| r.id.clone()).collect()
    }

    pub fn detach_all(&mut self) {
        for (_, state) in &mut self.entries {
            *state = Attachment::Detached;
        }
    }

    pub fn detached_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, state)| *state == Attachment::Detached)
            .map(|(r, _)| r.id.clone())
            .collect()
    }

    fn mark_reattached(&mut self, id: &str) {
        if let Some((_, state)) = self.entries.iter_mut().find(|(r, _)| r.id == id) {
            *state = Attachment::Reattached;
        }
    }

    /// Drop every request still detached and return the reattached ones in
    /// order, marking them live again.
    pub fn take_replay(&mut self) -> Vec<RestartableRequest> {
        self.entries.retain(|(_, state)| *state != Attachment::Detached);
        self.entries
            .iter_mut()
            .filter(|(_, state)| *state == Attachment::Reattached)
            .map(|(r, state)| {
                *state = Attachment::Live;
                r.clone()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Bridge {
    pub fn handle_lifecycle(&mut self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::ReloadBegin => {
                self.reset_all();
            }
            LifecycleSignal::Status(status) => self.set_status(status),
        }
    }

    /// Fail every outstanding request with `NotReady` and cancel deferred
    /// writes. Restartable requests survive, detached, for
    /// [`Bridge::reattach`] and [`Bridge::replay_all`]. Returns the number of
    /// rejected requests.
    pub fn reset_all(&mut self) -> usize {
        let rejected = self.registry.reject_all(|| BridgeError::NotReady);
        for id in &rejected {
            self.namespaces.forget(id);
            self.metrics.record_rejected();
        }
        self.restarts.detach_all();

        let cancelled = self.outbox.drain_where(|_| true);
        for message in &cancelled {
            let relayed = self
                .namespaces
                .get(&message.id)
                .is_some_and(|ns| ns.is_relayed());
            if relayed {
                self.emit_dapp_error(&message.id, &BridgeError::NotReady);
            }
        }
        // Relays already written will never be answered by the new container
        let released = self.namespaces.forget_relayed();
        self.held_relays.clear();

        self.metrics.record_reset();
        tracing::info!(
            rejected = rejected.len(),
            cancelled = cancelled.len(),
            released,
            restartable = self.restarts.len(),
            "Bridge reset for reload"
        );
        rejected.len()
    }

    /// Re-register a subscription under a restartable id after a reload, so
    /// that the next [`Bridge::replay_all`] reissues it.
    pub fn reattach(
        &mut self,
        id: &str,
        subscriber: Subscriber,
        on_settle: Option<SettleHook>,
    ) -> Result<ResponseFuture, BridgeError> {
        let message = self
            .restarts
            .get(id)
            .map(|r| r.message.clone())
            .ok_or_else(|| BridgeError::NotRestartable(id.to_string()))?;

        if classify(&message).is_relayed() {
            return Err(BridgeError::RelayedMessage(message));
        }

        let (completion, response) = completion_pair(on_settle);
        self.registry.register(id, completion, Some(subscriber))?;
        self.namespaces.record(id, &message);
        self.restarts.mark_reattached(id);
        tracing::debug!(id, message = %message, "Subscription reattached");
        Ok(response)
    }

    /// Reissue every reattached request and forget the ones left detached.
    /// Returns the number reissued.
    pub fn replay_all(&mut self) -> Result<usize, BridgeError> {
        if self.transport.is_none() {
            return Err(BridgeError::TransportUninitialized);
        }

        let before = self.restarts.len();
        let replay = self.restarts.take_replay();
        let dropped = before - self.restarts.len();

        for request in &replay {
            self.metrics.record_replayed();
            self.dispatch(request.to_outbound());
        }

        tracing::info!(replayed = replay.len(), dropped, "Replayed restartable requests");
        Ok(replay.len())
    }

    pub fn restartable_ids(&self) -> Vec<String> {
        self.restarts.ids()
    }

    /// Restartable ids rejected by the last reload and not reattached yet.
    pub fn detached_ids(&self) -> Vec<String> {
        self.restarts.detached_ids()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::dapp::BroadcastDappBus;
    use crate::transport::ChannelTransport;

    fn restartable(id: &str) -> RestartableRequest {
        RestartableRequest {
            id: id.into(),
            message: "pri(price.subscribe)".into(),
            request: None,
            origin: None,
        }
    }

    fn written(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[test]
    fn restart_set_replaces_in_place() {
        let mut set = RestartSet::new();
        set.insert(restartable("a"));
        set.insert(restartable("b"));
        set.insert(RestartableRequest {
            request: Some(json!(1)),
            ..restartable("a")
        });

        assert_eq!(set.ids(), vec!["a", "b"]);
        assert_eq!(set.get("a").unwrap().request, Some(json!(1)));
        assert!(set.remove("a").is_some());
        assert!(set.remove("a").is_none());
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn reset_rejects_everything_and_keeps_restartables() {
        let (transport, _rx) = ChannelTransport::new();
        let mut bridge = Bridge::builder()
            .transport(Arc::new(transport))
            .id_session("l")
            .build();
        bridge.set_status(TransportStatus::CryptoReady);

        let one_shot = bridge.send_message("pri(ping)", None, None).unwrap();
        let subscription = bridge
            .subscribe_message("pri(price.subscribe)", None, None, Box::new(|_| {}))
            .unwrap();

        assert_eq!(bridge.reset_all(), 2);
        assert_eq!(bridge.pending_count(), 0);
        assert!(matches!(one_shot.await, Err(BridgeError::NotReady)));
        assert!(matches!(subscription.response.await, Err(BridgeError::NotReady)));
        assert_eq!(bridge.restartable_ids(), vec![subscription.id.clone()]);
        assert_eq!(bridge.namespace_of(&subscription.id), None);
    }

    #[test]
    fn reset_cancels_deferred_writes() {
        let (transport, mut rx) = ChannelTransport::new();
        let mut bridge = Bridge::builder().transport(Arc::new(transport)).build();

        let _stale = bridge.send_message("pri(ping)", None, None).unwrap();
        assert_eq!(bridge.outbox_len(), 1);

        bridge.handle_lifecycle(LifecycleSignal::ReloadBegin);
        bridge.handle_lifecycle(LifecycleSignal::Status(TransportStatus::CryptoReady));

        assert_eq!(bridge.outbox_len(), 0);
        assert!(written(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn reset_notifies_pages_of_cancelled_relays() {
        let bus = Arc::new(BroadcastDappBus::new(8));
        let mut events = bus.subscribe();
        let (transport, _rx) = ChannelTransport::new();
        let mut bridge = Bridge::builder()
            .transport(Arc::new(transport))
            .dapp_bus(bus)
            .build();

        bridge
            .post_message(
                OutboundMessage {
                    id: "page.3".into(),
                    message: "evm(request)".into(),
                    request: None,
                    origin: Some("https://dapp.example".into()),
                },
                false,
            )
            .unwrap();

        bridge.reset_all();

        let event = events.recv().await.unwrap();
        assert_eq!(event.id, "page.3");
        assert!(event.raw.contains("transport is not ready"));
        assert_eq!(bridge.namespace_of("page.3"), None);
    }

    #[tokio::test]
    async fn replay_reissues_only_reattached_subscriptions() {
        let (transport, mut rx) = ChannelTransport::new();
        let mut bridge = Bridge::builder()
            .transport(Arc::new(transport))
            .id_session("l")
            .build();
        bridge.set_status(TransportStatus::CryptoReady);

        let kept = bridge
            .subscribe_message("pri(price.subscribe)", Some(json!(["dot"])), None, Box::new(|_| {}))
            .unwrap();
        let abandoned = bridge
            .subscribe_message("pri(balance.subscribe)", None, None, Box::new(|_| {}))
            .unwrap();
        written(&mut rx);

        bridge.handle_lifecycle(LifecycleSignal::ReloadBegin);
        bridge.handle_lifecycle(LifecycleSignal::Status(TransportStatus::Load));

        let (tx, mut values) = mpsc::unbounded_channel();
        let mut reattached = bridge
            .reattach(
                &kept.id,
                Box::new(move |v| {
                    let _ = tx.send(v);
                }),
                None,
            )
            .unwrap();

        assert!(bridge.detached_ids().contains(&abandoned.id));
        assert_eq!(bridge.replay_all().unwrap(), 1);
        assert_eq!(bridge.restartable_ids(), vec![kept.id.clone()]);
        assert!(bridge.detached_ids().is_empty());
        // Not ready yet: the replay is deferred
        assert!(written(&mut rx).is_empty());

        bridge.set_status(TransportStatus::CryptoReady);
        let frames = written(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, kept.id);
        assert_eq!(frames[0].request, Some(json!(["dot"])));

        bridge.listen_message(&json!({ "id": kept.id, "response": 1 }).to_string());
        bridge.listen_message(&json!({ "id": kept.id, "subscription": 2 }).to_string());
        assert_eq!(reattached.try_result().unwrap().unwrap(), json!(1));
        assert_eq!(values.recv().await, Some(json!(2)));

        let err = bridge
            .reattach(&abandoned.id, Box::new(|_| {}), None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotRestartable(_)));
    }

    #[test]
    fn take_replay_drops_detached_and_keeps_live() {
        let mut set = RestartSet::new();
        set.insert(restartable("a"));
        set.insert(restartable("b"));
        set.detach_all();
        set.insert(restartable("c"));
        set.mark_reattached("b");

        assert_eq!(set.detached_ids(), vec!["a"]);
        let replay: Vec<_> = set.take_replay().into_iter().map(|r| r.id).collect();
        assert_eq!(replay, vec!["b"]);
        assert_eq!(set.ids(), vec!["b", "c"]);
        // Replayed entries are live again
        assert!(set.take_replay().is_empty());
    }

    #[test]
    fn replay_without_transport_fails() {
        let mut bridge = Bridge::new();
        assert!(matches!(
            bridge.replay_all(),
            Err(BridgeError::TransportUninitialized)
        ));
    }

    #[test]
    fn reattach_twice_is_duplicate() {
        let (transport, _rx) = ChannelTransport::new();
        let mut bridge = Bridge::builder().transport(Arc::new(transport)).build();
        let subscription = bridge
            .subscribe_message("pri(price.subscribe)", None, None, Box::new(|_| {}))
            .unwrap();
        bridge.reset_all();

        bridge
            .reattach(&subscription.id, Box::new(|_| {}), None)
            .unwrap();
        let err = bridge
            .reattach(&subscription.id, Box::new(|_| {}), None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateCorrelation(_)));
    }
}
