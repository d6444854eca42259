use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::{oneshot, watch};

use crate::config::BridgeConfig;
use crate::dapp::DappEventBus;
use crate::dispatch::Outbox;
use crate::error::BridgeError;
use crate::id::IdGenerator;
use crate::lifecycle::RestartSet;
use crate::message::{InboundMessage, OutboundMessage};
use crate::metrics::BridgeMetrics;
use crate::namespace::{Namespace, NamespaceMap, classify};
use crate::registry::{Completion, Registry, Subscriber};
use crate::status::{DEFAULT_MAINTENANCE_PREFIX, StatusTracker, TransportStatus};
use crate::transport::Transport;

/// Called for inbound replies whose id matches nothing. Return `true` to
/// claim the message; unclaimed messages are logged and dropped.
pub type UnknownHook = Box<dyn FnMut(&InboundMessage) -> bool + Send>;

/// Called with the first successful response of a subscription.
pub type SettleHook = Box<dyn FnOnce(Value) + Send>;

pub const DEFAULT_CANCEL_MESSAGE: &str = "pri(subscription.cancel)";

/// Resolves with the reply for one correlation id.
///
/// Resolves with [`BridgeError::Closed`] if the bridge is dropped first.
#[derive(Debug)]
pub struct ResponseFuture {
    rx: oneshot::Receiver<Result<Value, BridgeError>>,
}

impl ResponseFuture {
    /// Take the result if the request has already settled.
    pub fn try_result(&mut self) -> Option<Result<Value, BridgeError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(BridgeError::Closed)),
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(BridgeError::Closed)))
    }
}

/// A live subscription: its correlation id (for `unsubscribe`) and the future
/// settled by its initial response.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub response: ResponseFuture,
}

/// Build a completion that settles a fresh [`ResponseFuture`], optionally
/// running `on_settle` with a successful value first.
pub(crate) fn completion_pair(on_settle: Option<SettleHook>) -> (Completion, ResponseFuture) {
    let (tx, rx) = oneshot::channel();
    let completion: Completion = Box::new(move |result: Result<Value, BridgeError>| {
        if let (Some(hook), Ok(value)) = (on_settle, &result) {
            hook(value.clone());
        }
        // The caller may have dropped the future; that is fine.
        let _ = tx.send(result);
    });
    (completion, ResponseFuture { rx })
}

/// The message bridge between the UI process and the runtime container.
///
/// `Bridge` is an owned, synchronous state machine: every operation runs to
/// completion without awaiting. Share it across tasks with
/// [`BridgeHandle`](crate::handle::BridgeHandle).
pub struct Bridge {
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) status: StatusTracker,
    pub(crate) registry: Registry,
    pub(crate) namespaces: NamespaceMap,
    /// Relayed ids kept routable past their first response.
    pub(crate) held_relays: HashSet<String>,
    pub(crate) restarts: RestartSet,
    pub(crate) outbox: Outbox,
    pub(crate) dapp_bus: Option<Arc<dyn DappEventBus>>,
    pub(crate) on_unknown: Option<UnknownHook>,
    pub(crate) metrics: Arc<BridgeMetrics>,
    ids: IdGenerator,
    cancel_message: String,
}

impl Bridge {
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::default()
    }

    /// A bridge with default settings and no transport attached yet.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn attach_transport(&mut self, transport: Arc<dyn Transport>) {
        tracing::info!("Transport attached");
        self.transport = Some(transport);
    }

    pub fn status(&self) -> TransportStatus {
        self.status.current()
    }

    pub fn on_status_change(&self) -> watch::Receiver<TransportStatus> {
        self.status.on_status_change()
    }

    /// Push a status transition; drains the outbox if writes became legal.
    pub fn set_status(&mut self, status: TransportStatus) {
        if self.status.set(status).is_some() {
            self.flush_outbox();
        }
    }

    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn next_id(&mut self) -> String {
        self.ids.next_id()
    }

    /// Send a request. With a `subscriber` the request becomes a restartable
    /// subscription whose streamed values go to the subscriber.
    pub fn send_message(
        &mut self,
        message: &str,
        request: Option<Value>,
        subscriber: Option<Subscriber>,
    ) -> Result<ResponseFuture, BridgeError> {
        let id = self.ids.next_id();
        let (completion, response) = completion_pair(None);
        self.send_with(&id, message, request, None, completion, subscriber)?;
        Ok(response)
    }

    /// Send a request with an explicit id and origin.
    ///
    /// Only for messages answered through the registry. Relayed (`pub(`,
    /// `evm(`) messages are refused with [`BridgeError::RelayedMessage`];
    /// post those with [`Bridge::post_message`] and read the replies from the
    /// dApp event bus.
    pub fn send_with_id(
        &mut self,
        id: &str,
        message: &str,
        request: Option<Value>,
        origin: Option<String>,
        subscriber: Option<Subscriber>,
    ) -> Result<ResponseFuture, BridgeError> {
        let (completion, response) = completion_pair(None);
        self.send_with(id, message, request, origin, completion, subscriber)?;
        Ok(response)
    }

    /// Start a subscription. `on_settle` runs with the initial response.
    pub fn subscribe_message(
        &mut self,
        message: &str,
        request: Option<Value>,
        on_settle: Option<SettleHook>,
        subscriber: Subscriber,
    ) -> Result<Subscription, BridgeError> {
        let id = self.ids.next_id();
        let (completion, response) = completion_pair(on_settle);
        self.send_with(&id, message, request, None, completion, Some(subscriber))?;
        Ok(Subscription { id, response })
    }

    /// Cancel a subscription locally and ask the container to stop it.
    ///
    /// Local cleanup happens first and always succeeds; the subscription's
    /// future settles with `Value::Null` if it had not settled yet. Returns
    /// `false` if `id` was not registered.
    pub fn unsubscribe(&mut self, id: &str) -> bool {
        let Some(mut entry) = self.registry.unregister(id) else {
            tracing::debug!(id, "Unsubscribe for unknown id");
            return false;
        };
        self.restarts.remove(id);
        self.namespaces.forget(id);
        entry.settle(Ok(Value::Null));

        if self.outbox.remove(id) {
            // Never reached the container, nothing to cancel there
            tracing::debug!(id, "Unsubscribed before dispatch");
            return true;
        }

        let cancel_id = self.ids.next_id();
        let subscription_id = id.to_string();
        let completion: Completion = Box::new(move |result: Result<Value, BridgeError>| match result {
            Ok(_) => tracing::debug!(id = %subscription_id, "Subscription cancelled remotely"),
            Err(e) => tracing::debug!(id = %subscription_id, error = %e, "Remote cancel failed"),
        });
        let cancel_message = self.cancel_message.clone();
        if let Err(e) = self.send_with(
            &cancel_id,
            &cancel_message,
            Some(Value::String(id.to_string())),
            None,
            completion,
            None,
        ) {
            tracing::warn!(id, error = %e, "Could not send subscription cancel");
        }
        true
    }

    fn send_with(
        &mut self,
        id: &str,
        message: &str,
        request: Option<Value>,
        origin: Option<String>,
        completion: Completion,
        subscriber: Option<Subscriber>,
    ) -> Result<(), BridgeError> {
        if self.transport.is_none() {
            return Err(BridgeError::TransportUninitialized);
        }
        if classify(message).is_relayed() {
            return Err(BridgeError::RelayedMessage(message.to_string()));
        }

        let support_restart = subscriber.is_some();
        self.registry.register(id, completion, subscriber)?;
        self.post_message(
            OutboundMessage {
                id: id.to_string(),
                message: message.to_string(),
                request,
                origin,
            },
            support_restart,
        )
    }

    /// Keep a relayed id routable after its first `response`, for relayed
    /// subscriptions that keep streaming. Returns `false` if `id` is not a
    /// relayed request in flight.
    pub fn hold_relayed(&mut self, id: &str) -> bool {
        if !self.namespaces.get(id).is_some_and(|ns| ns.is_relayed()) {
            return false;
        }
        self.held_relays.insert(id.to_string());
        true
    }

    /// Stop routing replies for a relayed id. Returns `false` if nothing was
    /// tracked for it.
    pub fn release_relayed(&mut self, id: &str) -> bool {
        self.held_relays.remove(id);
        if !self.namespaces.get(id).is_some_and(|ns| ns.is_relayed()) {
            return false;
        }
        self.namespaces.forget(id);
        tracing::debug!(id, "Relayed request released");
        true
    }

    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    pub fn namespace_of(&self, id: &str) -> Option<Namespace> {
        self.namespaces.get(id)
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Bridge`].
pub struct BridgeBuilder {
    transport: Option<Arc<dyn Transport>>,
    maintenance_prefix: String,
    cancel_message: String,
    dapp_bus: Option<Arc<dyn DappEventBus>>,
    on_unknown: Option<UnknownHook>,
    metrics: Option<Arc<BridgeMetrics>>,
    id_session: Option<String>,
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            maintenance_prefix: DEFAULT_MAINTENANCE_PREFIX.into(),
            cancel_message: DEFAULT_CANCEL_MESSAGE.into(),
            dapp_bus: None,
            on_unknown: None,
            metrics: None,
            id_session: None,
        }
    }
}

impl BridgeBuilder {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::default()
            .maintenance_prefix(config.maintenance_prefix.clone())
            .cancel_message(config.cancel_message.clone())
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn maintenance_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.maintenance_prefix = prefix.into();
        self
    }

    pub fn cancel_message(mut self, message: impl Into<String>) -> Self {
        self.cancel_message = message.into();
        self
    }

    pub fn dapp_bus(mut self, bus: Arc<dyn DappEventBus>) -> Self {
        self.dapp_bus = Some(bus);
        self
    }

    pub fn on_unknown(mut self, hook: UnknownHook) -> Self {
        self.on_unknown = Some(hook);
        self
    }

    pub fn metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fix the correlation id session token (useful for deterministic tests).
    pub fn id_session(mut self, session: impl Into<String>) -> Self {
        self.id_session = Some(session.into());
        self
    }

    pub fn build(self) -> Bridge {
        let ids = match self.id_session {
            Some(session) => IdGenerator::with_session(session),
            None => IdGenerator::new(),
        };
        Bridge {
            transport: self.transport,
            status: StatusTracker::with_maintenance_prefix(self.maintenance_prefix),
            registry: Registry::new(),
            namespaces: NamespaceMap::new(),
            held_relays: HashSet::new(),
            restarts: RestartSet::new(),
            outbox: Outbox::new(),
            dapp_bus: self.dapp_bus,
            on_unknown: self.on_unknown,
            metrics: self.metrics.unwrap_or_default(),
            ids,
            cancel_message: self.cancel_message,
        }
    }
}
