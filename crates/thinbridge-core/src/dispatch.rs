//! Outbound dispatch: writes frames when the transport allows it and keeps a
//! FIFO outbox of deferred writes otherwise.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::lifecycle::RestartableRequest;
use crate::message::{InboundMessage, OutboundMessage};
use crate::registry::Delivery;

/// Deferred writes, kept in the order they were requested.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<OutboundMessage>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: OutboundMessage) {
        self.queue.push_back(message);
    }

    /// Remove and return every queued message matching `pred`, in queue
    /// order. Messages left behind keep their relative order.
    pub fn drain_where<F>(&mut self, mut pred: F) -> Vec<OutboundMessage>
    where
        F: FnMut(&OutboundMessage) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for message in self.queue.drain(..) {
            if pred(&message) {
                taken.push(message);
            } else {
                kept.push_back(message);
            }
        }
        self.queue = kept;
        taken
    }

    /// Drop any queued write for `id`. Returns whether one was queued.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.queue.len();
        self.queue.retain(|message| message.id != id);
        self.queue.len() != before
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Bridge {
    /// Dispatch a frame without registering a pending entry.
    ///
    /// Records the namespace of `message.id` and, with `support_restart`,
    /// keeps the request for replay. Relayed (`pub(`/`evm(`) requests use this
    /// directly; their replies are delivered on the dApp event bus.
    pub fn post_message(
        &mut self,
        message: OutboundMessage,
        support_restart: bool,
    ) -> Result<(), BridgeError> {
        if self.transport.is_none() {
            return Err(BridgeError::TransportUninitialized);
        }

        self.namespaces.record(&message.id, &message.message);
        if support_restart {
            self.restarts.insert(RestartableRequest::from(&message));
        }
        self.dispatch(message);
        Ok(())
    }

    /// Write now if allowed, otherwise defer to the outbox.
    pub(crate) fn dispatch(&mut self, message: OutboundMessage) {
        if self.status.can_send(&message.message) {
            self.write(message);
        } else {
            tracing::debug!(
                id = %message.id,
                message = %message.message,
                status = %self.status.current(),
                "Transport not ready, deferring write"
            );
            self.metrics.record_deferred();
            self.outbox.push(message);
        }
    }

    /// Write every deferred message that the current status allows.
    pub(crate) fn flush_outbox(&mut self) {
        let status = &self.status;
        let ready = self
            .outbox
            .drain_where(|message| status.can_send(&message.message));
        if ready.is_empty() {
            return;
        }

        tracing::info!(
            count = ready.len(),
            remaining = self.outbox.len(),
            "Flushing deferred writes"
        );
        for message in ready {
            self.write(message);
        }
    }

    fn write(&mut self, message: OutboundMessage) {
        let Some(transport) = self.transport.as_ref().map(Arc::clone) else {
            self.fail_write(&message.id, BridgeError::TransportUninitialized);
            return;
        };

        let result = serde_json::to_string(&message)
            .map_err(BridgeError::from)
            .and_then(|frame| transport.post(frame));

        match result {
            Ok(()) => {
                self.metrics.record_sent();
                tracing::debug!(id = %message.id, message = %message.message, "Message written");
            }
            Err(e) => {
                tracing::warn!(id = %message.id, error = %e, "Transport write failed");
                self.fail_write(&message.id, e);
            }
        }
    }

    fn fail_write(&mut self, id: &str, error: BridgeError) {
        let relayed = self.namespaces.get(id).is_some_and(|ns| ns.is_relayed());
        if relayed && !self.registry.contains(id) {
            self.emit_dapp_error(id, &error);
            self.namespaces.forget(id);
            self.held_relays.remove(id);
            return;
        }

        if self.registry.reject_one(id, error) == Delivery::Removed {
            self.metrics.record_rejected();
            self.namespaces.forget(id);
            self.restarts.remove(id);
        }
    }

    /// Tell the page behind a relayed request that it will get no reply.
    pub(crate) fn emit_dapp_error(&self, id: &str, error: &BridgeError) {
        let Some(bus) = self.dapp_bus.as_ref() else {
            tracing::warn!(id, "No dApp bus configured, relayed failure dropped");
            return;
        };
        match serde_json::to_string(&InboundMessage::error(id, error.to_string())) {
            Ok(raw) => {
                bus.emit(id, raw);
                self.metrics.record_dapp_forwarded();
            }
            Err(e) => tracing::warn!(id, error = %e, "Failed to serialize dApp error"),
        }
    }
}
