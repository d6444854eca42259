use serde_json::Value;

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::lifecycle::LifecycleSignal;
use crate::message::{InboundFrame, InboundMessage};
use crate::registry::Delivery;
use crate::status::TransportStatus;

impl Bridge {
    /// The single ingress point for raw frames posted by the container.
    ///
    /// Replies are routed by [`Bridge::route`]. Status frames become
    /// lifecycle signals; a `reloading` frame begins a reload. Malformed
    /// frames are logged and dropped.
    pub fn listen_message(&mut self, raw: &str) {
        match InboundFrame::parse(raw) {
            Ok(InboundFrame::Message(message)) => self.route(message),
            Ok(InboundFrame::Status(frame)) => {
                if frame.status == TransportStatus::Reloading {
                    self.handle_lifecycle(LifecycleSignal::ReloadBegin);
                }
                self.handle_lifecycle(LifecycleSignal::Status(frame.status));
            }
            Err(e) => {
                tracing::warn!(error = %e, len = raw.len(), "Dropping malformed inbound frame");
            }
        }
    }

    /// Deliver one reply to exactly one destination.
    pub fn route(&mut self, message: InboundMessage) {
        let relayed = self
            .namespaces
            .get(&message.id)
            .is_some_and(|ns| ns.is_relayed());
        if relayed && message.has_payload() {
            self.forward_to_dapp(&message);
            let finished = message.error.is_some()
                || (message.subscription.is_none() && !self.held_relays.contains(&message.id));
            if finished {
                self.held_relays.remove(&message.id);
                self.namespaces.forget(&message.id);
            }
            return;
        }

        if !self.registry.contains(&message.id) {
            self.handle_unknown(&message);
            return;
        }

        let InboundMessage {
            id,
            response,
            error,
            subscription,
        } = message;

        let delivery = if let Some(value) = subscription {
            self.metrics.record_streamed();
            tracing::trace!(id = %id, "Streaming subscription value");
            self.registry.stream(&id, value)
        } else if let Some(error) = error {
            self.metrics.record_rejected();
            tracing::debug!(id = %id, error = %error, "Remote error");
            self.registry.reject_one(&id, BridgeError::Remote(error))
        } else {
            self.metrics.record_resolved();
            tracing::debug!(id = %id, "Response received");
            self.registry
                .resolve_one(&id, response.unwrap_or(Value::Null))
        };

        if delivery == Delivery::Removed {
            self.namespaces.forget(&id);
            self.restarts.remove(&id);
        }
    }

    fn forward_to_dapp(&self, message: &InboundMessage) {
        let Some(bus) = self.dapp_bus.as_ref() else {
            tracing::warn!(id = %message.id, "No dApp bus configured, relayed reply dropped");
            return;
        };
        match serde_json::to_string(message) {
            Ok(raw) => {
                tracing::debug!(id = %message.id, "Forwarding relayed reply to dApp bus");
                bus.emit(&message.id, raw);
                self.metrics.record_dapp_forwarded();
            }
            Err(e) => tracing::warn!(id = %message.id, error = %e, "Failed to serialize relayed reply"),
        }
    }

    fn handle_unknown(&mut self, message: &InboundMessage) {
        if let Some(hook) = self.on_unknown.as_mut()
            && hook(message)
        {
            return;
        }
        self.metrics.record_unknown();
        let error = BridgeError::UnknownCorrelation(message.id.clone());
        tracing::debug!(error = %error, "Dropping inbound message");
    }
}
