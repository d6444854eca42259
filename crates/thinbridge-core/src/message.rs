//! Wire types exchanged with the runtime container.
//!
//! Every frame is a single JSON object. Outbound frames carry a request;
//! inbound frames are either replies keyed by correlation id or lifecycle
//! status frames.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::status::TransportStatus;

/// A request written to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// A reply posted by the container for one correlation id.
///
/// Fields are `Some` when present on the wire, including an explicit JSON
/// `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Value>,
}

impl InboundMessage {
    pub fn response(id: impl Into<String>, response: Value) -> Self {
        Self {
            id: id.into(),
            response: Some(response),
            error: None,
            subscription: None,
        }
    }

    pub fn error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response: None,
            error: Some(error.into()),
            subscription: None,
        }
    }

    pub fn subscription(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            response: None,
            error: None,
            subscription: Some(value),
        }
    }

    /// Whether the frame carries any reply payload at all.
    pub fn has_payload(&self) -> bool {
        self.response.is_some() || self.error.is_some() || self.subscription.is_some()
    }
}

/// Lifecycle frame announcing a container status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    pub status: TransportStatus,
}

/// Any frame the container may post.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    Message(InboundMessage),
    Status(StatusFrame),
}

impl InboundFrame {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

// Missing fields fall back to `None` via `#[serde(default)]`; a present field,
// even `null`, becomes `Some`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
