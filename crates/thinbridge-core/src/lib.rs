//! Message bridge between a thin wallet UI and its sandboxed runtime
//! container.
//!
//! The container is reached through one bidirectional channel of JSON
//! frames. [`Bridge`] turns that channel into:
//!
//! - one-shot requests answered through a [`ResponseFuture`],
//! - subscriptions streaming values to a subscriber until unsubscribed,
//! - a pass-through path for replies to requests relayed on behalf of
//!   in-app browser pages ([`DappEventBus`]).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use thinbridge_core::{Bridge, ChannelTransport, TransportStatus};
//!
//! # async fn run() -> Result<(), thinbridge_core::BridgeError> {
//! let (transport, mut frames) = ChannelTransport::new();
//! let mut bridge = Bridge::builder().transport(Arc::new(transport)).build();
//!
//! // Deferred until the container reports ready
//! let reply = bridge.send_message("pri(accounts.list)", None, None)?;
//! bridge.set_status(TransportStatus::CryptoReady);
//!
//! let written = frames.recv().await;
//! // ...the container answers with {"id": ..., "response": ...}
//! # let _ = written;
//! bridge.listen_message(r#"{"id":"...","response":[]}"#);
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod dapp;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod id;
pub mod lifecycle;
pub mod message;
pub mod metrics;
pub mod namespace;
pub mod registry;
pub mod router;
pub mod status;
pub mod transport;

pub use bridge::{Bridge, BridgeBuilder, ResponseFuture, SettleHook, Subscription, UnknownHook};
pub use config::ThinbridgeConfig;
pub use dapp::{BroadcastDappBus, DappEvent, DappEventBus};
pub use error::{BridgeError, ConfigError};
pub use handle::BridgeHandle;
pub use lifecycle::{LifecycleSignal, RestartableRequest};
pub use message::{InboundFrame, InboundMessage, OutboundMessage};
pub use metrics::{BridgeMetrics, LoggingMetricsBackend, MetricsBackend};
pub use namespace::{Namespace, classify};
pub use registry::Subscriber;
pub use status::{StatusTracker, TransportStatus};
pub use transport::{ChannelTransport, Transport};
