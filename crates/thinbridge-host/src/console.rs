//! JSON-lines console: request lines in on stdin, events out on stdout.
//!
//! Request lines:
//!
//! ```text
//! {"message": "pri(accounts.list)", "request": {...}}
//! {"message": "pri(price.subscribe)", "subscribe": true}
//! {"message": "evm(request)", "request": {...}, "origin": "https://dapp.example"}
//! {"unsubscribe": "<id>"}
//! ```
//!
//! Relayed messages (`pub(`/`evm(`) are posted without a pending entry; their
//! replies come back as `dapp` events. A relayed line with `"subscribe": true`
//! stays routable until it is unsubscribed.

use std::io::{BufRead, Write};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thinbridge_core::{
    BridgeError, BridgeHandle, DappEvent, OutboundMessage, Subscriber, TransportStatus, classify,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;

#[derive(Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConsoleRequest {
    Unsubscribe {
        unsubscribe: String,
    },
    Send {
        message: String,
        #[serde(default)]
        request: Option<Value>,
        #[serde(default)]
        subscribe: bool,
        #[serde(default)]
        origin: Option<String>,
    },
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConsoleEvent {
    Response {
        id: String,
        response: Value,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: String,
    },
    Subscribed {
        id: String,
    },
    Stream {
        id: String,
        value: Value,
    },
    Unsubscribed {
        id: String,
        found: bool,
    },
    Relayed {
        id: String,
    },
    Dapp {
        id: String,
        raw: Value,
    },
    Status {
        status: TransportStatus,
    },
    Replayed {
        count: usize,
    },
}

impl ConsoleEvent {
    fn settled(id: String, result: Result<Value, BridgeError>) -> Self {
        match result {
            Ok(response) => Self::Response { id, response },
            Err(e) => Self::Error {
                id: Some(id),
                error: e.to_string(),
            },
        }
    }
}

/// Write one event as a JSON line on stdout.
pub fn emit(event: &ConsoleEvent) {
    let line = match serde_json::to_string(event) {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize console event");
            return;
        }
    };
    let mut out = std::io::stdout().lock();
    if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
        tracing::debug!(error = %e, "Failed to write console event");
    }
}

fn stream_subscriber(id: String) -> Subscriber {
    Box::new(move |value: Value| {
        emit(&ConsoleEvent::Stream {
            id: id.clone(),
            value,
        })
    })
}

/// Read stdin on a plain thread: a blocking read cannot be cancelled, and a
/// thread stuck in one must not hold up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read console input");
                    break;
                }
            }
        }
    });
    rx
}

/// Serve request lines until stdin closes, then wait for the replies still
/// in flight.
pub async fn run_console(handle: BridgeHandle) -> Result<()> {
    let mut lines = spawn_stdin_reader();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ConsoleRequest>(line) {
            Ok(request) => handle_request(&handle, request, &mut in_flight).await,
            Err(e) => emit(&ConsoleEvent::Error {
                id: None,
                error: format!("invalid request line: {e}"),
            }),
        }
    }

    tracing::info!(in_flight = in_flight.len(), "Console input closed, waiting for replies");
    while in_flight.join_next().await.is_some() {}
    Ok(())
}

async fn handle_request(handle: &BridgeHandle, request: ConsoleRequest, in_flight: &mut JoinSet<()>) {
    let (message, request, subscribe, origin) = match request {
        ConsoleRequest::Unsubscribe { unsubscribe: id } => {
            let found = handle.unsubscribe(&id).await || handle.release_relayed(&id).await;
            emit(&ConsoleEvent::Unsubscribed { id, found });
            return;
        }
        ConsoleRequest::Send {
            message,
            request,
            subscribe,
            origin,
        } => (message, request, subscribe, origin),
    };

    let mut bridge = handle.lock().await;
    let id = bridge.next_id();

    if classify(&message).is_relayed() {
        let outbound = OutboundMessage {
            id: id.clone(),
            message,
            request,
            origin,
        };
        match bridge.post_message(outbound, false) {
            Ok(()) => {
                if subscribe {
                    bridge.hold_relayed(&id);
                }
                emit(&ConsoleEvent::Relayed { id });
            }
            Err(e) => emit(&ConsoleEvent::Error {
                id: Some(id),
                error: e.to_string(),
            }),
        }
        return;
    }

    let subscriber = subscribe.then(|| stream_subscriber(id.clone()));
    match bridge.send_with_id(&id, &message, request, origin, subscriber) {
        Ok(response) => {
            if subscribe {
                emit(&ConsoleEvent::Subscribed { id: id.clone() });
            }
            in_flight.spawn(async move {
                emit(&ConsoleEvent::settled(id, response.await));
            });
        }
        Err(e) => emit(&ConsoleEvent::Error {
            id: Some(id),
            error: e.to_string(),
        }),
    }
}

/// Print relayed replies as `dapp` events.
pub async fn forward_dapp_events(mut events: broadcast::Receiver<DappEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let raw = serde_json::from_str(&event.raw)
                    .unwrap_or_else(|_| Value::String(event.raw.clone()));
                emit(&ConsoleEvent::Dapp { id: event.id, raw });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "dApp event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Print status transitions and, with `replay_on_ready`, bring back the
/// subscriptions a reload detached once the container is ready again.
pub async fn watch_status(
    handle: BridgeHandle,
    mut status: watch::Receiver<TransportStatus>,
    replay_on_ready: bool,
) {
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        emit(&ConsoleEvent::Status { status: current });

        if replay_on_ready && current == TransportStatus::CryptoReady {
            match replay_detached(&handle).await {
                Ok(0) => {}
                Ok(count) => emit(&ConsoleEvent::Replayed { count }),
                Err(e) => tracing::warn!(error = %e, "Replay after reload failed"),
            }
        }
    }
}

/// Reattach every detached subscription with a printing subscriber and
/// replay them. Returns the number reissued.
pub async fn replay_detached(handle: &BridgeHandle) -> Result<usize, BridgeError> {
    let mut bridge = handle.lock().await;
    let detached = bridge.detached_ids();
    if detached.is_empty() {
        return Ok(0);
    }

    for id in detached {
        match bridge.reattach(&id, stream_subscriber(id.clone()), None) {
            Ok(response) => {
                tokio::spawn(async move {
                    emit(&ConsoleEvent::settled(id, response.await));
                });
            }
            Err(e) => tracing::warn!(id = %id, error = %e, "Could not reattach subscription"),
        }
    }
    bridge.replay_all()
}
