//! End-to-end behaviour of the bridge through its public API.
//!
//! Every test wires a [`Bridge`] to a [`ChannelTransport`] and plays the
//! container's part by reading written frames and feeding replies back
//! through `listen_message`.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use thinbridge_core::{
    Bridge, BridgeError, BroadcastDappBus, ChannelTransport, LifecycleSignal, OutboundMessage,
    TransportStatus,
};

fn bridge() -> (Bridge, mpsc::UnboundedReceiver<String>) {
    let (transport, rx) = ChannelTransport::new();
    let bridge = Bridge::builder()
        .transport(Arc::new(transport))
        .id_session("it")
        .build();
    (bridge, rx)
}

fn ready_bridge() -> (Bridge, mpsc::UnboundedReceiver<String>) {
    let (mut bridge, rx) = bridge();
    bridge.set_status(TransportStatus::CryptoReady);
    (bridge, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<OutboundMessage> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame).expect("outbound frame is valid JSON"));
    }
    frames
}

fn collecting_subscriber() -> (Arc<Mutex<Vec<Value>>>, thinbridge_core::Subscriber) {
    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&values);
    (values, Box::new(move |v: Value| sink.lock().unwrap().push(v)))
}

// ── Settlement ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn response_settles_exactly_once() {
    let (mut bridge, mut rx) = ready_bridge();
    let response = bridge
        .send_message("pri(accounts.list)", Some(json!({ "all": true })), None)
        .unwrap();
    let frame = drain(&mut rx).remove(0);

    let reply = json!({ "id": frame.id, "response": [{ "address": "5F..." }] }).to_string();
    bridge.listen_message(&reply);
    // A duplicate reply finds nothing to settle
    bridge.listen_message(&reply);
    bridge.listen_message(&json!({ "id": frame.id, "error": "late" }).to_string());

    assert_eq!(response.await.unwrap(), json!([{ "address": "5F..." }]));
    assert_eq!(bridge.pending_count(), 0);
    assert_eq!(bridge.metrics().snapshot().unknown, 2);
}

#[tokio::test]
async fn remote_error_reaches_the_caller() {
    let (mut bridge, mut rx) = ready_bridge();
    let response = bridge.send_message("pri(signing.approve)", None, None).unwrap();
    let id = drain(&mut rx).remove(0).id;

    bridge.listen_message(&json!({ "id": id, "error": "Rejected by user" }).to_string());

    match response.await {
        Err(BridgeError::Remote(reason)) => assert_eq!(reason, "Rejected by user"),
        other => panic!("expected a remote error, got {other:?}"),
    }
}

// ── Subscriptions ────────────────────────────────────────────────────────────

#[tokio::test]
async fn subscription_streams_in_order_and_survives() {
    let (mut bridge, _rx) = ready_bridge();
    let (values, subscriber) = collecting_subscriber();
    let subscription = bridge
        .subscribe_message("pri(price.subscribe)", None, None, subscriber)
        .unwrap();
    let id = subscription.id.clone();

    bridge.listen_message(&json!({ "id": id, "response": "ok" }).to_string());
    for n in 1..=3 {
        bridge.listen_message(&json!({ "id": id, "subscription": n }).to_string());
    }

    assert_eq!(subscription.response.await.unwrap(), json!("ok"));
    assert_eq!(*values.lock().unwrap(), vec![json!(1), json!(2), json!(3)]);
    assert!(bridge.is_pending(&id));
}

#[tokio::test]
async fn unsubscribe_cleans_up_and_cancels_remotely() {
    let (mut bridge, mut rx) = ready_bridge();
    let (values, subscriber) = collecting_subscriber();
    let subscription = bridge
        .subscribe_message("pri(balance.subscribe)", None, None, subscriber)
        .unwrap();
    let id = subscription.id.clone();
    drain(&mut rx);

    assert!(bridge.unsubscribe(&id));
    assert_eq!(subscription.response.await.unwrap(), Value::Null);
    assert!(!bridge.is_pending(&id));
    assert!(bridge.restartable_ids().is_empty());

    let cancel = drain(&mut rx);
    assert_eq!(cancel.len(), 1);
    assert_eq!(cancel[0].message, "pri(subscription.cancel)");
    assert_eq!(cancel[0].request, Some(json!(id)));

    // Values arriving after unsubscribe are not delivered
    bridge.listen_message(&json!({ "id": id, "subscription": 9 }).to_string());
    assert!(values.lock().unwrap().is_empty());
}

// ── Status gating ────────────────────────────────────────────────────────────

#[test]
fn deferred_writes_go_out_once_in_request_order() {
    let (mut bridge, mut rx) = bridge();
    let _a = bridge
        .send_message("pri(a)", Some(json!({ "n": 1 })), None)
        .unwrap();
    let _b = bridge.send_message("pri(b)", None, None).unwrap();
    assert!(drain(&mut rx).is_empty());

    bridge.set_status(TransportStatus::Load);
    assert!(drain(&mut rx).is_empty());

    bridge.set_status(TransportStatus::CryptoReady);
    let frames = drain(&mut rx);
    assert_eq!(
        frames.iter().map(|f| f.message.as_str()).collect::<Vec<_>>(),
        vec!["pri(a)", "pri(b)"]
    );
    assert_eq!(frames[0].request, Some(json!({ "n": 1 })));

    bridge.set_status(TransportStatus::Load);
    bridge.set_status(TransportStatus::CryptoReady);
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn maintenance_messages_pass_while_awaiting_restore() {
    let (mut bridge, mut rx) = bridge();
    bridge.set_status(TransportStatus::RequireRestore);

    let _restore = bridge.send_message("mobile(restore)", None, None).unwrap();
    let _accounts = bridge.send_message("pri(accounts.list)", None, None).unwrap();

    let written = drain(&mut rx);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].message, "mobile(restore)");
    assert_eq!(bridge.outbox_len(), 1);
}

#[test]
fn send_without_transport_leaves_no_state() {
    let mut bridge = Bridge::new();
    let err = bridge.send_message("pri(ping)", None, None).unwrap_err();

    assert!(matches!(err, BridgeError::TransportUninitialized));
    assert_eq!(bridge.pending_count(), 0);
    assert_eq!(bridge.outbox_len(), 0);
    assert!(bridge.restartable_ids().is_empty());
}

// ── Reload and replay ────────────────────────────────────────────────────────

#[tokio::test]
async fn reload_rejects_all_outstanding_requests() {
    let (mut bridge, mut rx) = ready_bridge();
    let responses: Vec<_> = (0..3)
        .map(|i| {
            bridge
                .send_message(&format!("pri(op.{i})"), None, None)
                .unwrap()
        })
        .collect();
    let (values, subscriber) = collecting_subscriber();
    let subscription = bridge
        .subscribe_message("pri(price.subscribe)", None, None, subscriber)
        .unwrap();
    let ids: Vec<_> = drain(&mut rx).into_iter().map(|f| f.id).collect();
    assert_eq!(ids.len(), 4);

    bridge.listen_message(r#"{"status":"reloading"}"#);
    assert_eq!(bridge.status(), TransportStatus::Reloading);
    assert_eq!(bridge.pending_count(), 0);

    for response in responses {
        assert!(matches!(response.await, Err(BridgeError::NotReady)));
    }
    assert!(matches!(subscription.response.await, Err(BridgeError::NotReady)));

    for id in &ids {
        bridge.listen_message(&json!({ "id": id, "response": 1 }).to_string());
    }
    bridge.listen_message(&json!({ "id": subscription.id, "subscription": 42 }).to_string());

    assert_eq!(bridge.metrics().snapshot().unknown, ids.len() as u64 + 1);
    assert!(values.lock().unwrap().is_empty());
}

#[test]
fn reload_cancels_queued_writes() {
    let (mut bridge, mut rx) = bridge();
    let _stale = bridge.send_message("pri(ping)", None, None).unwrap();

    bridge.handle_lifecycle(LifecycleSignal::ReloadBegin);
    bridge.handle_lifecycle(LifecycleSignal::Status(TransportStatus::CryptoReady));

    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn replay_reissues_only_reattached_subscriptions() {
    let (mut bridge, mut rx) = ready_bridge();
    let (_, first) = collecting_subscriber();
    let (_, second) = collecting_subscriber();
    let kept = bridge
        .subscribe_message("pri(price.subscribe)", Some(json!("dot")), None, first)
        .unwrap();
    let dropped = bridge
        .subscribe_message("pri(balance.subscribe)", None, None, second)
        .unwrap();
    drain(&mut rx);

    bridge.listen_message(r#"{"status":"reloading"}"#);
    assert_eq!(
        bridge.restartable_ids(),
        vec![kept.id.clone(), dropped.id.clone()]
    );

    let (values, subscriber) = collecting_subscriber();
    let _again = bridge.reattach(&kept.id, subscriber, None).unwrap();
    bridge.listen_message(r#"{"status":"crypto_ready"}"#);

    assert_eq!(bridge.replay_all().unwrap(), 1);
    let replayed = drain(&mut rx);
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].id, kept.id);
    assert_eq!(replayed[0].request, Some(json!("dot")));
    assert_eq!(bridge.restartable_ids(), vec![kept.id.clone()]);

    bridge.listen_message(&json!({ "id": kept.id, "subscription": 42 }).to_string());
    assert_eq!(*values.lock().unwrap(), vec![json!(42)]);
}

// ── dApp relay ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn provider_replies_go_to_the_dapp_bus() {
    let bus = Arc::new(BroadcastDappBus::new(16));
    let mut events = bus.subscribe();
    let (transport, mut rx) = ChannelTransport::new();
    let mut bridge = Bridge::builder()
        .transport(Arc::new(transport))
        .dapp_bus(bus)
        .build();
    bridge.set_status(TransportStatus::CryptoReady);

    bridge
        .post_message(
            OutboundMessage {
                id: "tab-1.17".into(),
                message: "evm(request)".into(),
                request: Some(json!({ "method": "eth_accounts" })),
                origin: Some("https://dapp.example".into()),
            },
            false,
        )
        .unwrap();
    let written = drain(&mut rx);
    assert_eq!(written[0].origin.as_deref(), Some("https://dapp.example"));

    bridge.listen_message(r#"{"id":"tab-1.17","response":["0xabc"]}"#);

    let event = events.recv().await.unwrap();
    assert_eq!(event.id, "tab-1.17");
    assert_eq!(
        serde_json::from_str::<Value>(&event.raw).unwrap(),
        json!({ "id": "tab-1.17", "response": ["0xabc"] })
    );
    assert_eq!(bridge.pending_count(), 0);
    assert_eq!(bridge.metrics().snapshot().dapp_forwarded, 1);
}
