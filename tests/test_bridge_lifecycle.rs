//! Bridge lifecycle tests with a mock transport and a mock HTTP endpoint

use mqtt_http_bridge::bridge::{BridgeController, BridgeLifecycle, StatusEvent};
use mqtt_http_bridge::config::BridgeConfig;
use mqtt_http_bridge::delivery::HttpDeliveryClient;
use mqtt_http_bridge::observability::BridgeStats;
use mqtt_http_bridge::protocol::InboundMessage;
use mqtt_http_bridge::testing::mocks::{MockTransport, RecordingStatusSink};
use mqtt_http_bridge::transport::mqtt::SessionEvent;
use mqtt_http_bridge::transport::{ConnectionEventHandler, ConnectionState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

async fn bridge_against(
    server: &MockServer,
    workers: usize,
) -> (BridgeLifecycle<MockTransport>, Arc<RecordingStatusSink>) {
    let mut config = BridgeConfig::default();
    config.api.endpoint_url = format!("{}/ingest", server.uri());
    config.queue.workers = workers;

    let sink = Arc::new(RecordingStatusSink::new());
    let controller = Arc::new(BridgeController::new(
        &config,
        Arc::new(HttpDeliveryClient::new().unwrap()),
        sink.clone(),
        Arc::new(BridgeStats::new()),
    ));
    let transport = MockTransport::new(&config.broker.topic);
    (
        BridgeLifecycle::new(transport, controller, workers),
        sink,
    )
}

#[tokio::test]
async fn test_messages_are_delivered_in_arrival_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(5)
        .mount(&server)
        .await;

    let (mut bridge, _sink) = bridge_against(&server, 1).await;
    bridge.start().await.unwrap();
    assert_eq!(bridge.session().state, ConnectionState::Subscribed);

    for n in 1..=5u64 {
        bridge
            .controller()
            .on_message(
                InboundMessage::new("test/topic", format!("{{\"n\":{n}}}"), 0).with_sequence(n),
            )
            .await;
    }

    let snapshot = bridge.shutdown().await.unwrap();
    assert_eq!(snapshot.received, 5);
    assert_eq!(snapshot.sent, 5);
    assert_eq!(snapshot.success_rate, 100.0);

    let requests: Vec<Request> = server.received_requests().await.unwrap();
    let order: Vec<u64> = requests
        .iter()
        .map(|request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            body["n"].as_u64().unwrap()
        })
        .collect();
    assert_eq!(order, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_mixed_traffic_statistics() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let (mut bridge, sink) = bridge_against(&server, 1).await;
    bridge.start().await.unwrap();

    let payloads = [r#"{"ok":1}"#, "not-json", r#"{"ok":2}"#, "{broken"];
    for (index, payload) in payloads.iter().enumerate() {
        bridge
            .controller()
            .on_message(InboundMessage::new("test/topic", *payload, 0).with_sequence(index as u64))
            .await;
    }

    let snapshot = bridge.shutdown().await.unwrap();
    assert_eq!(snapshot.received, 4);
    assert_eq!(snapshot.sent, 2);
    assert_eq!(snapshot.rejected, 2);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.success_rate, 50.0);

    let rejections = sink
        .events()
        .into_iter()
        .filter(|event| matches!(event, StatusEvent::PayloadRejected { .. }))
        .count();
    assert_eq!(rejections, 2);
}

#[tokio::test]
async fn test_session_watch_follows_reconnect_and_resubscribe() {
    let server = MockServer::start().await;
    let (mut bridge, _sink) = bridge_against(&server, 1).await;
    let mut session_rx = bridge.session_watch();

    bridge.start().await.unwrap();
    assert!(session_rx.borrow_and_update().accepts_messages());

    bridge
        .transport()
        .apply(SessionEvent::ConnectionLost("keepalive timeout".to_string()));
    assert_eq!(
        session_rx.borrow_and_update().state,
        ConnectionState::Disconnected
    );
    assert_eq!(bridge.session().granted_qos, None);

    for event in [
        SessionEvent::ConnectStarted,
        SessionEvent::ConnAck(mqtt_http_bridge::protocol::ConnectResultCode::Accepted),
        SessionEvent::SubscribeSent,
        SessionEvent::SubAck(Some(1)),
    ] {
        bridge.transport().apply(event);
    }
    let session = session_rx.borrow_and_update().clone();
    assert_eq!(session.state, ConnectionState::Subscribed);
    assert_eq!(session.granted_qos, Some(1));

    tokio::time::timeout(Duration::from_secs(5), bridge.shutdown())
        .await
        .unwrap()
        .unwrap();
}
