//! Mock implementations for testing
//!
//! Provides mock Transport, DeliveryClient, StatusSink and ConnectionEventHandler
//! implementations to enable testing without a broker or an HTTP endpoint.

use crate::bridge::report::{StatusEvent, StatusSink};
use crate::delivery::{DeliveryClient, DeliveryOutcome, ResponseBody};
use crate::pipeline::ValidatedPayload;
use crate::protocol::{ConnectResultCode, InboundMessage};
use crate::transport::mqtt::{HealthMonitor, MqttError, SessionEvent};
use crate::transport::{ConnectionEventHandler, Session, Transport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Mock transport that reaches Subscribed immediately on connect
#[derive(Debug)]
pub struct MockTransport {
    session_tx: Arc<watch::Sender<Session>>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    fail_next_connect: AtomicBool,
    permanently_disconnected: AtomicBool,
}

impl MockTransport {
    pub fn new(topic: &str) -> Self {
        let (session_tx, _) = watch::channel(Session::new(topic));
        Self {
            session_tx: Arc::new(session_tx),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            fail_next_connect: AtomicBool::new(false),
            permanently_disconnected: AtomicBool::new(false),
        }
    }

    /// Make the next `connect()` fail with a timeout
    pub fn fail_next_connect(&self) {
        self.fail_next_connect.store(true, Ordering::SeqCst);
    }

    pub fn set_permanently_disconnected(&self, value: bool) {
        self.permanently_disconnected.store(value, Ordering::SeqCst);
    }

    /// Drive the session as the connector would
    pub fn apply(&self, event: SessionEvent) {
        self.session_tx.send_if_modified(|session| session.apply(&event));
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_connect.swap(false, Ordering::SeqCst) {
            return Err(MqttError::ConnectTimeout(Duration::from_secs(1)));
        }

        self.apply(SessionEvent::ConnectStarted);
        self.apply(SessionEvent::ConnAck(ConnectResultCode::Accepted));
        self.subscribe().await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.apply(SessionEvent::Shutdown);
        Ok(())
    }

    async fn subscribe(&self) -> Result<(), Self::Error> {
        let state = self.session_tx.borrow().state.clone();
        if !HealthMonitor::can_subscribe(&state) {
            return Err(MqttError::NotConnected { state });
        }
        self.apply(SessionEvent::SubscribeSent);
        self.apply(SessionEvent::SubAck(Some(0)));
        Ok(())
    }

    fn session(&self) -> Session {
        self.session_tx.borrow().clone()
    }

    fn session_watch(&self) -> watch::Receiver<Session> {
        self.session_tx.subscribe()
    }

    fn is_permanently_disconnected(&self) -> bool {
        self.permanently_disconnected.load(Ordering::SeqCst)
    }
}

/// One recorded delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryCall {
    pub payload: Value,
    pub endpoint: String,
    pub timeout: Duration,
}

/// Mock delivery client with scripted outcomes
///
/// Outcomes are returned in the order they were pushed; once the script is empty every
/// delivery succeeds with `200 {"ok":true}`.
#[derive(Debug, Default)]
pub struct MockDeliveryClient {
    outcomes: Mutex<VecDeque<DeliveryOutcome>>,
    calls: Mutex<Vec<DeliveryCall>>,
    delay: Mutex<Option<Duration>>,
}

impl MockDeliveryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<DeliveryOutcome>) -> Self {
        let client = Self::new();
        for outcome in outcomes {
            client.push_outcome(outcome);
        }
        client
    }

    pub fn push_outcome(&self, outcome: DeliveryOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Hold every delivery for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<DeliveryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryClient for MockDeliveryClient {
    async fn deliver(
        &self,
        payload: &ValidatedPayload,
        endpoint: &str,
        timeout: Duration,
    ) -> DeliveryOutcome {
        self.calls.lock().unwrap().push(DeliveryCall {
            payload: payload.as_value().clone(),
            endpoint: endpoint.to_string(),
            timeout,
        });

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.outcomes.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| DeliveryOutcome::Success {
            status: 200,
            response: ResponseBody::Json(json!({"ok": true})),
        })
    }
}

/// Status sink that keeps every event
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl StatusSink for RecordingStatusSink {
    fn report(&self, event: StatusEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Connector callback as recorded by [`RecordingEventHandler`]
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerEvent {
    Connected(ConnectResultCode),
    Subscribed(String, u8),
    SubscriptionFailed(String),
    Message(InboundMessage),
    Dropped(String),
    Disconnected(String),
    Reconnecting(u32),
}

/// Event handler that records every callback in order
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: Mutex<Vec<HandlerEvent>>,
}

impl RecordingEventHandler {
    pub fn events(&self) -> Vec<HandlerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<InboundMessage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HandlerEvent::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: HandlerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ConnectionEventHandler for RecordingEventHandler {
    async fn on_connected(&self, code: ConnectResultCode) {
        self.record(HandlerEvent::Connected(code));
    }

    async fn on_subscribed(&self, topic: &str, granted_qos: u8) {
        self.record(HandlerEvent::Subscribed(topic.to_string(), granted_qos));
    }

    async fn on_subscription_failed(&self, _topic: &str, reason: &str) {
        self.record(HandlerEvent::SubscriptionFailed(reason.to_string()));
    }

    async fn on_message(&self, message: InboundMessage) {
        self.record(HandlerEvent::Message(message));
    }

    async fn on_message_dropped(&self, _topic: &str, reason: &str) {
        self.record(HandlerEvent::Dropped(reason.to_string()));
    }

    async fn on_disconnected(&self, reason: &str) {
        self.record(HandlerEvent::Disconnected(reason.to_string()));
    }

    async fn on_reconnecting(&self, attempt: u32, _delay: Duration) {
        self.record(HandlerEvent::Reconnecting(attempt));
    }
}
