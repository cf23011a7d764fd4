//! Impure I/O operations for the MQTT connector
//!
//! This module handles network communication, the reconnection supervisor and
//! integration with the rumqttc client. All decisions are delegated to the pure
//! functions in the sibling modules.

use super::connection::{
    configure_mqtt_options, resolve_client_id, ConnectionState, MqttError, ReconnectConfig,
    Session, SessionEvent,
};
use super::health_monitor::{HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::BrokerSection;
use crate::error::sanitize_error_message;
use crate::mqtt_span;
use crate::protocol::{ConnectResultCode, InboundMessage};
use crate::transport::{ConnectionEventHandler, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectionError, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the request channel between `AsyncClient` and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `disconnect()` waits for the supervisor before aborting it
const SUPERVISOR_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT connector: owns the broker connection, keepalive, reconnection and the subscription
pub struct MqttConnector {
    broker: BrokerSection,
    client_id: String,
    reconnect_config: ReconnectConfig,
    handler: Arc<dyn ConnectionEventHandler>,
    client: Arc<Mutex<AsyncClient>>,
    // Held until `connect()` hands it to the supervisor; the mutex keeps the connector Sync
    event_loop: Option<std::sync::Mutex<EventLoop>>,
    event_loop_handle: Option<JoinHandle<()>>,
    session_tx: Arc<watch::Sender<Session>>,
    session_rx: watch::Receiver<Session>,
    shutdown_tx: watch::Sender<bool>,
    stopping: Arc<AtomicBool>,
}

impl MqttConnector {
    /// Create a connector; no network activity happens until `connect()`
    pub fn new(
        broker: BrokerSection,
        reconnect_config: ReconnectConfig,
        handler: Arc<dyn ConnectionEventHandler>,
    ) -> Result<Self, MqttError> {
        let client_id = resolve_client_id(&broker);
        let (client, event_loop) = Self::create_connection(&broker, &client_id)?;
        let (session_tx, session_rx) = watch::channel(Session::new(broker.topic.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            broker,
            client_id,
            reconnect_config,
            handler,
            client: Arc::new(Mutex::new(client)),
            event_loop: Some(std::sync::Mutex::new(event_loop)),
            event_loop_handle: None,
            session_tx: Arc::new(session_tx),
            session_rx,
            shutdown_tx,
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Helper method to create new MQTT connection and event loop
    /// Used for initial connection and reconnection attempts
    fn create_connection(
        broker: &BrokerSection,
        client_id: &str,
    ) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(broker, client_id)?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY))
    }

    /// Wait for an accepted ConnAck with timeout
    ///
    /// A refused ConnAck fails immediately; network errors keep waiting because the
    /// supervisor retries them.
    async fn wait_for_connection_confirmation(
        mut session_rx: watch::Receiver<Session>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let wait = async {
            loop {
                {
                    let session = session_rx.borrow_and_update();
                    if HealthMonitor::is_connected(&session.state) {
                        return Ok(());
                    }
                    if session.gave_up {
                        return Err(MqttError::ConnectionLost(
                            "Reconnection attempts exhausted".to_string(),
                        ));
                    }
                    if session.state == ConnectionState::Disconnected {
                        if let Some(code) = session.last_result_code.filter(|c| !c.is_success()) {
                            return Err(MqttError::ConnectionRefused(code));
                        }
                    }
                }
                if session_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionLost(
                        "Session channel closed".to_string(),
                    ));
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(Err(MqttError::ConnectTimeout(timeout)))
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }

        let sleep = tokio::time::sleep(Duration::from_millis(delay_ms));
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received during reconnection delay, stopping");
                        return false;
                    }
                }
                _ = &mut sleep => return true,
            }
        }
    }

    /// Connect to the broker and start the reconnection supervisor
    ///
    /// Returns once the broker accepts the connection. On error the supervisor keeps
    /// retrying in the background; call `disconnect()` to stop it.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or(MqttError::AlreadyStarted)?
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        self.stopping.store(false, Ordering::SeqCst);
        self.session_tx
            .send_if_modified(|session| session.apply(&SessionEvent::ConnectStarted));

        info!(
            client_id = %self.client_id,
            host = %self.broker.host,
            port = self.broker.port,
            topic = %self.broker.topic,
            "Connecting to MQTT broker"
        );

        let supervisor = Supervisor {
            broker: self.broker.clone(),
            client_id: self.client_id.clone(),
            reconnect_config: self.reconnect_config.clone(),
            handler: self.handler.clone(),
            client: self.client.clone(),
            session_tx: self.session_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            stopping: self.stopping.clone(),
            next_sequence: 0,
        };
        let span = mqtt_span!(client_id = %self.client_id);
        self.event_loop_handle = Some(tokio::spawn(supervisor.run(event_loop).instrument(span)));

        Self::wait_for_connection_confirmation(
            self.session_rx.clone(),
            self.broker.connect_timeout(),
        )
        .await
    }

    /// Gracefully unsubscribe, disconnect and stop the supervisor
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        let Some(mut handle) = self.event_loop_handle.take() else {
            debug!("MQTT connector was never started, nothing to disconnect");
            return Ok(());
        };
        self.stopping.store(true, Ordering::SeqCst);

        let session = self.session();
        let mut graceful = false;
        if HealthMonitor::is_connected(&session.state) {
            let client = self.client.lock().await;
            if session.state == ConnectionState::Subscribed {
                if let Err(e) = client.unsubscribe(self.broker.topic.as_str()).await {
                    warn!("Failed to unsubscribe from {}: {}", self.broker.topic, e);
                }
            }
            match client.disconnect().await {
                Ok(()) => graceful = true,
                Err(e) => warn!("Failed to send DISCONNECT: {}", e),
            }
        }

        // Without a live connection there is no DISCONNECT to wait for
        if !graceful {
            let _ = self.shutdown_tx.send(true);
            info!("Sent shutdown signal to reconnection supervisor");
        }

        match tokio::time::timeout(SUPERVISOR_STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => info!("Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                let _ = self.shutdown_tx.send(true);
                handle.abort();
            }
        }

        self.session_tx
            .send_if_modified(|session| session.apply(&SessionEvent::Shutdown));
        info!("MQTT connector disconnected");
        Ok(())
    }

    /// Issue the configured subscription on the current connection
    pub async fn subscribe(&self) -> Result<(), MqttError> {
        let state = self.session_rx.borrow().state.clone();
        if !HealthMonitor::can_subscribe(&state) {
            return Err(MqttError::NotConnected { state });
        }
        issue_subscription(&self.client, &self.session_tx, &self.broker).await
    }

    /// Get a snapshot of the current session
    pub fn session(&self) -> Session {
        self.session_rx.borrow().clone()
    }

    /// Check if the supervisor gave up reconnecting
    pub fn is_permanently_disconnected(&self) -> bool {
        self.session_rx.borrow().gave_up
    }
}

/// Send SUBSCRIBE for the configured topic and mark the session pending
async fn issue_subscription(
    client: &Mutex<AsyncClient>,
    session_tx: &watch::Sender<Session>,
    broker: &BrokerSection,
) -> Result<(), MqttError> {
    info!("Subscribing to topic: {} (QoS {})", broker.topic, broker.qos);

    client
        .lock()
        .await
        .subscribe(broker.topic.as_str(), MessageHandler::to_qos(broker.qos))
        .await
        .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

    session_tx.send_if_modified(|session| session.apply(&SessionEvent::SubscribeSent));
    Ok(())
}

/// State owned by the background event-loop task
struct Supervisor {
    broker: BrokerSection,
    client_id: String,
    reconnect_config: ReconnectConfig,
    handler: Arc<dyn ConnectionEventHandler>,
    client: Arc<Mutex<AsyncClient>>,
    session_tx: Arc<watch::Sender<Session>>,
    shutdown_rx: watch::Receiver<bool>,
    stopping: Arc<AtomicBool>,
    next_sequence: u64,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        info!(
            "Starting MQTT event loop with reconnection supervisor for client: {}",
            self.client_id
        );
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                // Check for shutdown signal first (higher priority)
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping reconnection supervisor");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route, &mut reconnect_attempts, &mut event_loop)
                                .await
                        }
                        Err(error) => {
                            self.handle_event_loop_error(error, &mut reconnect_attempts, &mut event_loop)
                                .await
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        self.update_session(SessionEvent::Shutdown);
        info!("MQTT event loop stopped for client: {}", self.client_id);
    }

    fn update_session(&self, event: SessionEvent) {
        self.session_tx
            .send_if_modified(|session| session.apply(&event));
    }

    /// Process routed MQTT event
    /// Returns true to continue loop, false to break
    async fn process_event_route(
        &mut self,
        route: EventRoute,
        reconnect_attempts: &mut u32,
        event_loop: &mut EventLoop,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged {
                code,
                session_present,
            } => {
                debug!(target: "mqtt_transport", "ConnAck received (session_present={})", session_present);
                self.update_session(SessionEvent::ConnAck(code));
                self.handler.on_connected(code).await;
                if code.is_success() {
                    *reconnect_attempts = 0;
                    if let Err(e) =
                        issue_subscription(&self.client, &self.session_tx, &self.broker).await
                    {
                        error!("Failed to subscribe to {}: {}", self.broker.topic, e);
                    }
                }
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                qos,
                retain,
            } => {
                self.handle_message_received(topic, payload, qos, retain)
                    .await;
                true
            }
            EventRoute::SubscriptionAcknowledged { granted_qos } => {
                self.update_session(SessionEvent::SubAck(granted_qos));
                match granted_qos {
                    Some(granted) => {
                        if granted < self.broker.qos {
                            warn!(
                                "Broker downgraded subscription QoS from {} to {}",
                                self.broker.qos, granted
                            );
                        }
                        self.handler.on_subscribed(&self.broker.topic, granted).await;
                    }
                    None => {
                        self.handler
                            .on_subscription_failed(&self.broker.topic, "broker returned failure code")
                            .await;
                    }
                }
                true
            }
            EventRoute::UnsubscribeAcknowledged => {
                debug!(target: "mqtt_transport", "Unsubscribed from {}", self.broker.topic);
                true
            }
            EventRoute::Disconnected => {
                if self.stopping.load(Ordering::SeqCst) {
                    return false;
                }
                let reason = "Broker disconnected";
                self.update_session(SessionEvent::ConnectionLost(reason.to_string()));
                self.handler.on_disconnected(reason).await;
                self.should_attempt_reconnection(reconnect_attempts, event_loop)
                    .await
            }
            EventRoute::OutgoingDisconnect => {
                if self.stopping.load(Ordering::SeqCst) {
                    info!("DISCONNECT sent, stopping reconnection supervisor");
                    return false;
                }
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Hand an inbound publish to the handler, or drop it if the session is not subscribed
    async fn handle_message_received(
        &mut self,
        topic: String,
        payload: Bytes,
        qos: u8,
        retain: bool,
    ) {
        let state = self.session_tx.borrow().state.clone();
        match MessageHandler::should_process_message(&state, &self.broker.topic, &topic) {
            Ok(()) => {
                self.next_sequence += 1;
                let message = InboundMessage::new(topic, payload, qos)
                    .with_sequence(self.next_sequence)
                    .with_retain(retain);
                debug!(
                    target: "mqtt_transport",
                    "Received MQTT message #{} on topic: {}",
                    message.sequence,
                    message.topic
                );
                self.handler.on_message(message).await;
            }
            Err(reason) => {
                warn!("Dropping message on {}: {}", topic, reason);
                self.handler
                    .on_message_dropped(&topic, &reason.to_string())
                    .await;
            }
        }
    }

    /// Handle event loop error
    /// Returns true to continue loop (after reconnection), false to break
    async fn handle_event_loop_error(
        &mut self,
        error: ConnectionError,
        reconnect_attempts: &mut u32,
        event_loop: &mut EventLoop,
    ) -> bool {
        if self.stopping.load(Ordering::SeqCst) || *self.shutdown_rx.borrow() {
            debug!("Event loop closed during shutdown: {}", error);
            return false;
        }

        if let ConnectionError::ConnectionRefused(code) = &error {
            let code = ConnectResultCode::from(code);
            self.update_session(SessionEvent::ConnAck(code));
            self.handler.on_connected(code).await;
        }

        let reason = sanitize_error_message(&error.to_string());
        warn!("MQTT event loop error for client {}: {}", self.client_id, reason);
        self.update_session(SessionEvent::ConnectionLost(reason.clone()));
        self.handler.on_disconnected(&reason).await;

        self.should_attempt_reconnection(reconnect_attempts, event_loop)
            .await
    }

    /// Helper to handle reconnection logic
    async fn should_attempt_reconnection(
        &mut self,
        reconnect_attempts: &mut u32,
        event_loop: &mut EventLoop,
    ) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;

                let max_display = self
                    .reconnect_config
                    .max_attempts
                    .map_or("∞".to_string(), |max| max.to_string());
                info!(
                    "Attempting reconnection {}/{} after {}ms delay",
                    attempt, max_display, delay_ms
                );
                self.handler
                    .on_reconnecting(attempt, Duration::from_millis(delay_ms))
                    .await;

                if !MqttConnector::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    return false;
                }
                if self.stopping.load(Ordering::SeqCst) {
                    info!("Shutdown requested, aborting reconnection");
                    return false;
                }

                self.apply_new_connection(event_loop).await
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                error!(
                    "Max reconnection attempts ({}) exceeded, giving up",
                    self.reconnect_config.max_attempts.unwrap_or_default()
                );
                self.update_session(SessionEvent::GaveUp);
                false
            }
        }
    }

    /// Replace client and event loop for the next attempt
    /// Always returns true: a failed rebuild keeps the old event loop, whose next poll retries
    async fn apply_new_connection(&mut self, event_loop: &mut EventLoop) -> bool {
        match MqttConnector::create_connection(&self.broker, &self.client_id) {
            Ok((new_client, new_event_loop)) => {
                *event_loop = new_event_loop;
                *self.client.lock().await = new_client;
                self.update_session(SessionEvent::ConnectStarted);
                debug!(target: "mqtt_transport", "Created new connection for reconnection attempt");
                true
            }
            Err(e) => {
                error!("Failed to create new connection: {}", e);
                true
            }
        }
    }
}

/// Implementation of Transport trait for MqttConnector
#[async_trait]
impl Transport for MqttConnector {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttConnector::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttConnector::disconnect(self).await
    }

    async fn subscribe(&self) -> Result<(), Self::Error> {
        MqttConnector::subscribe(self).await
    }

    fn session(&self) -> Session {
        MqttConnector::session(self)
    }

    fn session_watch(&self) -> watch::Receiver<Session> {
        self.session_rx.clone()
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttConnector::is_permanently_disconnected(self)
    }
}

impl Drop for MqttConnector {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        // Can't disconnect asynchronously here; only make sure the task stops
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{HandlerEvent, RecordingEventHandler};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn test_broker(port: u16) -> BrokerSection {
        BrokerSection {
            host: "127.0.0.1".to_string(),
            port,
            client_id: Some("bridge-unit-test".to_string()),
            username_env: None,
            password_env: None,
            connect_timeout_secs: 1,
            ..BrokerSection::default()
        }
    }

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: None,
            initial_delay_ms: 20,
            max_delay_ms: 50,
            multiplier: 2.0,
            jitter_ratio: 0.0,
        }
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn connector(port: u16, handler: Arc<RecordingEventHandler>) -> MqttConnector {
        MqttConnector::new(test_broker(port), fast_reconnect(), handler).unwrap()
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let (session_tx, session_rx) = watch::channel(Session::new("test/topic"));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session_tx.send_modify(|s| {
                s.apply(&SessionEvent::ConnectStarted);
                s.apply(&SessionEvent::ConnAck(ConnectResultCode::Accepted));
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let result =
            MqttConnector::wait_for_connection_confirmation(session_rx, Duration::from_millis(100))
                .await;
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let (session_tx, session_rx) = watch::channel(Session::new("test/topic"));

        let result =
            MqttConnector::wait_for_connection_confirmation(session_rx, Duration::from_millis(10))
                .await;
        drop(session_tx);

        assert!(matches!(result, Err(MqttError::ConnectTimeout(_))));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_refused() {
        let (session_tx, session_rx) = watch::channel(Session::new("test/topic"));

        tokio::spawn(async move {
            session_tx.send_modify(|s| {
                s.apply(&SessionEvent::ConnectStarted);
                s.apply(&SessionEvent::ConnAck(ConnectResultCode::BadCredentials));
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let result =
            MqttConnector::wait_for_connection_confirmation(session_rx, Duration::from_millis(100))
                .await;
        assert!(matches!(
            result,
            Err(MqttError::ConnectionRefused(ConnectResultCode::BadCredentials))
        ));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(MqttConnector::interruptible_sleep(shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        let started = std::time::Instant::now();
        assert!(!MqttConnector::interruptible_sleep(shutdown_rx, 5_000).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_session_before_connect() {
        let connector = connector(1883, Arc::new(RecordingEventHandler::default()));

        let session = connector.session();
        assert_eq!(session.state, ConnectionState::Disconnected);
        assert_eq!(session.topic, "test/topic");
        assert!(!connector.is_permanently_disconnected());
        assert_eq!(connector.client_id(), "bridge-unit-test");
    }

    #[tokio::test]
    async fn test_subscribe_fails_without_connection() {
        let connector = connector(1883, Arc::new(RecordingEventHandler::default()));

        let result = connector.subscribe().await;
        assert!(matches!(
            result,
            Err(MqttError::NotConnected {
                state: ConnectionState::Disconnected
            })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let mut connector = connector(1883, Arc::new(RecordingEventHandler::default()));
        assert!(connector.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_broker_keeps_retrying() {
        let handler = Arc::new(RecordingEventHandler::default());
        let mut connector = connector(closed_port(), handler.clone());

        let result = connector.connect().await;
        assert!(matches!(result, Err(MqttError::ConnectTimeout(_))));

        // Supervisor is still alive and retrying after connect() gave up waiting
        let events = handler.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, HandlerEvent::Disconnected(_))));
        assert!(events
            .iter()
            .any(|e| matches!(e, HandlerEvent::Reconnecting(_))));
        assert!(!connector.is_permanently_disconnected());

        assert!(matches!(
            connector.connect().await,
            Err(MqttError::AlreadyStarted)
        ));

        connector.disconnect().await.unwrap();
        assert_eq!(connector.session().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_max_attempts_gives_up() {
        let handler = Arc::new(RecordingEventHandler::default());
        let reconnect = ReconnectConfig {
            max_attempts: Some(2),
            ..fast_reconnect()
        };
        let mut connector =
            MqttConnector::new(test_broker(closed_port()), reconnect, handler.clone()).unwrap();

        let result = connector.connect().await;
        assert!(result.is_err());

        let mut session_rx = connector.session_rx.clone();
        let gave_up = tokio::time::timeout(Duration::from_secs(2), async {
            while !session_rx.borrow_and_update().gave_up {
                if session_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(gave_up.is_ok());
        assert!(connector.is_permanently_disconnected());

        connector.disconnect().await.unwrap();
    }

    /// Broker side of one MQTT 3.1.1 connection, just enough to drive the connector
    struct BrokerConnection {
        stream: TcpStream,
    }

    impl BrokerConnection {
        /// Accept a client and answer its CONNECT with an accepted CONNACK
        async fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = listener.accept().await.unwrap();
            let mut connection = Self { stream };
            let (header, _) = connection.read_packet().await;
            assert_eq!(header >> 4, 1, "expected CONNECT");
            connection
                .stream
                .write_all(&[0x20, 0x02, 0x00, 0x00])
                .await
                .unwrap();
            connection
        }

        async fn read_packet(&mut self) -> (u8, Vec<u8>) {
            let header = self.stream.read_u8().await.unwrap();
            let mut length = 0usize;
            let mut shift = 0;
            loop {
                let byte = self.stream.read_u8().await.unwrap();
                length |= usize::from(byte & 0x7f) << shift;
                if byte & 0x80 == 0 {
                    break;
                }
                shift += 7;
            }
            let mut body = vec![0; length];
            self.stream.read_exact(&mut body).await.unwrap();
            (header, body)
        }

        /// Wait for SUBSCRIBE and return its packet id
        async fn expect_subscribe(&mut self) -> u16 {
            loop {
                let (header, body) = self.read_packet().await;
                if header == 0x82 {
                    return u16::from_be_bytes([body[0], body[1]]);
                }
            }
        }

        async fn suback(&mut self, packet_id: u16) {
            let [high, low] = packet_id.to_be_bytes();
            self.stream
                .write_all(&[0x90, 0x03, high, low, 0x00])
                .await
                .unwrap();
        }

        async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) {
            let mut packet = vec![if retain { 0x31 } else { 0x30 }];
            let mut remaining = 2 + topic.len() + payload.len();
            loop {
                let mut byte = (remaining % 128) as u8;
                remaining /= 128;
                if remaining > 0 {
                    byte |= 0x80;
                }
                packet.push(byte);
                if remaining == 0 {
                    break;
                }
            }
            packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
            packet.extend_from_slice(topic.as_bytes());
            packet.extend_from_slice(payload);
            self.stream.write_all(&packet).await.unwrap();
        }
    }

    async fn wait_for_messages(handler: &RecordingEventHandler, count: usize) -> Vec<InboundMessage> {
        for _ in 0..300 {
            let messages = handler.messages();
            if messages.len() >= count {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handler.messages()
    }

    #[test]
    fn test_connector_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MqttConnector>();
    }

    #[tokio::test]
    async fn test_resubscribes_after_connection_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let mut first = BrokerConnection::accept(&listener).await;
            let packet_id = first.expect_subscribe().await;
            first.suback(packet_id).await;
            first.publish("test/topic", br#"{"conn":1}"#, false).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(first);

            let mut second = BrokerConnection::accept(&listener).await;
            let packet_id = second.expect_subscribe().await;
            // Arrives while the new subscription is still pending
            second.publish("test/topic", br#"{"early":true}"#, false).await;
            second.suback(packet_id).await;
            second.publish("test/topic", br#"{"conn":2}"#, false).await;
            second
        });

        let handler = Arc::new(RecordingEventHandler::default());
        let mut connector = connector(port, handler.clone());
        connector.connect().await.unwrap();

        let messages = wait_for_messages(&handler, 2).await;
        let payloads: Vec<&[u8]> = messages.iter().map(|m| m.payload.as_ref()).collect();
        assert_eq!(payloads, vec![&br#"{"conn":1}"#[..], &br#"{"conn":2}"#[..]]);

        let _second = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .unwrap()
            .unwrap();

        let events = handler.events();
        let subscriptions = events
            .iter()
            .filter(|e| matches!(e, HandlerEvent::Subscribed(topic, 0) if topic == "test/topic"))
            .count();
        assert_eq!(subscriptions, 2);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, HandlerEvent::Dropped(_)))
                .count(),
            1
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, HandlerEvent::Disconnected(_))));
        assert_eq!(connector.session().state, ConnectionState::Subscribed);

        connector.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_large_retained_message_keeps_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let payload = serde_json::to_vec(&serde_json::json!({ "blob": "x".repeat(300 * 1024) }))
            .unwrap();

        let broker_payload = payload.clone();
        let broker = tokio::spawn(async move {
            let mut connection = BrokerConnection::accept(&listener).await;
            let packet_id = connection.expect_subscribe().await;
            connection.suback(packet_id).await;
            connection.publish("test/topic", &broker_payload, true).await;
            let reconnected = tokio::time::timeout(Duration::from_millis(500), listener.accept())
                .await
                .is_ok();
            (connection, reconnected)
        });

        let handler = Arc::new(RecordingEventHandler::default());
        let mut connector = connector(port, handler.clone());
        connector.connect().await.unwrap();

        let messages = wait_for_messages(&handler, 1).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload.len(), payload.len());
        assert!(messages[0].retain);

        let (_connection, reconnected) = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .unwrap()
            .unwrap();
        assert!(!reconnected);
        assert!(!handler
            .events()
            .iter()
            .any(|e| matches!(e, HandlerEvent::Disconnected(_))));
        assert_eq!(connector.session().state, ConnectionState::Subscribed);

        connector.disconnect().await.unwrap();
    }
}
