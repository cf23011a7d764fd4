//! Pure connection state management for the MQTT connector
//!
//! This module contains the session model, reconnection backoff configuration
//! and broker option construction. Nothing here performs I/O.

use super::health_monitor::HealthMonitor;
use crate::config::{BrokerSection, ReconnectSection};
use crate::protocol::ConnectResultCode;
use rand::Rng;
use rumqttc::MqttOptions;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Connection state of a broker session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection, either not started yet or lost
    Disconnected,
    /// TCP connect and CONNECT sent, waiting for ConnAck
    Connecting,
    /// ConnAck accepted, no subscription issued yet
    Connected,
    /// SUBSCRIBE sent, waiting for SubAck
    SubscriptionPending,
    /// SubAck granted; inbound messages are accepted
    Subscribed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::SubscriptionPending => "subscription_pending",
            ConnectionState::Subscribed => "subscribed",
        };
        f.write_str(text)
    }
}

/// Events that drive session state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A (re)connection attempt started
    ConnectStarted,
    /// ConnAck received with the broker's result code
    ConnAck(ConnectResultCode),
    /// SUBSCRIBE handed to the client
    SubscribeSent,
    /// SubAck received; `None` when the broker returned a failure code
    SubAck(Option<u8>),
    /// Network loss, protocol error or broker-initiated disconnect
    ConnectionLost(String),
    /// Reconnection attempts exhausted
    GaveUp,
    /// Local shutdown completed
    Shutdown,
}

/// One broker session as seen by the bridge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub state: ConnectionState,
    pub last_result_code: Option<ConnectResultCode>,
    pub topic: String,
    pub granted_qos: Option<u8>,
    /// Set once the supervisor stops reconnecting for good
    pub gave_up: bool,
}

impl Session {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_result_code: None,
            topic: topic.into(),
            granted_qos: None,
            gave_up: false,
        }
    }

    /// Apply an event, returning whether anything changed
    ///
    /// Events that are not valid in the current state are ignored.
    pub fn apply(&mut self, event: &SessionEvent) -> bool {
        let Some(next) = HealthMonitor::determine_next_state(&self.state, event) else {
            tracing::debug!(
                target: "mqtt_transport",
                "Ignoring {:?} in state {}",
                event,
                self.state
            );
            return false;
        };

        let before = self.clone();
        match event {
            SessionEvent::ConnAck(code) => self.last_result_code = Some(*code),
            SessionEvent::SubAck(granted) => self.granted_qos = *granted,
            SessionEvent::GaveUp => self.gave_up = true,
            _ => {}
        }
        if next != ConnectionState::Subscribed {
            self.granted_qos = None;
        }
        if next != self.state {
            HealthMonitor::log_state_transition(&self.state, &next, event);
            self.state = next;
        }

        *self != before
    }

    /// Inbound messages are only handed to the pipeline while subscribed
    pub fn accepts_messages(&self) -> bool {
        HealthMonitor::accepts_messages(&self.state)
    }
}

/// Reconnection backoff configuration
///
/// Delay for attempt `n` is `initial * multiplier^(n-1)`, capped at `max_delay_ms`,
/// then randomized by `jitter_ratio`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_ratio: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ReconnectSection::default())
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            initial_delay_ms: section.initial_delay_ms,
            max_delay_ms: section.max_delay_ms,
            multiplier: section.multiplier,
            jitter_ratio: section.jitter_ratio,
        }
    }
}

impl ReconnectConfig {
    /// Calculate the maximum total time for all reconnection attempts, without jitter
    /// Returns None if unlimited retries are configured
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .fold(0u64, u64::saturating_add)
        })
    }

    /// Calculate the capped exponential delay for an attempt (1-based), without jitter
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            delay as u64
        }
    }

    /// Backoff delay for an attempt with jitter applied
    pub fn jittered_delay(&self, attempt: u32) -> u64 {
        apply_jitter(self.calculate_backoff_delay(attempt), self.jitter_ratio)
    }
}

/// Randomize a delay by up to `ratio` of its value in either direction
pub fn apply_jitter(delay_ms: u64, ratio: f64) -> u64 {
    if ratio <= 0.0 || delay_ms == 0 {
        return delay_ms;
    }
    let jitter_range = delay_ms as f64 * ratio;
    let jitter = (rand::rng().random::<f64>() - 0.5) * 2.0 * jitter_range;
    (delay_ms as f64 + jitter).max(0.0).round() as u64
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker address: {0}")]
    InvalidBrokerAddress(String),
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
    #[error("Broker refused the connection: {0}")]
    ConnectionRefused(ConnectResultCode),
    #[error("No ConnAck received within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Connector already started")]
    AlreadyStarted,
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Use the configured client id, or generate `mqtt_bridge_<8 hex chars>`
pub fn resolve_client_id(config: &BrokerSection) -> String {
    match config.client_id.as_deref() {
        Some(client_id) if !client_id.is_empty() => client_id.to_string(),
        _ => {
            let random = Uuid::new_v4().simple().to_string();
            format!("mqtt_bridge_{}", &random[..8])
        }
    }
}

/// Pure function to configure MQTT options from config
/// Shared by the initial connection and every reconnection attempt
pub fn configure_mqtt_options(
    config: &BrokerSection,
    client_id: &str,
) -> Result<MqttOptions, MqttError> {
    let host = config.host.trim();
    if host.is_empty() || host.contains("://") || host.contains('/') {
        return Err(MqttError::InvalidBrokerAddress(config.host.clone()));
    }

    let mut mqtt_options = MqttOptions::new(client_id, host, config.port);
    mqtt_options.set_keep_alive(config.keepalive());
    // Subscriptions are re-issued after every ConnAck instead of relying on broker state
    mqtt_options.set_clean_session(true);
    mqtt_options.set_max_packet_size(config.max_packet_size, config.max_packet_size);

    if let Some((username, password)) = config.credentials() {
        mqtt_options.set_credentials(username, password);
    }

    Ok(mqtt_options)
}
