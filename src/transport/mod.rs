//! Transport layer for the bridge
//!
//! This module provides the transport abstraction the bridge lifecycle drives and the
//! event-subscriber interface through which the connector reports connection state
//! and inbound messages.

use crate::protocol::{ConnectResultCode, InboundMessage};
use std::time::Duration;
use tokio::sync::watch;

pub mod mqtt;

pub use mqtt::{ConnectionState, Session};

/// Transport trait for the broker side of the bridge
///
/// This trait provides an abstraction over the broker connection to enable
/// dependency injection and testing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker and wait for the first ConnAck
    ///
    /// The background supervisor keeps retrying even when this returns an error.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Unsubscribe, disconnect and stop the supervisor
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Issue a subscription for the configured topic on the current connection
    async fn subscribe(&self) -> Result<(), Self::Error>;

    /// Snapshot of the current session
    fn session(&self) -> Session;

    /// Watch channel following every session change
    fn session_watch(&self) -> watch::Receiver<Session>;

    /// Check if the supervisor gave up reconnecting
    fn is_permanently_disconnected(&self) -> bool;
}

/// Receiver of connector events, registered at construction
///
/// Callbacks run on the connector's event-loop task and must not block it.
#[async_trait::async_trait]
pub trait ConnectionEventHandler: Send + Sync {
    /// A ConnAck arrived, accepted or refused
    async fn on_connected(&self, code: ConnectResultCode);

    /// The broker granted the subscription, possibly at a lower QoS than requested
    async fn on_subscribed(&self, topic: &str, granted_qos: u8);

    /// The broker answered the subscription with a failure code
    async fn on_subscription_failed(&self, topic: &str, reason: &str);

    /// A message arrived while the session was subscribed
    async fn on_message(&self, message: InboundMessage);

    /// A message arrived but was not handed to the pipeline
    async fn on_message_dropped(&self, _topic: &str, _reason: &str) {}

    /// The connection was lost or closed
    async fn on_disconnected(&self, reason: &str);

    /// A reconnection attempt is scheduled after `delay`
    async fn on_reconnecting(&self, _attempt: u32, _delay: Duration) {}
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttConnector;
