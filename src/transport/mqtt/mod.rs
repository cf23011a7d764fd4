//! MQTT connector for the bridge
//!
//! This module provides a focused, decomposed MQTT connector that separates pure
//! functions from I/O operations for better testability and maintainability.
//!
//! # Architecture
//!
//! - [`connection`] - Session model, backoff configuration and broker options
//! - [`message_handler`] - Pure event routing and message acceptance
//! - [`health_monitor`] - Pure state transitions and reconnection decisions
//! - [`client`] - Impure I/O operations and the reconnection supervisor
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_http_bridge::config::BrokerSection;
//! use mqtt_http_bridge::testing::mocks::RecordingEventHandler;
//! use mqtt_http_bridge::transport::mqtt::{MqttConnector, ReconnectConfig};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let handler = Arc::new(RecordingEventHandler::default());
//! let mut connector =
//!     MqttConnector::new(BrokerSection::default(), ReconnectConfig::default(), handler)?;
//! connector.connect().await?;
//! // ... messages flow to the handler until:
//! connector.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttConnector;
pub use connection::{
    apply_jitter, ConnectionState, MqttError, ReconnectConfig, Session, SessionEvent,
};
pub use health_monitor::{HealthMonitor, ReconnectionDecision};
pub use message_handler::{DropReason, EventRoute, MessageHandler};
