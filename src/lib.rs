//! MQTT → HTTP message bridge
//!
//! Subscribes to one MQTT topic, validates every inbound payload as JSON and forwards
//! each valid payload to an HTTP API endpoint with a single POST.
//!
//! # Overview
//!
//! - [`transport`] owns the broker connection, keepalive, automatic reconnection with
//!   capped exponential backoff and resubscription
//! - [`pipeline`] turns raw payload bytes into a [`pipeline::ValidatedPayload`]
//! - [`delivery`] POSTs a payload once and classifies the result as a
//!   [`delivery::DeliveryOutcome`]
//! - [`bridge`] connects the two through a bounded queue and a worker pool, reports
//!   status and drives startup and shutdown
//! - [`observability`] provides logging, statistics and the optional health server
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_http_bridge::delivery::{classify_response, OutcomeKind};
//! use mqtt_http_bridge::pipeline::validate;
//!
//! let payload = validate(br#"{"codeName":"DRONE-001","status":"active"}"#).unwrap();
//! assert_eq!(payload.as_value()["codeName"], "DRONE-001");
//!
//! // Invalid payloads never reach the endpoint
//! assert!(validate(b"not-json").is_err());
//!
//! let outcome = classify_response(503, "maintenance");
//! assert_eq!(outcome.kind(), OutcomeKind::ServerError);
//! ```

pub mod bridge;
pub mod config;
pub mod delivery;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use bridge::{BridgeController, BridgeLifecycle, LifecycleError};
pub use config::{BridgeConfig, ConfigError};
pub use delivery::{DeliveryClient, DeliveryOutcome, HttpDeliveryClient};
pub use error::{BridgeError, BridgeResult};
pub use observability::BridgeStats;
pub use pipeline::{validate, ParseError, ValidatedPayload};
pub use protocol::{ConnectResultCode, InboundMessage};
pub use transport::{ConnectionEventHandler, MqttTransport, Transport};
