//! Broker-side message types and MQTT topic rules

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
