//! Testing utilities and mock implementations
//!
//! Mocks for exercising the bridge without an MQTT broker or an HTTP endpoint.

pub mod mocks;

pub use mocks::*;
