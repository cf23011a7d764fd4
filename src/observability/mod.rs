//! Observability: structured logging, bridge statistics and the health server

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{success_rate, BridgeStats, FailureBreakdown, StatsSnapshot};

// Span macros for structured logging
pub use logging::{message_span, mqtt_span};
