//! Error types for the bridge
//!
//! Only failures that abort an operation are errors. Per-message delivery results are
//! values (see [`crate::delivery::DeliveryOutcome`]) because a failed delivery is an
//! expected outcome, not a fault of the bridge.

use crate::bridge::LifecycleError;
use crate::config::ConfigError;
use crate::transport::mqtt::MqttError;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Top-level error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Delivery client error: {message}")]
    DeliveryClient { message: String },

    #[error("Health server error: {message}")]
    HealthServer { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create delivery client error
    pub fn delivery_client<S: Into<String>>(message: S) -> Self {
        Self::DeliveryClient {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

const MAX_ERROR_MESSAGE_LEN: usize = 500;

fn secret_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*[^\s&]+")
            .expect("secret pattern is a valid regex")
    })
}

fn userinfo_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)([a-z][a-z0-9+.-]*://)[^/\s@]+@").expect("userinfo pattern is a valid regex")
    })
}

/// Redact credentials from an error message before it reaches the logs
///
/// Failure causes often embed the request URL; user-info and secret-looking query
/// parameters are masked and the result is capped at 500 bytes.
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = secret_pattern().replace_all(message, "${1}=***");
    let mut sanitized = userinfo_pattern()
        .replace_all(&sanitized, "${1}***@")
        .to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}
