//! Delivery outcome classification
//!
//! Every delivery attempt ends in exactly one [`DeliveryOutcome`]. The mapping from
//! HTTP status to outcome is total: 200 and 201 succeed, 5xx is a server error and
//! every other status is a rejection.

use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Maximum number of characters of a non-JSON response body that are kept
pub const RESPONSE_PREVIEW_CHARS: usize = 200;

/// Captured response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Body parsed as JSON
    Json(Value),
    /// First 200 characters of a body that is not JSON
    Text(String),
}

impl ResponseBody {
    /// Keep the body as JSON when it parses, otherwise a truncated text preview
    pub fn capture(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(truncate_chars(text, RESPONSE_PREVIEW_CHARS)),
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Json(value) => write!(f, "{value}"),
            ResponseBody::Text(text) => f.write_str(text),
        }
    }
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// 200 or 201
    Success { status: u16, response: ResponseBody },
    /// Any status that is neither success nor 5xx
    ClientRejected { status: u16, body: String },
    /// 5xx
    ServerError { status: u16, body: String },
    /// Connection refused or endpoint unreachable
    ConnectionFailed { cause: String },
    /// No complete response within the timeout
    TimedOut { timeout: Duration },
    /// Any other transport fault
    Failed { cause: String },
}

/// Discriminant of a [`DeliveryOutcome`], used for counters and log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    ClientRejected,
    ServerError,
    ConnectionFailed,
    TimedOut,
    Failed,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::ClientRejected => "client_rejected",
            OutcomeKind::ServerError => "server_error",
            OutcomeKind::ConnectionFailed => "connection_failed",
            OutcomeKind::TimedOut => "timed_out",
            OutcomeKind::Failed => "failed",
        }
    }
}

impl DeliveryOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            DeliveryOutcome::Success { .. } => OutcomeKind::Success,
            DeliveryOutcome::ClientRejected { .. } => OutcomeKind::ClientRejected,
            DeliveryOutcome::ServerError { .. } => OutcomeKind::ServerError,
            DeliveryOutcome::ConnectionFailed { .. } => OutcomeKind::ConnectionFailed,
            DeliveryOutcome::TimedOut { .. } => OutcomeKind::TimedOut,
            DeliveryOutcome::Failed { .. } => OutcomeKind::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success { .. })
    }

    /// HTTP status, when a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryOutcome::Success { status, .. }
            | DeliveryOutcome::ClientRejected { status, .. }
            | DeliveryOutcome::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Success { status, response } => {
                write!(f, "delivered (HTTP {status}): {response}")
            }
            DeliveryOutcome::ClientRejected { status, body } => {
                write!(f, "rejected by endpoint (HTTP {status}): {body}")
            }
            DeliveryOutcome::ServerError { status, body } => {
                write!(f, "endpoint server error (HTTP {status}): {body}")
            }
            DeliveryOutcome::ConnectionFailed { cause } => {
                write!(f, "cannot connect to endpoint: {cause}")
            }
            DeliveryOutcome::TimedOut { timeout } => {
                write!(f, "no response within {}ms", timeout.as_millis())
            }
            DeliveryOutcome::Failed { cause } => write!(f, "delivery failed: {cause}"),
        }
    }
}

/// Classify a received response (pure function)
pub fn classify_response(status: u16, body: &str) -> DeliveryOutcome {
    match status {
        200 | 201 => DeliveryOutcome::Success {
            status,
            response: ResponseBody::capture(body),
        },
        500..=599 => DeliveryOutcome::ServerError {
            status,
            body: truncate_chars(body, RESPONSE_PREVIEW_CHARS),
        },
        _ => DeliveryOutcome::ClientRejected {
            status,
            body: truncate_chars(body, RESPONSE_PREVIEW_CHARS),
        },
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
