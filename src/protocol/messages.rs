//! Message types exchanged between the broker connection and the bridge pipeline

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Characters of payload shown in status output
pub const PAYLOAD_PREVIEW_CHARS: usize = 200;

/// A message pushed by the broker on the subscribed topic
///
/// Immutable once received. The id and sequence number exist only for log correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub id: Uuid,
    pub sequence: u64,
    pub topic: String,
    pub payload: Bytes,
    pub qos: u8,
    pub retain: bool,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
            received_at: Utc::now(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Payload rendered for status output; invalid UTF-8 is replaced, not rejected
    ///
    /// Capped at [`PAYLOAD_PREVIEW_CHARS`] characters, with the full size appended when cut.
    pub fn payload_preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        match text.char_indices().nth(PAYLOAD_PREVIEW_CHARS) {
            Some((cut, _)) => format!("{}… ({} bytes)", &text[..cut], self.payload.len()),
            None => text.into_owned(),
        }
    }
}

/// MQTT 3.1.1 CONNACK return code (section 3.2.2.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectResultCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
}

impl ConnectResultCode {
    /// Numeric code as sent on the wire
    pub fn code(self) -> u8 {
        match self {
            ConnectResultCode::Accepted => 0,
            ConnectResultCode::UnacceptableProtocolVersion => 1,
            ConnectResultCode::IdentifierRejected => 2,
            ConnectResultCode::ServerUnavailable => 3,
            ConnectResultCode::BadCredentials => 4,
            ConnectResultCode::NotAuthorized => 5,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, ConnectResultCode::Accepted)
    }
}

impl std::fmt::Display for ConnectResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectResultCode::Accepted => "connection accepted",
            ConnectResultCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectResultCode::IdentifierRejected => "identifier rejected",
            ConnectResultCode::ServerUnavailable => "server unavailable",
            ConnectResultCode::BadCredentials => "bad user name or password",
            ConnectResultCode::NotAuthorized => "not authorized",
        };
        write!(f, "{text} ({})", self.code())
    }
}
