//! Payload validation
//!
//! Decodes a raw MQTT payload as UTF-8 and parses it as JSON. Any JSON value is
//! accepted; there is no schema. Validation is a pure function of its input.

use serde_json::Value;
use std::str::Utf8Error;
use thiserror::Error;

/// Why a payload could not be forwarded
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),
    #[error("Payload is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

/// A payload that decoded to a JSON value
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayload(Value);

impl ValidatedPayload {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Indented rendering used in status output
    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}

impl From<Value> for ValidatedPayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Decode and parse a raw payload
pub fn validate(payload: &[u8]) -> Result<ValidatedPayload, ParseError> {
    let text = std::str::from_utf8(payload)?;
    let value = serde_json::from_str(text)?;
    Ok(ValidatedPayload(value))
}
