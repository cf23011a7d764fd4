//! Outbound delivery of validated payloads
//!
//! A delivery is exactly one HTTP attempt. Failures are reported as
//! [`DeliveryOutcome`] values, never retried and never persisted.

use crate::pipeline::ValidatedPayload;
use async_trait::async_trait;
use std::time::Duration;

pub mod http;
pub mod outcome;

pub use http::HttpDeliveryClient;
pub use outcome::{classify_response, DeliveryOutcome, OutcomeKind, ResponseBody};

/// Client that delivers one payload to the API endpoint
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// POST the payload as JSON, bounded by `timeout`; makes exactly one attempt
    async fn deliver(
        &self,
        payload: &ValidatedPayload,
        endpoint: &str,
        timeout: Duration,
    ) -> DeliveryOutcome;
}
