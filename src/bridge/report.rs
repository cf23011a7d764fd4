//! One-way status reporting
//!
//! The controller and workers describe what happened as [`StatusEvent`]s and hand them
//! to a [`StatusSink`]. Reporting is synchronous and never fails, so it cannot stall
//! or break the pipeline.

use crate::delivery::DeliveryOutcome;
use crate::observability::metrics::StatsSnapshot;
use crate::protocol::ConnectResultCode;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Something worth telling the operator about
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Connected {
        code: ConnectResultCode,
    },
    Subscribed {
        topic: String,
        granted_qos: u8,
    },
    SubscriptionFailed {
        topic: String,
        reason: String,
    },
    Disconnected {
        reason: String,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    MessageReceived {
        id: Uuid,
        sequence: u64,
        topic: String,
        qos: u8,
        payload: String,
    },
    MessageDropped {
        topic: String,
        reason: String,
    },
    PayloadRejected {
        sequence: u64,
        error: String,
        raw: String,
    },
    DeliveryStarted {
        sequence: u64,
        endpoint: String,
    },
    DeliveryCompleted {
        sequence: u64,
        outcome: DeliveryOutcome,
    },
    ProcessingFault {
        sequence: Option<u64>,
        detail: String,
    },
    Statistics(StatsSnapshot),
}

/// Receiver of status events
pub trait StatusSink: Send + Sync {
    fn report(&self, event: StatusEvent);
}

/// Status sink writing human-readable lines through `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn report(&self, event: StatusEvent) {
        match event {
            StatusEvent::Connected { code } if code.is_success() => {
                info!("✅ Connected to MQTT broker");
            }
            StatusEvent::Connected { code } => {
                error!("❌ MQTT broker refused connection: {}", code);
            }
            StatusEvent::Subscribed { topic, granted_qos } => {
                info!(topic = %topic, qos = granted_qos, "🎧 Listening for messages on {}", topic);
            }
            StatusEvent::SubscriptionFailed { topic, reason } => {
                error!(topic = %topic, "❌ Failed to subscribe to {}: {}", topic, reason);
            }
            StatusEvent::Disconnected { reason } => {
                warn!("👋 Disconnected from MQTT broker: {}", reason);
            }
            StatusEvent::Reconnecting { attempt, delay } => {
                info!(
                    attempt,
                    "🔄 Reconnecting to MQTT broker in {}ms",
                    delay.as_millis()
                );
            }
            StatusEvent::MessageReceived {
                id,
                sequence,
                topic,
                qos,
                payload,
            } => {
                info!(
                    message_id = %id,
                    sequence,
                    topic = %topic,
                    qos,
                    "📨 Message #{} received from topic {}: {}",
                    sequence,
                    topic,
                    payload
                );
            }
            StatusEvent::MessageDropped { topic, reason } => {
                warn!(topic = %topic, "Message dropped: {}", reason);
            }
            StatusEvent::PayloadRejected {
                sequence,
                error,
                raw,
            } => {
                warn!(
                    sequence,
                    "❌ Invalid JSON format in MQTT message: {} (raw message: {})",
                    error,
                    raw
                );
            }
            StatusEvent::DeliveryStarted { sequence, endpoint } => {
                info!(sequence, "🚀 Sending to API: {}", endpoint);
            }
            StatusEvent::DeliveryCompleted { sequence, outcome } => {
                let kind = outcome.kind().as_str();
                if outcome.is_success() {
                    info!(sequence, outcome = kind, "✅ API {}", outcome);
                } else {
                    warn!(sequence, outcome = kind, "❌ API {}", outcome);
                }
            }
            StatusEvent::ProcessingFault { sequence, detail } => {
                error!(sequence = ?sequence, "Unexpected fault while processing message: {}", detail);
            }
            StatusEvent::Statistics(snapshot) => {
                info!("📊 Stats: {}", snapshot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let sink = TracingStatusSink;
        let events = vec![
            StatusEvent::Connected {
                code: ConnectResultCode::Accepted,
            },
            StatusEvent::Connected {
                code: ConnectResultCode::NotAuthorized,
            },
            StatusEvent::Subscribed {
                topic: "t".to_string(),
                granted_qos: 0,
            },
            StatusEvent::Disconnected {
                reason: "reset".to_string(),
            },
            StatusEvent::DeliveryCompleted {
                sequence: 1,
                outcome: DeliveryOutcome::TimedOut {
                    timeout: Duration::from_secs(5),
                },
            },
            StatusEvent::ProcessingFault {
                sequence: None,
                detail: "panic".to_string(),
            },
        ];
        for event in events {
            sink.report(event);
        }
    }
}
