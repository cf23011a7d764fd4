//! Per-message processing and connector event handling
//!
//! The controller is registered with the connector as its [`ConnectionEventHandler`].
//! Inbound messages are counted and queued; the workers later call
//! [`BridgeController::process_message`] which validates the payload, makes exactly one
//! delivery attempt and reports the outcome.

use super::queue::{MessageQueue, PushOutcome};
use super::report::{StatusEvent, StatusSink};
use crate::config::BridgeConfig;
use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::message_span;
use crate::observability::metrics::BridgeStats;
use crate::pipeline::{validate, ParseError};
use crate::protocol::{ConnectResultCode, InboundMessage};
use crate::transport::ConnectionEventHandler;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, Instrument};

/// What happened to a processed message
#[derive(Debug)]
pub enum MessageDisposition {
    /// Payload was not valid JSON; no delivery was attempted
    Rejected(ParseError),
    /// One delivery attempt was made
    Delivered(DeliveryOutcome),
}

impl MessageDisposition {
    /// A delivery attempt was made, whatever its outcome
    pub fn is_delivered(&self) -> bool {
        matches!(self, MessageDisposition::Delivered(_))
    }

    /// The endpoint accepted the payload
    pub fn is_success(&self) -> bool {
        matches!(self, MessageDisposition::Delivered(outcome) if outcome.is_success())
    }
}

pub struct BridgeController {
    delivery: Arc<dyn DeliveryClient>,
    sink: Arc<dyn StatusSink>,
    stats: Arc<BridgeStats>,
    queue: Arc<MessageQueue>,
    endpoint: String,
    timeout: Duration,
}

impl BridgeController {
    pub fn new(
        config: &BridgeConfig,
        delivery: Arc<dyn DeliveryClient>,
        sink: Arc<dyn StatusSink>,
        stats: Arc<BridgeStats>,
    ) -> Self {
        let queue = Arc::new(MessageQueue::new(
            config.queue.capacity,
            config.queue.full_policy,
        ));

        Self {
            delivery,
            sink,
            stats,
            queue,
            endpoint: config.api.endpoint_url.clone(),
            timeout: config.api.timeout(),
        }
    }

    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.clone()
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Validate, deliver once, record and report a single message
    pub async fn process_message(&self, message: &InboundMessage) -> MessageDisposition {
        let span = message_span!(
            message_id = %message.id,
            sequence = message.sequence,
            topic = %message.topic
        );

        async {
            self.sink.report(StatusEvent::MessageReceived {
                id: message.id,
                sequence: message.sequence,
                topic: message.topic.clone(),
                qos: message.qos,
                payload: message.payload_preview(),
            });

            let disposition = match validate(&message.payload) {
                Err(error) => {
                    self.stats.message_rejected();
                    self.sink.report(StatusEvent::PayloadRejected {
                        sequence: message.sequence,
                        error: error.to_string(),
                        raw: message.payload_preview(),
                    });
                    MessageDisposition::Rejected(error)
                }
                Ok(payload) => {
                    debug!("Validated payload:\n{}", payload.to_pretty_string());
                    self.sink.report(StatusEvent::DeliveryStarted {
                        sequence: message.sequence,
                        endpoint: self.endpoint.clone(),
                    });

                    let started = Instant::now();
                    let outcome = self
                        .delivery
                        .deliver(&payload, &self.endpoint, self.timeout)
                        .await;
                    self.stats
                        .delivery_completed(outcome.kind(), started.elapsed());

                    self.sink.report(StatusEvent::DeliveryCompleted {
                        sequence: message.sequence,
                        outcome: outcome.clone(),
                    });
                    MessageDisposition::Delivered(outcome)
                }
            };

            self.report_statistics();
            disposition
        }
        .instrument(span)
        .await
    }

    /// Record a fault that escaped message processing
    pub fn report_fault(&self, sequence: Option<u64>, detail: impl Into<String>) {
        self.stats.processing_fault();
        self.sink.report(StatusEvent::ProcessingFault {
            sequence,
            detail: detail.into(),
        });
        self.report_statistics();
    }

    pub fn report_statistics(&self) {
        self.sink
            .report(StatusEvent::Statistics(self.stats.snapshot()));
    }

    fn report_dropped(&self, topic: &str, reason: String) {
        self.stats.message_dropped();
        self.sink.report(StatusEvent::MessageDropped {
            topic: topic.to_string(),
            reason,
        });
    }
}

#[async_trait]
impl ConnectionEventHandler for BridgeController {
    async fn on_connected(&self, code: ConnectResultCode) {
        self.sink.report(StatusEvent::Connected { code });
    }

    async fn on_subscribed(&self, topic: &str, granted_qos: u8) {
        self.sink.report(StatusEvent::Subscribed {
            topic: topic.to_string(),
            granted_qos,
        });
    }

    async fn on_subscription_failed(&self, topic: &str, reason: &str) {
        self.sink.report(StatusEvent::SubscriptionFailed {
            topic: topic.to_string(),
            reason: reason.to_string(),
        });
    }

    async fn on_message(&self, message: InboundMessage) {
        self.stats.message_received();

        match self.queue.push(message).await {
            PushOutcome::Enqueued => {}
            PushOutcome::DroppedOldest(evicted) => self.report_dropped(
                &evicted.topic,
                format!("queue full, evicted message #{}", evicted.sequence),
            ),
            PushOutcome::DroppedNewest(rejected) => self.report_dropped(
                &rejected.topic,
                format!("queue full, discarded message #{}", rejected.sequence),
            ),
            PushOutcome::Closed(rejected) => self.report_dropped(
                &rejected.topic,
                format!("bridge shutting down, discarded message #{}", rejected.sequence),
            ),
        }
    }

    async fn on_message_dropped(&self, topic: &str, reason: &str) {
        self.stats.message_received();
        self.report_dropped(topic, reason.to_string());
    }

    async fn on_disconnected(&self, reason: &str) {
        self.sink.report(StatusEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    async fn on_reconnecting(&self, attempt: u32, delay: Duration) {
        self.stats.reconnect_attempted();
        self.sink
            .report(StatusEvent::Reconnecting { attempt, delay });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueFullPolicy;
    use crate::delivery::ResponseBody;
    use crate::testing::mocks::{MockDeliveryClient, RecordingStatusSink};
    use serde_json::json;

    fn controller_with(
        delivery: Arc<MockDeliveryClient>,
        sink: Arc<RecordingStatusSink>,
        capacity: usize,
        policy: QueueFullPolicy,
    ) -> BridgeController {
        let mut config = BridgeConfig::test_config();
        config.queue.capacity = capacity;
        config.queue.full_policy = policy;
        BridgeController::new(&config, delivery, sink, Arc::new(BridgeStats::new()))
    }

    fn controller() -> (BridgeController, Arc<MockDeliveryClient>, Arc<RecordingStatusSink>) {
        let delivery = Arc::new(MockDeliveryClient::new());
        let sink = Arc::new(RecordingStatusSink::new());
        let controller = controller_with(
            delivery.clone(),
            sink.clone(),
            8,
            QueueFullPolicy::DropOldest,
        );
        (controller, delivery, sink)
    }

    #[tokio::test]
    async fn test_valid_message_is_delivered_once() {
        let (controller, delivery, sink) = controller();
        delivery.push_outcome(DeliveryOutcome::Success {
            status: 200,
            response: ResponseBody::Json(json!({"ok": true})),
        });

        let message = InboundMessage::new("drones/1", r#"{"codeName":"DRONE-001"}"#, 1)
            .with_sequence(1);
        let disposition = controller.process_message(&message).await;

        assert!(disposition.is_delivered());
        assert!(disposition.is_success());
        assert_eq!(delivery.call_count(), 1);
        assert_eq!(
            delivery.calls()[0].payload,
            json!({"codeName": "DRONE-001"})
        );

        let events = sink.events();
        assert!(matches!(events[0], StatusEvent::MessageReceived { sequence: 1, .. }));
        assert!(matches!(events[1], StatusEvent::DeliveryStarted { .. }));
        assert!(matches!(events[2], StatusEvent::DeliveryCompleted { .. }));
        match &events[3] {
            StatusEvent::Statistics(snapshot) => assert_eq!(snapshot.sent, 1),
            other => panic!("expected statistics, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_never_delivered() {
        let (controller, delivery, sink) = controller();

        let message = InboundMessage::new("drones/1", "not-json", 0).with_sequence(4);
        let disposition = controller.process_message(&message).await;

        assert!(matches!(disposition, MessageDisposition::Rejected(_)));
        assert!(!disposition.is_delivered());
        assert_eq!(delivery.call_count(), 0);
        assert_eq!(controller.stats().snapshot().rejected, 1);
        assert!(sink.events().iter().any(|event| matches!(
            event,
            StatusEvent::PayloadRejected { sequence: 4, raw, .. } if raw == "not-json"
        )));
    }

    #[tokio::test]
    async fn test_failed_delivery_is_counted() {
        let (controller, delivery, _sink) = controller();
        delivery.push_outcome(DeliveryOutcome::ServerError {
            status: 500,
            body: "boom".to_string(),
        });

        let message = InboundMessage::new("drones/1", "{}", 0);
        controller.stats().message_received();
        let disposition = controller.process_message(&message).await;

        assert!(disposition.is_delivered());
        assert!(!disposition.is_success());
        let snapshot = controller.stats().snapshot();
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.failures.server_errors, 1);
        assert_eq!(snapshot.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_on_message_enqueues() {
        let (controller, _delivery, _sink) = controller();
        controller
            .on_message(InboundMessage::new("drones/1", "{}", 0).with_sequence(1))
            .await;

        assert_eq!(controller.queue().len(), 1);
        assert_eq!(controller.stats().snapshot().received, 1);
    }

    #[tokio::test]
    async fn test_queue_overflow_is_reported() {
        let delivery = Arc::new(MockDeliveryClient::new());
        let sink = Arc::new(RecordingStatusSink::new());
        let controller =
            controller_with(delivery, sink.clone(), 1, QueueFullPolicy::DropNewest);

        controller
            .on_message(InboundMessage::new("drones/1", "{}", 0).with_sequence(1))
            .await;
        controller
            .on_message(InboundMessage::new("drones/1", "{}", 0).with_sequence(2))
            .await;

        let snapshot = controller.stats().snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.dropped, 1);
        assert!(sink.events().iter().any(|event| matches!(
            event,
            StatusEvent::MessageDropped { reason, .. } if reason.contains("#2")
        )));
    }

    #[tokio::test]
    async fn test_reconnect_events_are_counted() {
        let (controller, _delivery, sink) = controller();
        controller
            .on_reconnecting(3, Duration::from_millis(4000))
            .await;

        assert_eq!(controller.stats().snapshot().reconnects, 1);
        assert_eq!(
            sink.events(),
            vec![StatusEvent::Reconnecting {
                attempt: 3,
                delay: Duration::from_millis(4000)
            }]
        );
    }

    #[tokio::test]
    async fn test_report_fault() {
        let (controller, _delivery, sink) = controller();
        controller.report_fault(Some(7), "worker panicked");

        assert_eq!(controller.stats().snapshot().failures.processing_faults, 1);
        assert!(matches!(
            sink.events()[0],
            StatusEvent::ProcessingFault { sequence: Some(7), .. }
        ));
    }
}
