//! Pure message routing logic for MQTT events
//!
//! This module contains pure functions for classifying event-loop output
//! and deciding whether an inbound publish is handed to the pipeline.

use super::connection::ConnectionState;
use super::health_monitor::HealthMonitor;
use crate::protocol::{topic_matches_filter, ConnectResultCode};
use bytes::Bytes;
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    code: ConnectResultCode::from(&connack.code),
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    qos: Self::qos_level(publish.qos),
                    retain: publish.retain,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    granted_qos: Self::granted_qos(&suback.return_codes),
                },
                Packet::UnsubAck(_) => EventRoute::UnsubscribeAcknowledged,
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::OutgoingDisconnect,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Granted QoS of a single-topic SubAck; `None` when the broker refused it (pure function)
    pub fn granted_qos(return_codes: &[SubscribeReasonCode]) -> Option<u8> {
        match return_codes.first() {
            Some(SubscribeReasonCode::Success(qos)) => Some(Self::qos_level(*qos)),
            _ => None,
        }
    }

    /// Convert a configured QoS level to the client type (pure function)
    pub fn to_qos(level: u8) -> QoS {
        match level {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    /// Numeric QoS level (pure function)
    pub fn qos_level(qos: QoS) -> u8 {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }

    /// Decide whether an inbound publish is handed to the pipeline (pure function)
    pub fn should_process_message(
        state: &ConnectionState,
        filter: &str,
        topic: &str,
    ) -> Result<(), DropReason> {
        if !HealthMonitor::accepts_messages(state) {
            return Err(DropReason::NotSubscribed(state.clone()));
        }
        if !topic_matches_filter(filter, topic) {
            debug!("Topic mismatch: expected {}, got {}", filter, topic);
            return Err(DropReason::TopicMismatch);
        }
        Ok(())
    }
}

impl From<&ConnectReturnCode> for ConnectResultCode {
    fn from(code: &ConnectReturnCode) -> Self {
        match code {
            ConnectReturnCode::Success => ConnectResultCode::Accepted,
            ConnectReturnCode::RefusedProtocolVersion => {
                ConnectResultCode::UnacceptableProtocolVersion
            }
            ConnectReturnCode::BadClientId => ConnectResultCode::IdentifierRejected,
            ConnectReturnCode::ServiceUnavailable => ConnectResultCode::ServerUnavailable,
            ConnectReturnCode::BadUserNamePassword => ConnectResultCode::BadCredentials,
            ConnectReturnCode::NotAuthorized => ConnectResultCode::NotAuthorized,
        }
    }
}

/// Why an inbound publish was not handed to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// Session not in the Subscribed state
    NotSubscribed(ConnectionState),
    /// Topic outside the subscription filter
    TopicMismatch,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::NotSubscribed(state) => write!(f, "session not subscribed ({state})"),
            DropReason::TopicMismatch => f.write_str("topic does not match subscription"),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// ConnAck received (rumqttc reports refusals as errors, but both are handled)
    ConnectionAcknowledged {
        code: ConnectResultCode,
        session_present: bool,
    },
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        qos: u8,
        retain: bool,
    },
    /// SubAck for the bridge subscription
    SubscriptionAcknowledged { granted_qos: Option<u8> },
    UnsubscribeAcknowledged,
    /// MQTT broker disconnected
    Disconnected,
    /// Our own DISCONNECT was written to the socket
    OutgoingDisconnect,
    /// Infrastructure event (PingResp, PubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
