//! Pure session monitoring and reconnection logic for the MQTT connector
//!
//! This module contains pure functions for session state transitions,
//! reconnection decision making and transition logging.

use super::connection::{ConnectionState, ReconnectConfig, SessionEvent};
use tracing::{debug, error, info, warn};

/// Pure session monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    /// Supports unlimited retries when max_attempts is None
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.jittered_delay(attempt),
        }
    }

    /// Determine next state after a session event (pure function)
    /// Returns None when the event is not valid in the current state
    pub fn determine_next_state(
        current: &ConnectionState,
        event: &SessionEvent,
    ) -> Option<ConnectionState> {
        use ConnectionState::*;

        match (current, event) {
            (_, SessionEvent::ConnectStarted) => Some(Connecting),
            (Connecting, SessionEvent::ConnAck(code)) => Some(if code.is_success() {
                Connected
            } else {
                Disconnected
            }),
            // A refused ConnAck can surface after the loss was already recorded
            (Disconnected, SessionEvent::ConnAck(code)) if !code.is_success() => {
                Some(Disconnected)
            }
            (Connected | Subscribed, SessionEvent::SubscribeSent) => Some(SubscriptionPending),
            (SubscriptionPending, SessionEvent::SubAck(Some(_))) => Some(Subscribed),
            (SubscriptionPending, SessionEvent::SubAck(None)) => Some(Connected),
            (_, SessionEvent::ConnectionLost(_)) => Some(Disconnected),
            (_, SessionEvent::GaveUp) => Some(Disconnected),
            (_, SessionEvent::Shutdown) => Some(Disconnected),
            _ => None,
        }
    }

    /// Check if session state allows handing messages to the pipeline (pure function)
    pub fn accepts_messages(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Subscribed)
    }

    /// Check if session state allows subscribing (pure function)
    pub fn can_subscribe(state: &ConnectionState) -> bool {
        matches!(
            state,
            ConnectionState::Connected | ConnectionState::Subscribed
        )
    }

    /// Check if the broker connection is up, subscribed or not (pure function)
    pub fn is_connected(state: &ConnectionState) -> bool {
        matches!(
            state,
            ConnectionState::Connected
                | ConnectionState::SubscriptionPending
                | ConnectionState::Subscribed
        )
    }

    /// Log session state transition (pure logging function)
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState, event: &SessionEvent) {
        match (from, to, event) {
            (ConnectionState::Connecting, ConnectionState::Connected, _) => {
                info!("MQTT connection established");
            }
            (_, ConnectionState::Disconnected, SessionEvent::ConnAck(code)) => {
                warn!("MQTT broker refused connection: {}", code);
            }
            (_, ConnectionState::Subscribed, SessionEvent::SubAck(Some(qos))) => {
                info!("Subscription active (granted QoS {})", qos);
            }
            (ConnectionState::SubscriptionPending, ConnectionState::Connected, _) => {
                error!("Subscription rejected by broker");
            }
            (_, ConnectionState::Disconnected, SessionEvent::ConnectionLost(reason)) => {
                warn!("MQTT connection lost: {}", reason);
            }
            (_, ConnectionState::Disconnected, SessionEvent::GaveUp) => {
                error!("MQTT connection permanently failed");
            }
            _ => {
                debug!(target: "mqtt_transport", "MQTT session state: {} -> {}", from, to);
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}
