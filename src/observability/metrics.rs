//! Thread-safe bridge statistics
//!
//! Atomic counters for the message pipeline plus a bounded window of delivery
//! latencies. One `BridgeStats` is created at startup and shared by `Arc` with the
//! controller, the workers and the health server.

use crate::delivery::OutcomeKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of delivery latencies kept for percentile calculation
const LATENCY_WINDOW: usize = 1000;

/// Pipeline counters
#[derive(Debug)]
pub struct BridgeStats {
    received: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    reconnects: AtomicU64,

    // Failure breakdown by outcome kind
    client_rejected: AtomicU64,
    server_errors: AtomicU64,
    connection_failures: AtomicU64,
    timeouts: AtomicU64,
    other_failures: AtomicU64,
    processing_faults: AtomicU64,

    started_at: AtomicU64,
    delivery_times: Mutex<Vec<u64>>, // in milliseconds
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            client_rejected: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            other_failures: AtomicU64::new(0),
            processing_faults: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
            delivery_times: Mutex::new(Vec::new()),
        }
    }

    /// A message was handed to the bridge by the connector
    pub fn message_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Payload failed validation; delivery was skipped
    pub fn message_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Message discarded before processing (queue overflow or not subscribed)
    pub fn message_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_attempted(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Unexpected fault while processing a message
    pub fn processing_fault(&self) {
        self.processing_faults.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a delivery attempt
    pub fn delivery_completed(&self, kind: OutcomeKind, duration: Duration) {
        let counter = match kind {
            OutcomeKind::Success => &self.sent,
            OutcomeKind::ClientRejected => &self.client_rejected,
            OutcomeKind::ServerError => &self.server_errors,
            OutcomeKind::ConnectionFailed => &self.connection_failures,
            OutcomeKind::TimedOut => &self.timeouts,
            OutcomeKind::Failed => &self.other_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if kind != OutcomeKind::Success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.record_delivery_time(duration);
    }

    fn record_delivery_time(&self, duration: Duration) {
        if let Ok(mut times) = self.delivery_times.lock() {
            times.push(duration.as_millis() as u64);

            // Limit to the most recent measurements to prevent unbounded growth
            if times.len() > LATENCY_WINDOW {
                times.remove(0);
            }
        }
    }

    /// Calculate delivery time statistics (avg, p50, p95)
    fn calculate_delivery_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.delivery_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();
        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
        )
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let received = self.received.load(Ordering::Relaxed);
        let sent = self.sent.load(Ordering::Relaxed);
        let (avg, p50, p95) = self.calculate_delivery_time_statistics();
        let started_at = self.started_at.load(Ordering::Relaxed);

        StatsSnapshot {
            received,
            sent,
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            success_rate: success_rate(sent, received),
            failures: FailureBreakdown {
                client_rejected: self.client_rejected.load(Ordering::Relaxed),
                server_errors: self.server_errors.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                timeouts: self.timeouts.load(Ordering::Relaxed),
                other: self.other_failures.load(Ordering::Relaxed),
                processing_faults: self.processing_faults.load(Ordering::Relaxed),
            },
            delivery_time_avg_ms: avg,
            delivery_time_p50_ms: p50,
            delivery_time_p95_ms: p95,
            uptime_seconds: current_timestamp().saturating_sub(started_at),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub sent: u64,
    pub failed: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub reconnects: u64,
    /// `sent / received * 100`, rounded to two decimals
    pub success_rate: f64,
    pub failures: FailureBreakdown,
    pub delivery_time_avg_ms: f64,
    pub delivery_time_p50_ms: f64,
    pub delivery_time_p95_ms: f64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureBreakdown {
    pub client_rejected: u64,
    pub server_errors: u64,
    pub connection_failures: u64,
    pub timeouts: u64,
    pub other: u64,
    pub processing_faults: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Received={}, Sent={}, Failed={}, Rejected={}, Dropped={}",
            self.received, self.sent, self.failed, self.rejected, self.dropped
        )
    }
}

/// Success rate in percent with two decimals; 0 when nothing was received
pub fn success_rate(sent: u64, received: u64) -> f64 {
    if received == 0 {
        return 0.0;
    }
    (sent as f64 / received as f64 * 10_000.0).round() / 100.0
}

fn percentile(sorted_values: &[u64], percentile: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    let index = ((percentile / 100.0) * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[index.min(sorted_values.len() - 1)] as f64
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
