//! Bridge lifecycle management
//!
//! Start: spawn the delivery workers, then connect the transport. A failed first
//! connection is only a warning because the connector's supervisor keeps retrying.
//!
//! Shutdown: disconnect the transport, close the queue, give the workers a bounded
//! time to finish in-flight work and log the final statistics.

use super::controller::BridgeController;
use super::worker::spawn_workers;
use crate::observability::metrics::StatsSnapshot;
use crate::transport::{Session, Transport};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default time workers get to finish in-flight deliveries on shutdown
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Bridge lifecycle with injected transport and controller
pub struct BridgeLifecycle<T>
where
    T: Transport + 'static,
{
    transport: T,
    controller: Arc<BridgeController>,
    worker_count: usize,
    drain_timeout: Duration,
    workers: Vec<JoinHandle<()>>,
    started: bool,
}

impl<T> BridgeLifecycle<T>
where
    T: Transport + 'static,
{
    pub fn new(transport: T, controller: Arc<BridgeController>, worker_count: usize) -> Self {
        Self {
            transport,
            controller,
            worker_count: worker_count.max(1),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            workers: Vec::new(),
            started: false,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Get the transport instance for testing
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn controller(&self) -> &Arc<BridgeController> {
        &self.controller
    }

    pub fn session(&self) -> Session {
        self.transport.session()
    }

    pub fn session_watch(&self) -> watch::Receiver<Session> {
        self.transport.session_watch()
    }

    pub fn is_running(&self) -> bool {
        self.started
    }

    /// Check if the transport supervisor gave up reconnecting
    pub fn is_permanently_disconnected(&self) -> bool {
        self.transport.is_permanently_disconnected()
    }

    /// Spawn the workers and connect to the broker
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        if self.started {
            return Err(LifecycleError::AlreadyStarted);
        }
        if self.controller.queue().is_closed() {
            return Err(LifecycleError::QueueClosed);
        }

        info!(
            workers = self.worker_count,
            endpoint = %self.controller.endpoint(),
            "Starting bridge"
        );
        self.workers = spawn_workers(self.worker_count, self.controller.clone());
        self.started = true;

        if let Err(e) = self.transport.connect().await {
            warn!(
                "Initial broker connection failed, will keep retrying in the background: {}",
                e
            );
        }

        info!("Bridge started");
        Ok(())
    }

    /// Disconnect, drain the workers and return the final statistics
    pub async fn shutdown(&mut self) -> Result<StatsSnapshot, LifecycleError> {
        info!("Shutting down bridge");

        if let Err(e) = self.transport.disconnect().await {
            warn!("Broker disconnect failed during shutdown: {}", e);
        }

        let queue = self.controller.queue();
        queue.close();
        if !queue.is_empty() {
            info!(pending = queue.len(), "Waiting for queued messages to finish");
        }

        let workers = std::mem::take(&mut self.workers);
        let abort_handles: Vec<_> = workers.iter().map(|handle| handle.abort_handle()).collect();
        let drain = async {
            for handle in workers {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!("Delivery worker ended abnormally: {}", e);
                    }
                }
            }
        };

        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!(
                "Workers did not finish within {}ms, aborting",
                self.drain_timeout.as_millis()
            );
            for handle in abort_handles {
                handle.abort();
            }
        }
        self.started = false;

        let snapshot = self.controller.stats().snapshot();
        info!(
            received = snapshot.received,
            sent = snapshot.sent,
            failed = snapshot.failed,
            rejected = snapshot.rejected,
            dropped = snapshot.dropped,
            reconnects = snapshot.reconnects,
            "📊 Final statistics: {} (success rate {:.2}%)",
            snapshot,
            snapshot.success_rate
        );
        info!("Bridge shutdown complete");

        Ok(snapshot)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Bridge is already running")]
    AlreadyStarted,
    #[error("Message queue is closed; a stopped bridge cannot be restarted")]
    QueueClosed,
}
