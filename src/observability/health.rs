//! Health check HTTP server for container orchestration
//!
//! Provides HTTP endpoints for monitoring bridge status, supporting both
//! human operators and container orchestration platforms.

use crate::bridge::MessageQueue;
use crate::error::BridgeError;
use crate::observability::metrics::{BridgeStats, StatsSnapshot};
use crate::transport::Session;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// HTTP health check server
pub struct HealthServer {
    client_id: String,
    port: u16,
    session_rx: watch::Receiver<Session>,
    stats: Arc<BridgeStats>,
    queue: Arc<MessageQueue>,
}

impl HealthServer {
    pub fn new(
        client_id: String,
        port: u16,
        session_rx: watch::Receiver<Session>,
        stats: Arc<BridgeStats>,
        queue: Arc<MessageQueue>,
    ) -> Self {
        Self {
            client_id,
            port,
            session_rx,
            stats,
            queue,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// All routes served by the health server
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let health_server = self.clone();
        let ready_server = self.clone();
        let stats_server = self.clone();

        // GET /health - session state and statistics
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let status = server.health_status();
                    let code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&status),
                        code,
                    ))
                }
            });

        // GET /ready - readiness probe, ready once subscribed
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = ready_server.clone();
                async move {
                    let ready = server.session_rx.borrow().accepts_messages();
                    let response = ReadinessResponse {
                        ready,
                        timestamp: current_timestamp(),
                    };
                    let code = if ready {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&response),
                        code,
                    ))
                }
            });

        // GET /live - liveness probe
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET /stats - counters only
        let stats_route = warp::path("stats")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || warp::reply::json(&stats_server.stats.snapshot()));

        // GET / - endpoint list
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints = HashMap::from([
                ("/health", "Session state and statistics; 503 unless subscribed"),
                ("/ready", "Readiness probe"),
                ("/live", "Liveness probe"),
                ("/stats", "Message counters and delivery latencies"),
            ]);
            warp::reply::json(&endpoints)
        });

        health_route
            .or(ready_route)
            .or(live_route)
            .or(stats_route)
            .or(root_route)
    }

    /// Bind and serve until the task is dropped
    pub async fn start(self: Arc<Self>) -> Result<(), BridgeError> {
        let port = self.port;
        let routes = self.routes();

        let (address, server) = warp::serve(routes)
            .try_bind_ephemeral(([0, 0, 0, 0], port))
            .map_err(|e| BridgeError::HealthServer {
                message: format!("cannot bind port {port}: {e}"),
            })?;

        tracing::info!("Starting health server on {}", address);
        server.await;
        Ok(())
    }

    fn health_status(&self) -> HealthStatus {
        let session = self.session_rx.borrow().clone();
        let status = if session.accepts_messages() {
            "healthy"
        } else {
            "degraded"
        };

        HealthStatus {
            status: status.to_string(),
            timestamp: current_timestamp(),
            client_id: self.client_id.clone(),
            session,
            queue_depth: self.queue.len(),
            stats: self.stats.snapshot(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    client_id: String,
    session: Session,
    queue_depth: usize,
    stats: StatsSnapshot,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueFullPolicy;
    use crate::protocol::ConnectResultCode;
    use crate::transport::mqtt::SessionEvent;
    use serde_json::Value;

    fn server() -> (Arc<HealthServer>, watch::Sender<Session>, Arc<BridgeStats>) {
        let (session_tx, session_rx) = watch::channel(Session::new("drones/#"));
        let stats = Arc::new(BridgeStats::new());
        let queue = Arc::new(MessageQueue::new(4, QueueFullPolicy::DropOldest));
        let server = HealthServer::new(
            "bridge-test".to_string(),
            8080,
            session_rx,
            stats.clone(),
            queue,
        );
        (Arc::new(server), session_tx, stats)
    }

    fn subscribe(session_tx: &watch::Sender<Session>) {
        session_tx.send_modify(|session| {
            session.apply(&SessionEvent::ConnectStarted);
            session.apply(&SessionEvent::ConnAck(ConnectResultCode::Accepted));
            session.apply(&SessionEvent::SubscribeSent);
            session.apply(&SessionEvent::SubAck(Some(1)));
        });
    }

    #[tokio::test]
    async fn test_health_is_degraded_until_subscribed() {
        let (server, session_tx, _stats) = server();
        let routes = server.routes();

        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["session"]["state"], "disconnected");

        subscribe(&session_tx);
        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["session"]["state"], "subscribed");
        assert_eq!(body["session"]["granted_qos"], 1);
        assert_eq!(body["client_id"], "bridge-test");
    }

    #[tokio::test]
    async fn test_ready_and_live() {
        let (server, session_tx, _stats) = server();
        let routes = server.routes();

        let response = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        subscribe(&session_tx);
        let response = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = warp::test::request().path("/live").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["alive"], true);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let (server, _session_tx, stats) = server();
        stats.message_received();
        stats.message_rejected();

        let response = warp::test::request()
            .path("/stats")
            .reply(&server.routes())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["received"], 1);
        assert_eq!(body["rejected"], 1);
    }

    #[tokio::test]
    async fn test_unknown_path_is_rejected() {
        let (server, _session_tx, _stats) = server();
        let response = warp::test::request()
            .path("/metrics")
            .reply(&server.routes())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
