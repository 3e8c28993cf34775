//! Health check HTTP server for container orchestration
//!
//! Reports the publisher's broker link: `/ready` flips to 200 only while
//! the connection is up, `/live` only proves the process answers.

use crate::broker::{ConnectionState, NotificationPublisher};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    service: String,
    port: u16,
    publisher: NotificationPublisher,
    started_at: Instant,
}

impl HealthServer {
    pub fn new(service: impl Into<String>, port: u16, publisher: NotificationPublisher) -> Self {
        Self {
            service: service.into(),
            port,
            publisher,
            started_at: Instant::now(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// All endpoints, exposed separately so they can be driven without a socket
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let ready_server = self.clone();
        let metrics_server = self.clone();

        // GET /health - overall status with the broker check
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
                    Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
                }
            });

        // GET /ready - readiness check
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = ready_server.clone();
                async move {
                    let state = server.publisher.state();
                    let ready = state == ConnectionState::Connected;
                    let response = ReadinessResponse {
                        ready,
                        state,
                        timestamp: current_timestamp(),
                    };
                    let code = if ready {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&response), code))
                }
            });

        // GET /live - liveness check
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET /metrics - publisher counters
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || warp::reply::json(&metrics_server.publisher.metrics()));

        health_route.or(ready_route).or(live_route).or(metrics_route)
    }

    /// Serve until the surrounding task is dropped
    pub async fn start(self: Arc<Self>) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!(port = self.port, service = %self.service, "Starting health server");
        warp::serve(self.routes()).run(addr).await;
    }

    fn health_status(&self) -> HealthStatus {
        let now = current_timestamp();
        let state = self.publisher.state();
        let reconnecting = self.publisher.is_reconnecting();

        let broker_check = match state {
            ConnectionState::Connected => HealthCheck {
                status: "healthy".to_string(),
                message: Some("Broker connection established".to_string()),
                last_check: now,
            },
            _ if reconnecting => HealthCheck {
                status: "degraded".to_string(),
                message: Some("Reconnecting to broker".to_string()),
                last_check: now,
            },
            other => HealthCheck {
                status: "unhealthy".to_string(),
                message: Some(format!("Broker connection is {other}")),
                last_check: now,
            },
        };

        let status = broker_check.status.clone();
        let mut checks = HashMap::new();
        checks.insert("broker".to_string(), broker_check);

        HealthStatus {
            status,
            service: self.service.clone(),
            state,
            timestamp: now,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            checks,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    service: String,
    state: ConnectionState,
    timestamp: u64,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    state: ConnectionState,
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
