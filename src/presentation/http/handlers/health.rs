//! Health Check Handlers
//!
//! Provides health check endpoints for Kubernetes-style liveness and readiness probes.
//!
//! # Endpoints
//! - `GET /health` - Basic health check
//! - `GET /health/live` - Liveness probe (is the server running?)
//! - `GET /health/ready` - Readiness probe (are the hub and the message store answering?)

use std::time::{Duration, Instant};

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::time::timeout;

use crate::startup::AppState;

/// Server start time for uptime calculation
static SERVER_START: Lazy<Instant> = Lazy::new(Instant::now);
static SERVER_START_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

const CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Initialize the server start time (call during startup)
pub fn init_server_start() {
    Lazy::force(&SERVER_START);
    Lazy::force(&SERVER_START_TIME);
}

/// Basic health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed health check response
#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub checks: HealthChecks,
}

/// Individual service health checks
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub store: ServiceHealth,
    pub hub: HubHealth,
}

/// Health status for individual services
#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Chat hub health
#[derive(Debug, Serialize)]
pub struct HubHealth {
    pub status: HealthStatus,
    pub active_connections: usize,
    pub active_rooms: usize,
}

/// Overall health status
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Simple liveness response
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Liveness probe - checks if the server is running
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "alive" })
}

/// Readiness probe - checks if the server can accept traffic
/// Returns 200 if ready, 503 if the hub or the store is unavailable
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = SERVER_START.elapsed().as_secs();
    let started_at = SERVER_START_TIME.to_rfc3339();

    let store_health = check_store(&state).await;
    let hub_health = check_hub(&state).await;

    let overall_status = determine_overall_status(&store_health, &hub_health);

    let response = DetailedHealthResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime,
        started_at,
        checks: HealthChecks {
            store: store_health,
            hub: hub_health,
        },
    };

    let status_code = match overall_status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

/// Check message store connectivity and latency
async fn check_store(state: &AppState) -> ServiceHealth {
    let start = Instant::now();
    match timeout(CHECK_TIMEOUT, state.messages.ping()).await {
        Ok(Ok(())) => {
            let latency = start.elapsed().as_millis() as u64;
            ServiceHealth {
                status: if latency < 100 {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                },
                latency_ms: Some(latency),
                message: None,
            }
        }
        Ok(Err(e)) => ServiceHealth {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(format!("Message store unavailable: {}", e)),
        },
        Err(_) => ServiceHealth {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some("Message store check timed out".into()),
        },
    }
}

/// Ask the hub loop for a snapshot; a hub that cannot answer is unhealthy.
async fn check_hub(state: &AppState) -> HubHealth {
    match timeout(CHECK_TIMEOUT, state.hub.snapshot()).await {
        Ok(Ok(snapshot)) => HubHealth {
            status: HealthStatus::Healthy,
            active_connections: snapshot.clients,
            active_rooms: snapshot.rooms.len(),
        },
        _ => HubHealth {
            status: HealthStatus::Unhealthy,
            active_connections: 0,
            active_rooms: 0,
        },
    }
}

/// Determine overall health based on individual checks
fn determine_overall_status(store: &ServiceHealth, hub: &HubHealth) -> HealthStatus {
    if store.status == HealthStatus::Unhealthy || hub.status == HealthStatus::Unhealthy {
        return HealthStatus::Unhealthy;
    }

    if store.status == HealthStatus::Degraded {
        return HealthStatus::Degraded;
    }

    HealthStatus::Healthy
}
