//! Health check endpoint
//!
//! Exempt from admission control. Redis reachability is reported but never
//! fails the probe.

use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use streamgate_core::bootstrap::ping_redis;

use crate::http::AppState;

const REDIS_PING_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<&'static str>,
}

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(health_check))
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let redis = match &state.redis {
        Some(conn) => Some(match ping_redis(conn, REDIS_PING_TIMEOUT).await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "Health check: Redis unavailable");
                "unavailable"
            }
        }),
        None => None,
    };

    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        redis,
    })
}
