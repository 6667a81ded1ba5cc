//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Compile-time build information stamped by `build.rs`
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub git_hash: &'static str,
    pub timestamp: &'static str,
    pub profile: &'static str,
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
    git_hash: env!("RQS_GIT_HASH"),
    timestamp: env!("RQS_BUILD_TIMESTAMP"),
    profile: env!("RQS_BUILD_PROFILE"),
};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("rqs-scanner")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub build: BuildInfo,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Open live listings
    pub event_listeners: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "rqs-scanner".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: BUILD_INFO,
        uptime_seconds,
        event_listeners: state.event_bus.subscriber_count(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
