//! Jurisdiction metadata for clients

use axum::{extract::State, routing::get, Json, Router};

use crate::domains::DomainMetadata;
use crate::AppState;

/// GET /api/domains_metadata
///
/// Enabled jurisdictions in detection order.
pub async fn domains_metadata(State(state): State<AppState>) -> Json<Vec<DomainMetadata>> {
    Json(state.domains.metadata())
}

pub fn domain_routes() -> Router<AppState> {
    Router::new().route("/api/domains_metadata", get(domains_metadata))
}
