//! rqs-scanner library interface
//!
//! Fetch clients, the retrieval scheduler and the HTTP API. The binary wires
//! them together; integration tests drive them directly.

pub mod api;
pub mod clients;
pub mod domains;
pub mod error;
pub mod scheduler;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use rqs_common::db::ReceiptStore;
use rqs_common::events::EventBus;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::domains::DomainRegistry;
use crate::scheduler::SchedulerHandle;

/// Per-listener ring size of the receipt event bus
pub const EVENT_BUS_CAPACITY: usize = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: ReceiptStore,
    /// Receipt events for live listings
    pub event_bus: EventBus,
    /// Wakes the scheduler after a submission
    pub scheduler: SchedulerHandle,
    /// Enabled jurisdictions, in detection order
    pub domains: DomainRegistry,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        store: ReceiptStore,
        event_bus: EventBus,
        scheduler: SchedulerHandle,
        domains: DomainRegistry,
    ) -> Self {
        Self {
            store,
            event_bus,
            scheduler,
            domains,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// Responses are gzip-compressed when the client accepts it; SSE streams are
/// left uncompressed.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::receipt_routes())
        .merge(api::domain_routes())
        .merge(api::health_routes())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
