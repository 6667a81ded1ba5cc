//! Receipt submission and listing

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rqs_common::db::SortMode;
use rqs_common::events::ReceiptEvent;
use rqs_common::receipts::ReceiptRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::sse::receipt_event_stream;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /api/receipt response
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: i64,
}

/// POST /api/receipt
///
/// Body is the raw QR text. The reference is stored, the scheduler is woken
/// and listeners get a `ReceiptAdded` event.
pub async fn submit_receipt(State(state): State<AppState>, text: String) -> ApiResult<Json<SubmitResponse>> {
    debug!(text = %text, "receipt ref text");

    let reference = ReceiptRef::detect(state.domains.codes(), &text).map_err(|e| {
        warn!(error = %e, "ref text parse");
        ApiError::invalid_ref(e, &text)
    })?;

    let id = state.store.insert(&reference).await?;
    info!(id, domain = %reference.domain(), "receipt reference stored");

    state.scheduler.trigger();
    match state.store.load_by_id(id).await? {
        Some(record) => state.event_bus.emit_lossy(ReceiptEvent::added(record)),
        None => warn!(id, "stored receipt not found"),
    }

    Ok(Json(SubmitResponse { id }))
}

/// GET /api/receipts_list query
///
/// Kept as raw strings so that malformed values produce the API's own error
/// codes instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub sort_mode: Option<String>,
    pub before_id: Option<String>,
    pub before_time: Option<String>,
    pub search: Option<String>,
    pub sse: Option<String>,
}

impl ListQuery {
    pub fn sort(&self) -> ApiResult<SortMode> {
        match self.sort_mode.as_deref().unwrap_or("") {
            "" | "id" => {
                let before_id = match non_empty(&self.before_id) {
                    Some(raw) => raw
                        .parse::<i64>()
                        .map_err(|_| ApiError::WrongNumberFormat(raw.to_string()))?,
                    None => 0,
                };
                Ok(SortMode::ById {
                    before_id: (before_id > 0).then_some(before_id),
                })
            }
            "created_at" => {
                let before = match non_empty(&self.before_time) {
                    Some(raw) => Some(
                        DateTime::parse_from_rfc3339(raw)
                            .map_err(|_| ApiError::WrongTimeFormat(raw.to_string()))?
                            .with_timezone(&Utc),
                    ),
                    None => None,
                };
                Ok(SortMode::ByCreatedAt { before })
            }
            other => Err(ApiError::WrongSortMode(other.to_string())),
        }
    }

    pub fn search(&self) -> &str {
        self.search.as_deref().unwrap_or("")
    }

    /// Any value except empty and `0` switches to SSE
    pub fn wants_sse(&self) -> bool {
        !matches!(self.sse.as_deref(), None | Some("") | Some("0"))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// GET /api/receipts_list
///
/// One page (newest first) as a JSON array, or a live SSE stream starting
/// with that page.
pub async fn list_receipts(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult<Response> {
    let sort = query.sort()?;

    if !query.wants_sse() {
        let receipts = state.store.search_and_list(sort, query.search()).await?;
        return Ok(Json(receipts).into_response());
    }

    let rx = state.event_bus.subscribe();
    let receipts = state.store.search_and_list(sort, query.search()).await?;
    let mut response = receipt_event_stream(receipts, rx).into_response();
    response
        .headers_mut()
        .insert("X-Accel-Buffering", axum::http::HeaderValue::from_static("no"));
    Ok(response)
}

pub fn receipt_routes() -> Router<AppState> {
    Router::new()
        .route("/api/receipt", post(submit_receipt))
        .route("/api/receipts_list", get(list_receipts))
}
