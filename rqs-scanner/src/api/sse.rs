//! Server-Sent Events for the live receipt list
//!
//! A listing opened with `sse=1` first sends the requested page as one
//! `initial_receipts` event, then one `receipt` event per stored or updated
//! receipt until the client disconnects.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use rqs_common::db::ReceiptRecord;
use rqs_common::events::ReceiptEvent;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

pub const INITIAL_RECEIPTS_EVENT: &str = "initial_receipts";
pub const RECEIPT_EVENT: &str = "receipt";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

fn json_event<T: Serialize + ?Sized>(name: &'static str, value: &T) -> Option<Event> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Event::default().event(name).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize {} event: {}", name, e);
            None
        }
    }
}

/// Live listing stream
///
/// `rx` must be subscribed before `initial` was loaded so that no update
/// between the two is lost.
pub fn receipt_event_stream(
    initial: Vec<ReceiptRecord>,
    mut rx: broadcast::Receiver<ReceiptEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(initial = initial.len(), "SSE: receipt list client connected");

    let stream = async_stream::stream! {
        if let Some(event) = json_event(INITIAL_RECEIPTS_EVENT, &initial) {
            yield Ok(event);
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    debug!(
                        event_type = event.event_type(),
                        id = event.receipt().id,
                        "SSE: Broadcasting receipt"
                    );
                    if let Some(sse_event) = json_event(RECEIPT_EVENT, event.receipt()) {
                        yield Ok(sse_event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE: client is too slow, receipt updates dropped");
                }
                Err(RecvError::Closed) => {
                    debug!("SSE: event bus closed");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
}
