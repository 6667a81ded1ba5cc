//! Receipt change notifications
//!
//! The scheduler and the submission path publish full [`ReceiptRecord`]
//! snapshots on an [`EventBus`]; live listeners (SSE streams) subscribe to it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::models::ReceiptRecord;

/// Receipt lifecycle events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ReceiptEvent {
    /// A new reference was accepted and stored
    ReceiptAdded {
        receipt: ReceiptRecord,
        timestamp: DateTime<Utc>,
    },

    /// Retrieval state of a stored receipt changed
    ///
    /// Emitted for the correctness flag, for fetched data and for failed attempts.
    ReceiptUpdated {
        receipt: ReceiptRecord,
        timestamp: DateTime<Utc>,
    },
}

impl ReceiptEvent {
    pub fn added(receipt: ReceiptRecord) -> Self {
        ReceiptEvent::ReceiptAdded {
            receipt,
            timestamp: Utc::now(),
        }
    }

    pub fn updated(receipt: ReceiptRecord) -> Self {
        ReceiptEvent::ReceiptUpdated {
            receipt,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ReceiptEvent::ReceiptAdded { .. } => "ReceiptAdded",
            ReceiptEvent::ReceiptUpdated { .. } => "ReceiptUpdated",
        }
    }

    /// Snapshot carried by the event
    pub fn receipt(&self) -> &ReceiptRecord {
        match self {
            ReceiptEvent::ReceiptAdded { receipt, .. } | ReceiptEvent::ReceiptUpdated { receipt, .. } => {
                receipt
            }
        }
    }
}

/// Fan-out of receipt events to any number of listeners
///
/// Every subscriber owns a bounded ring of `capacity` events. A subscriber that
/// falls behind loses the oldest events (`RecvError::Lagged`) and never blocks
/// the publisher or other subscribers. Dropping the receiver unsubscribes.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReceiptEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ReceiptEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: ReceiptEvent) -> Result<usize, broadcast::error::SendError<ReceiptEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ReceiptEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(event_type = e.0.event_type(), "no receipt event listeners");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn record(id: i64) -> ReceiptRecord {
        ReceiptRecord {
            id,
            domain: "ru-fns".to_string(),
            saved_at: Utc::now(),
            updated_at: Utc::now(),
            created_at: Utc::now(),
            unique_key: format!("ru-fns:i={}", id),
            ref_text: format!("i={}", id),
            is_correct: false,
            data: None,
            search_key: String::new(),
            retries_left: 10,
            next_retry_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_eventbus_delivers_to_every_subscriber() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.emit(ReceiptEvent::updated(record(7))).unwrap(), 2);

        assert_eq!(rx1.recv().await.unwrap().receipt().id, 7);
        assert_eq!(rx2.recv().await.unwrap().receipt().id, 7);
    }

    #[tokio::test]
    async fn test_eventbus_emit_without_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(ReceiptEvent::added(record(1))).is_err());
        bus.emit_lossy(ReceiptEvent::added(record(1)));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_eventbus_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();

        for id in 1..=5 {
            bus.emit_lossy(ReceiptEvent::updated(record(id)));
        }

        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(slow.recv().await.unwrap().receipt().id, 4);
        assert_eq!(slow.recv().await.unwrap().receipt().id, 5);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(ReceiptEvent::added(record(3))).unwrap();
        assert_eq!(json["type"], "ReceiptAdded");
        assert_eq!(json["receipt"]["id"], 3);
        assert_eq!(json["receipt"]["refText"], "i=3");
    }
}
