//! Database models

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::receipts::ReceiptRef;

/// One stored receipt, as exposed to listeners and the HTTP layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRecord {
    pub id: i64,
    pub domain: String,
    pub saved_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Receipt creation time claimed by the reference
    pub created_at: DateTime<Utc>,
    pub unique_key: String,
    pub ref_text: String,
    pub is_correct: bool,
    /// Fetched payload, serialized as text
    #[serde(serialize_with = "serialize_payload")]
    pub data: Option<Vec<u8>>,
    pub search_key: String,
    pub retries_left: i64,
    pub next_retry_at: DateTime<Utc>,
}

impl ReceiptRecord {
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

/// Due record handed to the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReceipt {
    pub id: i64,
    pub reference: ReceiptRef,
    pub is_correct: bool,
}

/// Listing order and cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Newest id first, optionally only ids below `before_id`
    ById { before_id: Option<i64> },
    /// Latest receipt creation time first, optionally only before `before`
    ByCreatedAt { before: Option<DateTime<Utc>> },
}

impl Default for SortMode {
    fn default() -> Self {
        SortMode::ById { before_id: None }
    }
}

fn serialize_payload<S: Serializer>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match data {
        Some(bytes) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}
