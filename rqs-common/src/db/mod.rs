//! Database models and queries

pub mod init;
pub mod migrations;
pub mod models;
pub mod receipts;

pub use init::{create_schema, init_database, init_memory_database};
pub use models::{PendingReceipt, ReceiptRecord, SortMode};
pub use receipts::ReceiptStore;
