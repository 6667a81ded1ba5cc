//! HTTP API handlers for rqs-scanner
//!
//! JSON REST for submission and listing, SSE for live listing updates.

pub mod domains;
pub mod health;
pub mod receipts;
pub mod sse;

pub use domains::domain_routes;
pub use health::health_routes;
pub use receipts::receipt_routes;
