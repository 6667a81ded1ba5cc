//! # Receipt QR Scanner common library
//!
//! Shared code for the scanner service:
//! - Receipt reference model and search keys
//! - Receipt store (SQLite) with schema init and migrations
//! - Receipt events and the EventBus
//! - Configuration loading

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod receipts;

pub use error::{Error, Result};
