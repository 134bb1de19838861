//! Stream Audit Library
//!
//! Checks a real-time DEX trade subscription for gaps by diffing it against
//! the batch query for the same block-time window.

pub mod audit;
pub mod config;
pub mod error;
pub mod models;
pub mod scrapers;

pub use audit::{reconcile_logs, run_audit, AuditOptions, StopSignal};
pub use error::AuditError;
pub use models::{TradeKey, TradeRecord, TradeSet, Window};
