//! # cpu-usage-ledger
//!
//! Per-user CPU-hours ledger kept by a fleet of cooperating workers.
//!
//! Workers register under expiring leases, claim queued usage work items
//! through an atomic store operation, and apply each item to the user's
//! decimal total in a single transaction. Expired leases, claims and seeking
//! attempts are swept periodically by every worker.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod worker;
