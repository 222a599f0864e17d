//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"cpu-usage-ledger"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for cpu-usage-ledger instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("cpu-usage-ledger")
}

/// Counter: claim attempts.
/// Labels: `result` ("claimed" | "conflict").
pub fn claim_attempts() -> Counter<u64> {
    meter()
        .u64_counter("cpu_usage.claims.attempts")
        .with_description("Number of atomic claim attempts")
        .build()
}

/// Counter: seeking cycles that ended without a claim.
/// Labels: `reason` ("empty" | "timeout" | "lease_lapsed").
pub fn seeking_abandoned() -> Counter<u64> {
    meter()
        .u64_counter("cpu_usage.seeking.abandoned")
        .with_description("Seeking cycles that found no claimable work")
        .build()
}

/// Counter: ledger updates.
/// Labels: `operation`, `result` ("ok" | "error").
pub fn ledger_updates() -> Counter<u64> {
    meter()
        .u64_counter("cpu_usage.ledger.updates")
        .with_description("Number of ledger update transactions")
        .build()
}

/// Counter: rows removed by housekeeping.
/// Labels: `sweep` ("workers" | "seekers" | "claims").
pub fn purged() -> Counter<u64> {
    meter()
        .u64_counter("cpu_usage.housekeeping.purged")
        .with_description("Rows removed by housekeeping sweeps")
        .build()
}

/// Counter: worker lease refreshes.
/// Labels: `result` ("ok" | "reregistered" | "error").
pub fn lease_refreshes() -> Counter<u64> {
    meter()
        .u64_counter("cpu_usage.worker.refreshes")
        .with_description("Worker lease refresh attempts")
        .build()
}

/// Counter: quota notifications after commit.
/// Labels: `result` ("ok" | "error").
pub fn notifications() -> Counter<u64> {
    meter()
        .u64_counter("cpu_usage.quota.notifications")
        .with_description("Post-commit quota notifications")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("cpu_usage.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
