//! Span helpers for a work item moving through claim and ledger update.

use tracing::Span;
use uuid::Uuid;

use crate::model::{WorkId, WorkState, WorkerId};

/// Start a span covering one claimed work item, from claim to commit.
///
/// `ledger.total` is declared empty and filled by [`record_new_total`].
pub fn start_claim_span(worker_id: WorkerId, work_id: WorkId, user_id: &Uuid) -> Span {
    tracing::info_span!(
        "work.process",
        "worker.id" = %worker_id,
        "work.id" = %work_id.0,
        "user.id" = %user_id,
        "ledger.total" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: WorkState, to: WorkState) {
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
}

/// Record the committed total on a span from [`start_claim_span`].
pub fn record_new_total(span: &Span, total: &rust_decimal::Decimal) {
    span.record("ledger.total", tracing::field::display(total));
}
