//! Core data model.
//!
//! Workers hold leases, work items carry one pending ledger mutation, claims
//! bind a worker to a work item for a bounded time, and the ledger keeps one
//! running CPU-hour total per user.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a worker process. Generated at startup, never reused across
/// restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Newtype for work claim IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimId(pub Uuid);

impl ClaimId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ClaimId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// A registered worker and its lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub registered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_refreshed_at: DateTime<Utc>,
}

impl Worker {
    /// A worker is alive until its expiration is in the past.
    pub fn is_alive(&self, now: DateTime<Utc>) -> bool {
        self.expires_at >= now
    }
}

// ---------------------------------------------------------------------------
// Usage operation
// ---------------------------------------------------------------------------

/// How a work item's value is applied to a user's running total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOperation {
    /// `total + value`
    Add,
    /// `total - value`
    Subtract,
    /// Replace the total with `value`.
    Reset,
}

impl UsageOperation {
    /// Apply this operation to `total` with exact decimal arithmetic.
    ///
    /// `Decimal` carries 28 significant digits, so sums of realistic CPU-hour
    /// values never round. Overflow is reported instead of wrapping.
    pub fn apply(self, total: Decimal, value: Decimal) -> Result<Decimal> {
        match self {
            UsageOperation::Add => total.checked_add(value).ok_or_else(|| {
                Error::Arithmetic(format!("overflow adding {value} to {total}"))
            }),
            UsageOperation::Subtract => total.checked_sub(value).ok_or_else(|| {
                Error::Arithmetic(format!("overflow subtracting {value} from {total}"))
            }),
            UsageOperation::Reset => Ok(value),
        }
    }

    /// Applying this operation twice gives the same total as applying it once.
    pub fn is_idempotent(self) -> bool {
        matches!(self, UsageOperation::Reset)
    }
}

impl std::fmt::Display for UsageOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UsageOperation::Add => "add",
            UsageOperation::Subtract => "subtract",
            UsageOperation::Reset => "reset",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for UsageOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "add" | "cpu.hours.add" => Ok(UsageOperation::Add),
            "subtract" | "cpu.hours.subtract" => Ok(UsageOperation::Subtract),
            "reset" | "cpu.hours.reset" => Ok(UsageOperation::Reset),
            other => Err(Error::InvalidOperation(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// One pending ledger mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkId,

    /// The user whose total this item changes.
    pub user_id: Uuid,

    pub value: Decimal,

    pub operation: UsageOperation,

    pub created_at: DateTime<Utc>,

    /// Worker holding a live claim on this item, if any.
    pub claimed_by: Option<WorkerId>,

    pub processed: bool,
    pub processed_by: Option<WorkerId>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a work item, derived from its claim and processed flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    Pending,
    Claimed,
    Processed,
}

impl WorkItem {
    pub fn state(&self) -> WorkState {
        if self.processed {
            WorkState::Processed
        } else if self.claimed_by.is_some() {
            WorkState::Claimed
        } else {
            WorkState::Pending
        }
    }
}

impl std::fmt::Display for WorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkState::Pending => "pending",
            WorkState::Claimed => "claimed",
            WorkState::Processed => "processed",
        };
        write!(f, "{s}")
    }
}

/// Builder for new work items. This is what the usage calculator produces.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub(crate) user_id: Uuid,
    pub(crate) operation: UsageOperation,
    pub(crate) value: Decimal,
}

impl NewWorkItem {
    pub fn new(user_id: Uuid, operation: UsageOperation, value: Decimal) -> Self {
        Self {
            user_id,
            operation,
            value,
        }
    }

    pub fn add(user_id: Uuid, value: Decimal) -> Self {
        Self::new(user_id, UsageOperation::Add, value)
    }

    pub fn subtract(user_id: Uuid, value: Decimal) -> Self {
        Self::new(user_id, UsageOperation::Subtract, value)
    }

    pub fn reset(user_id: Uuid, value: Decimal) -> Self {
        Self::new(user_id, UsageOperation::Reset, value)
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn operation(&self) -> UsageOperation {
        self.operation
    }

    pub fn value(&self) -> Decimal {
        self.value
    }
}

// ---------------------------------------------------------------------------
// Claims and seekers
// ---------------------------------------------------------------------------

/// Exclusive, time-bounded ownership of one work item by one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkClaim {
    pub id: ClaimId,
    pub worker_id: WorkerId,
    pub work_item_id: WorkId,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WorkClaim {
    /// A claim expires strictly after its expiration time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Result of an atomic claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(WorkClaim),
    /// Someone else holds a live claim, the item is already processed, or the
    /// claiming worker's lease has lapsed.
    Conflict,
}

/// A worker's in-progress search for claimable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeekingAttempt {
    pub worker_id: WorkerId,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// A user's running CPU-hour total over its effective window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuHours {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total: Decimal,
    pub effective_start: DateTime<Utc>,
    pub effective_end: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl CpuHours {
    /// Zero total for a first-time user, valid for `interval_days` from `now`.
    pub fn new_for_user(user_id: Uuid, now: DateTime<Utc>, interval_days: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            total: Decimal::ZERO,
            effective_start: now,
            effective_end: now + chrono::Duration::days(interval_days),
            last_modified: now,
        }
    }

    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.effective_start <= now && now < self.effective_end
    }
}

/// What a committed ledger update changed. Handed to the quota notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerUpdate {
    pub work_id: WorkId,
    pub user_id: Uuid,
    pub username: String,
    pub operation: UsageOperation,
    pub value: Decimal,
    pub previous_total: Decimal,
    pub new_total: Decimal,
    pub effective_start: DateTime<Utc>,
    pub effective_end: DateTime<Utc>,
    /// Whether the ledger row was created by this update.
    pub created_total: bool,
}

/// A user known to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn operations_parse_from_names_and_event_types() {
        assert_eq!("add".parse::<UsageOperation>().unwrap(), UsageOperation::Add);
        assert_eq!(
            "cpu.hours.subtract".parse::<UsageOperation>().unwrap(),
            UsageOperation::Subtract
        );
        assert_eq!("RESET".parse::<UsageOperation>().unwrap(), UsageOperation::Reset);
        assert!("multiply".parse::<UsageOperation>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for op in [UsageOperation::Add, UsageOperation::Subtract, UsageOperation::Reset] {
            assert_eq!(op.to_string().parse::<UsageOperation>().unwrap(), op);
        }
    }

    #[test]
    fn add_keeps_digits_floats_would_lose() {
        let total = UsageOperation::Add
            .apply(dec!(1000000.1), dec!(0.00000001))
            .unwrap();
        assert_eq!(total, dec!(1000000.10000001));
        assert_eq!(total.to_string(), "1000000.10000001");
    }

    #[test]
    fn subtract_is_exact() {
        let total = UsageOperation::Subtract
            .apply(dec!(1000000.10000001), dec!(0.00000001))
            .unwrap();
        assert_eq!(total, dec!(1000000.1));
    }

    #[test]
    fn reset_ignores_prior_total() {
        assert_eq!(
            UsageOperation::Reset.apply(dec!(987.65), dec!(1.5)).unwrap(),
            dec!(1.5)
        );
        assert!(UsageOperation::Reset.is_idempotent());
        assert!(!UsageOperation::Add.is_idempotent());
    }

    #[test]
    fn overflow_is_an_error() {
        let err = UsageOperation::Add.apply(Decimal::MAX, dec!(1)).unwrap_err();
        assert!(matches!(err, Error::Arithmetic(_)));
    }

    #[test]
    fn new_user_window_spans_interval_days() {
        let now = Utc::now();
        let hours = CpuHours::new_for_user(Uuid::new_v4(), now, 365);
        assert_eq!(hours.total, Decimal::ZERO);
        assert_eq!(hours.effective_end - hours.effective_start, chrono::Duration::days(365));
        assert!(hours.is_current(now));
        assert!(!hours.is_current(hours.effective_end));
    }

    #[test]
    fn work_state_follows_claim_and_processed() {
        let mut item = WorkItem {
            id: WorkId::new(),
            user_id: Uuid::new_v4(),
            value: dec!(1),
            operation: UsageOperation::Add,
            created_at: Utc::now(),
            claimed_by: None,
            processed: false,
            processed_by: None,
            processed_at: None,
        };
        assert_eq!(item.state(), WorkState::Pending);
        item.claimed_by = Some(WorkerId::new());
        assert_eq!(item.state(), WorkState::Claimed);
        item.processed = true;
        assert_eq!(item.state(), WorkState::Processed);
    }
}
