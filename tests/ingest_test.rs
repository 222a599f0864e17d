//! Integration tests for job-state ingestion.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use cpu_usage_ledger::clock::{Clock, ManualClock};
use cpu_usage_ledger::error::Result;
use cpu_usage_ledger::ingest::{JobState, UsageCalculator, UsageIngest};
use cpu_usage_ledger::model::*;
use cpu_usage_ledger::storage::MemoryStore;
use cpu_usage_ledger::store::Store;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Bills 1.5 hours to one user for every analysis except "idle".
struct FixedCalculator {
    user_id: Uuid,
    calls: AtomicUsize,
}

#[async_trait]
impl UsageCalculator for FixedCalculator {
    async fn compute_usage_for_analysis(&self, external_id: &str) -> Result<Option<NewWorkItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if external_id == "idle" {
            return Ok(None);
        }
        Ok(Some(NewWorkItem::add(self.user_id, dec!(1.5))))
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    calculator: Arc<FixedCalculator>,
    ingest: UsageIngest,
    clock: ManualClock,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.add_user(user_id, "analyst").unwrap();
    let calculator = Arc::new(FixedCalculator {
        user_id,
        calls: AtomicUsize::new(0),
    });
    let clock = ManualClock::new(Utc::now());
    let ingest = UsageIngest::new(store.clone(), calculator.clone(), Arc::new(clock.clone()));
    Fixture {
        store,
        calculator,
        ingest,
        clock,
    }
}

#[tokio::test]
async fn non_terminal_states_are_ignored() {
    let f = fixture();
    for state in [
        JobState::Submitted,
        JobState::Queued,
        JobState::Running,
        JobState::Impending,
        JobState::Canceled,
    ] {
        assert!(f.ingest.on_job_state("job-1", state).await.unwrap().is_none());
    }
    assert_eq!(f.calculator.calls.load(Ordering::SeqCst), 0);
    assert!(f.store.next_unclaimed_item(f.clock.now()).await.unwrap().is_none());
}

#[tokio::test]
async fn succeeded_and_failed_jobs_enqueue_usage() {
    let f = fixture();

    let done = f.ingest.on_job_state("job-1", JobState::Succeeded).await.unwrap().unwrap();
    let failed = f.ingest.on_job_state("job-2", JobState::Failed).await.unwrap().unwrap();

    assert_eq!(done.operation, UsageOperation::Add);
    assert_eq!(done.value, dec!(1.5));
    assert_eq!(done.created_at, f.clock.now());
    assert_eq!(done.state(), WorkState::Pending);
    assert_ne!(done.id, failed.id);
    let next = f.store.next_unclaimed_item(f.clock.now()).await.unwrap().unwrap();
    assert_eq!(next.id, done.id);
}

#[tokio::test]
async fn analyses_without_usage_enqueue_nothing() {
    let f = fixture();
    assert!(f.ingest.on_job_state("idle", JobState::Succeeded).await.unwrap().is_none());
    assert_eq!(f.calculator.calls.load(Ordering::SeqCst), 1);
    assert!(f.store.next_unclaimed_item(f.clock.now()).await.unwrap().is_none());
}

#[test]
fn job_states_parse_from_platform_names() {
    assert_eq!("Completed".parse::<JobState>().unwrap(), JobState::Succeeded);
    assert_eq!("failed".parse::<JobState>().unwrap(), JobState::Failed);
    assert_eq!("Canceled".parse::<JobState>().unwrap(), JobState::Canceled);
    assert!("exploded".parse::<JobState>().is_err());
    assert!(JobState::Failed.triggers_usage());
    assert!(!JobState::Canceled.triggers_usage());
}
