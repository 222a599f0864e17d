//! Integration tests for the housekeeping sweeps.

use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use cpu_usage_ledger::clock::{Clock, ManualClock};
use cpu_usage_ledger::config::WorkerConfig;
use cpu_usage_ledger::model::*;
use cpu_usage_ledger::storage::MemoryStore;
use cpu_usage_ledger::store::Store;
use cpu_usage_ledger::worker::{Sweep, run_sweep};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2025, 9, 15, 0, 0, 0).unwrap())
}

async fn register(store: &MemoryStore, clock: &ManualClock, lifetime: Duration) -> WorkerId {
    let now = clock.now();
    let id = WorkerId::new();
    store
        .register_worker(&Worker {
            id,
            name: id.to_string(),
            registered_at: now,
            expires_at: now + lifetime,
            last_refreshed_at: now,
        })
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn worker_sweep_removes_only_lapsed_workers() {
    let store = MemoryStore::new();
    let clock = clock();
    let short = register(&store, &clock, Duration::minutes(10)).await;
    let long = register(&store, &clock, Duration::hours(1)).await;

    clock.advance(Duration::minutes(10));
    assert_eq!(run_sweep(&store, Sweep::Workers, clock.now()).await.unwrap(), 0);

    clock.advance(Duration::seconds(1));
    let removed = run_sweep(&store, Sweep::Workers, clock.now()).await.unwrap();

    assert_eq!(removed, 1);
    let ids: Vec<WorkerId> = store.list_workers().await.unwrap().iter().map(|w| w.id).collect();
    assert_eq!(ids, vec![long]);
    assert!(!ids.contains(&short));
}

#[tokio::test]
async fn worker_sweep_drops_seeking_records_of_removed_workers() {
    let store = MemoryStore::new();
    let clock = clock();
    let worker = register(&store, &clock, Duration::minutes(10)).await;
    let now = clock.now();
    assert!(store.start_seeking(worker, now, now + Duration::hours(1)).await.unwrap());

    clock.advance(Duration::minutes(11));
    run_sweep(&store, Sweep::Workers, clock.now()).await.unwrap();

    assert!(store.list_seekers().await.unwrap().is_empty());
}

#[tokio::test]
async fn seeker_sweep_removes_stuck_attempts() {
    let store = MemoryStore::new();
    let clock = clock();
    let stuck = register(&store, &clock, Duration::hours(1)).await;
    let now = clock.now();
    store.start_seeking(stuck, now, now + Duration::minutes(2)).await.unwrap();

    clock.advance(Duration::minutes(1));
    assert_eq!(run_sweep(&store, Sweep::Seekers, clock.now()).await.unwrap(), 0);

    clock.advance(Duration::minutes(1));
    assert_eq!(run_sweep(&store, Sweep::Seekers, clock.now()).await.unwrap(), 0);

    clock.advance(Duration::seconds(1));
    assert_eq!(run_sweep(&store, Sweep::Seekers, clock.now()).await.unwrap(), 1);
    assert!(store.list_seekers().await.unwrap().is_empty());
}

#[tokio::test]
async fn claim_sweep_makes_abandoned_items_visible_again() {
    let store = MemoryStore::new();
    let clock = clock();
    let user_id = Uuid::new_v4();
    store.add_user(user_id, "abandoner").unwrap();
    let worker = register(&store, &clock, Duration::hours(1)).await;

    let now = clock.now();
    let item = store
        .enqueue_work_item(NewWorkItem::add(user_id, dec!(0.75)), now)
        .await
        .unwrap();
    store
        .claim_work_item(worker, item.id, now, now + Duration::minutes(2))
        .await
        .unwrap();
    assert!(store.next_unclaimed_item(now).await.unwrap().is_none());

    clock.advance(Duration::minutes(2));
    assert_eq!(run_sweep(&store, Sweep::Claims, clock.now()).await.unwrap(), 0);

    clock.advance(Duration::minutes(1));
    let removed = run_sweep(&store, Sweep::Claims, clock.now()).await.unwrap();

    assert_eq!(removed, 1);
    assert!(store.get_claim(item.id).await.unwrap().is_none());
    let next = store.next_unclaimed_item(clock.now()).await.unwrap().unwrap();
    assert_eq!(next.id, item.id);
    assert_eq!(next.state(), WorkState::Pending);
}

#[tokio::test]
async fn sweeps_are_idempotent() {
    let store = MemoryStore::new();
    let clock = clock();
    register(&store, &clock, Duration::minutes(1)).await;
    clock.advance(Duration::minutes(2));

    for sweep in Sweep::ALL {
        run_sweep(&store, sweep, clock.now()).await.unwrap();
        assert_eq!(run_sweep(&store, sweep, clock.now()).await.unwrap(), 0);
    }
}

#[test]
fn sweep_intervals_follow_config() {
    let config = WorkerConfig::default();
    assert_eq!(Sweep::Workers.interval(&config), StdDuration::from_secs(6 * 60));
    assert_eq!(Sweep::Seekers.interval(&config), StdDuration::from_secs(5 * 60));
    assert_eq!(Sweep::Claims.interval(&config), StdDuration::from_secs(6 * 60));
    assert_eq!(Sweep::Claims.name(), "claims");
}
