//! Integration tests for quota capacity pools.

use std::sync::Arc;
use std::time::Duration;

use prometheus_conduit::core::{CapacityPool, QuotaCapacityPool, ResourceBudget};
use prometheus_conduit::runtime::TokioSpawner;

fn requests(n: i64) -> ResourceBudget {
    ResourceBudget::new().with("requests", n)
}

#[test]
fn test_availability_non_increasing_without_refill() {
    // Property from the spec: availability only moves down, except
    // immediately after reset() or increment().
    let pool = QuotaCapacityPool::new("rpm", requests(10));
    let mut last = pool.available().amount("requests");

    for i in 0..10 {
        pool.try_acquire(&requests(1)).unwrap();
        // Releases interleaved with acquisitions must have zero effect.
        if i % 2 == 0 {
            pool.release(&requests(1));
        }
        let now = pool.available().amount("requests");
        assert!(now <= last, "availability increased without reset/increment");
        last = now;
    }
    assert!(!pool.can_acquire(&requests(1)));

    pool.reset();
    assert_eq!(pool.available().amount("requests"), 10);
}

#[test]
fn test_increment_is_token_bucket_refill() {
    let pool = QuotaCapacityPool::new("rpm", requests(20));
    pool.try_acquire(&requests(20)).unwrap();

    for _ in 0..3 {
        pool.increment(&requests(4), &requests(8));
    }
    // Three increments of 4, capped at 8.
    assert_eq!(pool.available().amount("requests"), 8);
}

#[tokio::test]
async fn test_periodic_reset_timer_lifecycle() {
    let pool = Arc::new(QuotaCapacityPool::new("rpm", requests(2)));
    let spawner = TokioSpawner::current();

    pool.try_acquire(&requests(2)).unwrap();
    assert!(!pool.can_acquire(&requests(1)));

    Arc::clone(&pool).start_reset_timer(Duration::from_millis(40), &spawner);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pool.can_acquire(&requests(2)), "timer refilled the quota");

    // After stopping, consumption is never restored.
    pool.stop_reset_timer();
    pool.try_acquire(&requests(2)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pool.can_acquire(&requests(1)));
}

#[tokio::test]
async fn test_reset_wakes_parked_waiter() {
    let pool = Arc::new(QuotaCapacityPool::new("rpm", requests(1)));
    pool.try_acquire(&requests(1)).unwrap();

    let waiter_pool = Arc::clone(&pool);
    let waiter = tokio::spawn(async move {
        loop {
            let signal = waiter_pool.signal();
            let wait = signal.wait();
            if waiter_pool.try_acquire(&requests(1)).is_ok() {
                return;
            }
            wait.await;
        }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    pool.reset();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter woke after reset")
        .unwrap();
}

#[test]
fn test_set_limits_gates_future_acquisitions_only() {
    let pool = QuotaCapacityPool::new("rpm", requests(10));
    pool.try_acquire(&requests(4)).unwrap();

    pool.set_limits(requests(5));
    // 4 consumed against a ceiling of 5: one left.
    assert_eq!(pool.available().amount("requests"), 1);
    assert!(pool.can_acquire(&requests(1)));
    assert!(!pool.can_acquire(&requests(2)));
}
