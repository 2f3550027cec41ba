//! Connection pool behaviour under contention and shutdown.
//!
//! Run with: `cargo test -p cafe-integration-tests --test pool`

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cafe_integration_tests::TestContext;
use cafe_storefront::db::memory::MemoryDatabase;
use cafe_storefront::db::{ConnectionPool, PoolOptions, RepositoryError};

/// Yield until `count` acquirers are parked on the pool.
async fn wait_for_waiters(pool: &ConnectionPool<MemoryDatabase>, count: usize) {
    while pool.status().waiting < count {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Exhaustion
// =============================================================================

#[tokio::test]
async fn test_waiter_receives_released_connection() {
    let ctx = TestContext::new(2).await.unwrap();
    let first = ctx.pool.acquire().await.unwrap();
    let second = ctx.pool.acquire().await.unwrap();
    let released = first.id();

    let pool = ctx.pool.clone();
    let waiter = tokio::spawn(async move { pool.acquire().await.map(|lease| lease.id()) });
    wait_for_waiters(&ctx.pool, 1).await;
    assert!(!waiter.is_finished());

    drop(first);
    assert_eq!(waiter.await.unwrap().unwrap(), released);

    drop(second);
    assert!(ctx.all_idle());
}

#[tokio::test]
async fn test_waiters_are_served_in_arrival_order() {
    let ctx = TestContext::new(1).await.unwrap();
    let held = ctx.pool.acquire().await.unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    for arrival in 0..3 {
        let pool = ctx.pool.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let lease = pool.acquire().await.unwrap();
            tx.send(arrival).unwrap();
            drop(lease);
        });
        wait_for_waiters(&ctx.pool, arrival + 1).await;
    }
    drop(tx);
    drop(held);

    let mut served = Vec::new();
    while let Some(arrival) = rx.recv().await {
        served.push(arrival);
    }
    assert_eq!(served, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_bounded_acquire_times_out() {
    let db = MemoryDatabase::new();
    let pool = PoolOptions::new()
        .capacity(1)
        .acquire_timeout(Some(Duration::from_millis(20)))
        .connect(db)
        .await
        .unwrap();
    let held = pool.acquire().await.unwrap();

    let result = pool.acquire().await;
    assert!(matches!(result, Err(RepositoryError::AcquireTimeout(_))));
    assert_eq!(pool.status().waiting, 0);

    drop(held);
    assert!(pool.acquire().await.is_ok());
}

// =============================================================================
// Exclusivity
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_connection_is_leased_twice_under_load() {
    let ctx = TestContext::new(4).await.unwrap();
    let in_use = Arc::new(Mutex::new(HashSet::new()));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let pool = ctx.pool.clone();
            let in_use = Arc::clone(&in_use);
            tokio::spawn(async move {
                for _ in 0..10 {
                    let lease = pool.acquire().await.unwrap();
                    assert!(in_use.lock().insert(lease.id()), "{} leased twice", lease.id());
                    assert!(pool.status().is_consistent());
                    tokio::task::yield_now().await;
                    assert!(in_use.lock().remove(&lease.id()));
                    drop(lease);
                }
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    let status = ctx.pool.status();
    assert!(status.is_consistent());
    assert_eq!(status.idle.len(), 4);
    assert!(status.leased.is_empty());
    assert_eq!(status.waiting, 0);
    assert_eq!(ctx.db.stats().connections_opened, 4);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_close_invalidates_leases_and_waiters() {
    let ctx = TestContext::new(1).await.unwrap();
    let mut held = ctx.pool.acquire().await.unwrap();

    let pool = ctx.pool.clone();
    let waiter = tokio::spawn(async move { pool.acquire().await.map(|lease| lease.id()) });
    wait_for_waiters(&ctx.pool, 1).await;

    ctx.pool.close().await;

    assert!(matches!(
        waiter.await.unwrap(),
        Err(RepositoryError::ConnectionUnavailable { .. })
    ));
    assert!(!held.is_valid());
    assert!(matches!(held.connection(), Err(RepositoryError::LeaseInvalidated)));
    assert!(matches!(
        ctx.pool.acquire().await,
        Err(RepositoryError::ConnectionUnavailable { .. })
    ));

    drop(held);
    let status = ctx.pool.status();
    assert!(status.closed);
    assert!(status.idle.is_empty());
    assert!(status.leased.is_empty());
}

#[tokio::test]
async fn test_repository_calls_fail_after_close() {
    let ctx = TestContext::new(2).await.unwrap();
    let user = ctx.customer("ana", 10, 0);
    ctx.pool.close().await;

    let result = ctx.users().find_account(user.id).await;
    assert!(result.unwrap_err().is_unavailable());
}
