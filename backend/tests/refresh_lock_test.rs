use chrono::{Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

use decentrascore_backend::config::RefreshConfig;
use decentrascore_backend::refresh::{LockError, RefreshLockCoordinator};
use decentrascore_backend::store::{MemoryStore, Store};
use decentrascore_backend::types::{LockStatus, RefreshClass};

fn coordinator() -> (Arc<MemoryStore>, Arc<RefreshLockCoordinator>) {
    let store = Arc::new(MemoryStore::new());
    let locks = Arc::new(RefreshLockCoordinator::new(store.clone(), &RefreshConfig::default()));
    (store, locks)
}

#[tokio::test]
async fn test_second_acquire_is_already_in_progress() {
    let (_store, locks) = coordinator();
    let asset = Uuid::new_v4();

    let held = locks.acquire(asset, RefreshClass::Full, "worker-a").await.unwrap();
    assert_eq!(held.status, LockStatus::InProgress);

    match locks.acquire(asset, RefreshClass::Full, "worker-b").await {
        Err(LockError::AlreadyInProgress {
            asset_id,
            refresh_class,
        }) => {
            assert_eq!(asset_id, asset);
            assert_eq!(refresh_class, RefreshClass::Full);
        }
        other => panic!("expected contention, got {:?}", other.map(|l| l.id)),
    }
}

#[tokio::test]
async fn test_stale_lock_is_reclaimed() {
    let (store, locks) = coordinator();
    let asset = Uuid::new_v4();

    let abandoned = locks.acquire(asset, RefreshClass::Volatile, "crashed").await.unwrap();
    assert!(store.backdate_lock(abandoned.id, Utc::now() - Duration::minutes(6)).await);

    let fresh = locks.acquire(asset, RefreshClass::Volatile, "worker-b").await.unwrap();
    assert_ne!(fresh.id, abandoned.id);
    assert_eq!(fresh.owner, "worker-b");

    let old = store.get_lock(abandoned.id).await.unwrap().unwrap();
    assert_eq!(old.status, LockStatus::Failed);
    assert!(old.released_at.is_some());

    // the original holder finishing late must not clobber the reclaimed state
    assert!(!locks.release(&abandoned, LockStatus::Completed).await.unwrap());
    assert_eq!(
        store.get_lock(abandoned.id).await.unwrap().unwrap().status,
        LockStatus::Failed
    );
}

#[tokio::test]
async fn test_lock_younger_than_threshold_is_kept() {
    let (store, locks) = coordinator();
    let asset = Uuid::new_v4();

    let held = locks.acquire(asset, RefreshClass::Full, "worker-a").await.unwrap();
    store.backdate_lock(held.id, Utc::now() - Duration::minutes(4)).await;

    assert!(locks.acquire(asset, RefreshClass::Full, "worker-b").await.is_err());
    let current = locks.current(asset, RefreshClass::Full, Utc::now()).await.unwrap();
    assert_eq!(current.map(|l| l.id), Some(held.id));
}

#[tokio::test]
async fn test_current_ignores_stale_locks() {
    let (store, locks) = coordinator();
    let asset = Uuid::new_v4();

    let held = locks.acquire(asset, RefreshClass::SemiVolatile, "worker-a").await.unwrap();
    store.backdate_lock(held.id, Utc::now() - Duration::minutes(30)).await;

    assert!(locks.current(asset, RefreshClass::SemiVolatile, Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_acquires_admit_exactly_one() {
    let (store, locks) = coordinator();
    let asset = Uuid::new_v4();

    let attempts = (0..16).map(|i| {
        let locks = Arc::clone(&locks);
        tokio::spawn(async move { locks.acquire(asset, RefreshClass::Full, &format!("worker-{}", i)).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let contended = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_contention()))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(contended, 15);
    assert_eq!(store.active_locks().await.unwrap().len(), 1);
}
