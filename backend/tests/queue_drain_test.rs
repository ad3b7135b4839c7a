mod common;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use common::{addr, harness, healthy_providers, Harness, ScriptedChain, CHAIN};
use decentrascore_backend::config::RefreshConfig;
use decentrascore_backend::refresh::{DrainReport, RefreshWorker};
use decentrascore_backend::service::{BenchmarkService, ServiceError};
use decentrascore_backend::store::Store;
use decentrascore_backend::types::{AssetStatus, JobStatus, RefreshClass};

fn service(h: &Harness) -> BenchmarkService {
    BenchmarkService::new(h.store.clone(), h.chain.clone(), h.locks.clone(), RefreshConfig::default())
}

fn worker(h: &Harness) -> RefreshWorker {
    RefreshWorker::new(h.store.clone(), h.orchestrator.clone(), RefreshConfig::default(), "drain-test")
}

fn hex(byte: u8) -> String {
    format!("{:#x}", addr(byte))
}

#[tokio::test]
async fn test_duplicate_queued_refresh_is_rejected() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let service = service(&h);

    let ticket = service
        .request_refresh(CHAIN, &hex(0x42), RefreshClass::Full, None)
        .await
        .unwrap();
    assert_eq!(ticket.status, JobStatus::Queued);

    let err = service
        .request_refresh("Ethereum", &hex(0x42), RefreshClass::Full, Some(10))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyInProgress { refresh_class: RefreshClass::Full, .. }));

    // another class for the same asset is independent
    service
        .request_refresh(CHAIN, &hex(0x42), RefreshClass::Volatile, None)
        .await
        .unwrap();

    let status = service.queue_status(None).await.unwrap();
    assert_eq!(status.queue_depth, 2);
}

#[tokio::test]
async fn test_refresh_rejected_while_lock_is_live() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let service = service(&h);
    let asset = h.store.ensure_asset(CHAIN, addr(0x42), Utc::now()).await.unwrap();
    h.locks.acquire(asset.id, RefreshClass::Volatile, "busy").await.unwrap();

    let err = service
        .request_refresh(CHAIN, &hex(0x42), RefreshClass::Volatile, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyInProgress { asset_id, .. } if asset_id == asset.id));

    let status = service.queue_status(Some(asset.id)).await.unwrap();
    assert_eq!(status.queue_depth, 0);
    assert_eq!(status.active_locks.len(), 1);
    assert!(!status.active_locks[0].stale);
}

#[tokio::test]
async fn test_drain_runs_jobs_and_scores_assets() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let service = service(&h);

    let ticket = service
        .request_refresh(CHAIN, &hex(0x42), RefreshClass::Full, None)
        .await
        .unwrap();

    let report = worker(&h).drain_once().await.unwrap();
    assert_eq!(
        report,
        DrainReport {
            dequeued: 1,
            succeeded: 1,
            failed: 0
        }
    );

    let job = service.job(ticket.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.error.is_none());

    let card = service.scorecard(CHAIN, &hex(0x42)).await.unwrap();
    assert!(card.score.is_some());
    assert!(card.evidence.holders.is_some());

    // a drained queue leaves nothing for the next tick
    assert_eq!(worker(&h).drain_once().await.unwrap().dequeued, 0);
}

#[tokio::test]
async fn test_drain_takes_highest_priority_batch() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let service = service(&h);

    let priorities = [1, 9, 3, 7, 0, 5, 8];
    for (i, priority) in priorities.iter().enumerate() {
        service
            .request_refresh(CHAIN, &hex(0x50 + i as u8), RefreshClass::Volatile, Some(*priority))
            .await
            .unwrap();
    }

    let report = worker(&h).drain_once().await.unwrap();
    assert_eq!(report.dequeued, RefreshConfig::default().drain_batch_size);

    let mut left: Vec<i32> = service
        .queue_status(None)
        .await
        .unwrap()
        .queued
        .iter()
        .map(|job| job.priority)
        .collect();
    left.sort();
    assert_eq!(left, vec![0, 1]);
}

#[tokio::test]
async fn test_contended_job_ends_in_error() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let service = service(&h);

    let ticket = service
        .request_refresh(CHAIN, &hex(0x42), RefreshClass::Full, None)
        .await
        .unwrap();
    // a manual refresh grabbed the lock after the job was queued
    h.locks.acquire(ticket.asset_id, RefreshClass::Full, "manual").await.unwrap();

    let report = worker(&h).drain_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let job = service.job(ticket.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("already in progress"));

    // terminal jobs are never re-queued
    assert_eq!(worker(&h).drain_once().await.unwrap().dequeued, 0);
}

#[tokio::test]
async fn test_request_validation() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let service = service(&h);

    let err = service
        .request_refresh(CHAIN, "0xnot-an-address", RefreshClass::Full, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidAddress(_)));

    let err = service
        .request_refresh("tron", &hex(0x42), RefreshClass::Full, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UnsupportedChain(_)));

    let err = service.scorecard("tron", &hex(0x77)).await.unwrap_err();
    assert!(matches!(err, ServiceError::UnsupportedChain(_)));

    // history is a read-only lookup
    let err = service.score_history(CHAIN, &hex(0x77), 5).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_scorecard_lookup_registers_pending_asset() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let service = service(&h);
    assert!(h.store.find_asset(CHAIN, addr(0x77)).await.unwrap().is_none());

    let card = service.scorecard("Ethereum", &hex(0x77)).await.unwrap();
    assert_eq!(card.asset.status, AssetStatus::Pending);
    assert!(card.score.is_none());
    assert!(card.evidence.holders.is_none());

    let stored = h.store.find_asset(CHAIN, addr(0x77)).await.unwrap().unwrap();
    assert_eq!(stored.id, card.asset.id);

    // a second lookup resolves to the same row
    let again = service.scorecard(CHAIN, &hex(0x77)).await.unwrap();
    assert_eq!(again.asset.id, card.asset.id);
}

#[tokio::test]
async fn test_worker_start_is_idempotent() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let worker = Arc::new(worker(&h));

    let handle = Arc::clone(&worker).start().await;
    assert!(handle.is_some());
    assert!(Arc::clone(&worker).start().await.is_none());
    assert!(worker.is_running().await);

    worker.stop().await;
    assert!(!worker.is_running().await);
}

#[tokio::test]
async fn test_restart_retires_the_previous_loop() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let config = RefreshConfig {
        drain_interval: Duration::from_millis(10),
        ..RefreshConfig::default()
    };
    let worker = Arc::new(RefreshWorker::new(h.store.clone(), h.orchestrator.clone(), config, "restart-test"));

    let first = Arc::clone(&worker).start().await.unwrap();
    worker.stop().await;
    let second = Arc::clone(&worker).start().await.unwrap();
    assert!(worker.is_running().await);

    // the old loop notices the restart on its next tick
    tokio::time::timeout(Duration::from_secs(2), first)
        .await
        .expect("first loop still running after restart")
        .unwrap();
    assert!(!second.is_finished());

    worker.stop().await;
    tokio::time::timeout(Duration::from_secs(2), second)
        .await
        .expect("second loop still running after stop")
        .unwrap();
}
