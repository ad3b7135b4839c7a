mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;

use common::{
    addr, degraded_providers, harness, harness_with_store, healthy_providers, PanickingLiquidity, ScriptedChain, CHAIN,
    HEAD_BLOCK,
};
use decentrascore_backend::orchestrator::{IngestionError, IngestionEvent};
use decentrascore_backend::store::Store;
use decentrascore_backend::types::{AssetStatus, EvidenceKind, LockStatus, RefreshClass};

#[tokio::test]
async fn test_degraded_run_still_scores_with_shifted_weights() {
    let h = harness(ScriptedChain::without_storage(), degraded_providers());
    let mut events = h.orchestrator.subscribe();

    let result = h
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();

    assert!(result.total > 0.0 && result.total <= 100.0);
    assert!(result.fresh.contains(&EvidenceKind::Liquidity));
    assert!(result.fresh.contains(&EvidenceKind::ChainStats));
    assert!(!result.fresh.contains(&EvidenceKind::Contract));
    assert!(!result.fresh.contains(&EvidenceKind::Holders));
    assert!(result.degraded.iter().any(|reason| reason.contains("HTTP 502")));

    let score = h.store.latest_score(result.asset_id).await.unwrap().unwrap();
    assert_eq!(score.id, result.score_id);
    assert!(score.confidence.ownership <= 0.3);
    assert!(score.confidence.governance <= 0.3);
    assert_eq!(score.sub_scores.control_risk, 45.0);
    assert!(score.weights.liquidity > 0.15, "liquidity weight {}", score.weights.liquidity);
    assert!(score.weights.chain_level > 0.10, "chain weight {}", score.weights.chain_level);
    assert!((score.weights.sum() - 1.0).abs() <= 0.001);

    let asset = h.store.get_asset(result.asset_id).await.unwrap().unwrap();
    assert_eq!(asset.status, AssetStatus::Active);

    match events.recv().await.unwrap() {
        IngestionEvent::ScoreComputed {
            asset_id, score_id, total, ..
        } => {
            assert_eq!(asset_id, result.asset_id);
            assert_eq!(score_id, result.score_id);
            assert_eq!(total, result.total);
        }
    }

    println!("✅ Degraded run scored {:.2} with weights {:?}", result.total, score.weights);
}

#[tokio::test]
async fn test_healthy_run_persists_evidence_and_metadata() {
    let chain = ScriptedChain::new();
    chain.answer_selector(
        addr(0x42),
        decentrascore_backend::chain::SYMBOL_SELECTOR,
        common::abi_string("DCS"),
    );
    let h = harness(chain, healthy_providers(Utc::now()));

    let result = h
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();

    assert_eq!(result.observed_at_block, HEAD_BLOCK);
    for kind in [EvidenceKind::Contract, EvidenceKind::Holders, EvidenceKind::Liquidity, EvidenceKind::ChainStats] {
        assert!(result.fresh.contains(&kind), "{:?} missing from fresh", kind);
    }

    let evidence = h.store.latest_evidence(result.asset_id, CHAIN).await.unwrap();
    let holders = evidence.holders.unwrap();
    assert_eq!(holders.contributing_sources.len(), 2);
    assert_eq!(holders.observed_at_block, HEAD_BLOCK);
    assert_eq!(evidence.liquidity.unwrap().observed_at_block, HEAD_BLOCK);
    assert!(!evidence.contract.unwrap().upgradeable);

    let asset = h.store.get_asset(result.asset_id).await.unwrap().unwrap();
    assert_eq!(asset.metadata.symbol.as_deref(), Some("DCS"));

    // immutable, no admin: 30 base plus 10 for no privileged party
    let score = h.store.latest_score(result.asset_id).await.unwrap().unwrap();
    assert_eq!(score.sub_scores.control_risk, 40.0);
}

#[tokio::test]
async fn test_volatile_refresh_reuses_stored_contract_evidence() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));

    let full = h
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();
    let volatile = h
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Volatile, "test")
        .await
        .unwrap();

    assert_eq!(volatile.asset_id, full.asset_id);
    assert_eq!(volatile.fresh, vec![EvidenceKind::Holders, EvidenceKind::Liquidity]);

    let history = h.store.score_history(full.asset_id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    let latest = &history[0];
    assert_eq!(latest.id, volatile.score_id);
    assert_eq!(latest.sub_scores.control_risk, 40.0, "contract evidence should carry over");
    assert!(latest.confidence.chain_level > 0.2, "chain stats should carry over");
}

#[tokio::test]
async fn test_failed_fetch_does_not_fall_back_to_previous_run() {
    let healthy = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let first = healthy
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();
    let before = healthy.store.latest_score(first.asset_id).await.unwrap().unwrap();
    assert!(before.confidence.ownership > 0.3);

    // same history, but now holders and governance sources fail
    let failing = harness_with_store(healthy.store.clone(), ScriptedChain::new(), degraded_providers());
    let second = failing
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();
    assert_eq!(second.asset_id, first.asset_id);
    assert!(!second.fresh.contains(&EvidenceKind::Holders));

    let after = failing.store.latest_score(second.asset_id).await.unwrap().unwrap();
    assert_eq!(after.id, second.score_id);
    assert!(after.confidence.ownership <= 0.3, "ownership confidence {}", after.confidence.ownership);
    assert_ne!(after.sub_scores.ownership, before.sub_scores.ownership);
}

#[tokio::test]
async fn test_panicking_source_is_contained() {
    let mut providers = healthy_providers(Utc::now());
    providers.liquidity = Some(Arc::new(PanickingLiquidity));
    let h = harness(ScriptedChain::new(), providers);

    let result = h
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();

    assert!(!result.fresh.contains(&EvidenceKind::Liquidity));
    assert!(result.degraded.iter().any(|r| r.contains("panicking-liquidity")));

    let score = h.store.latest_score(result.asset_id).await.unwrap().unwrap();
    assert_eq!(score.confidence.liquidity, 0.2);
}

#[tokio::test]
async fn test_stale_evidence_lowers_confidence() {
    let h_fresh = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let h_old = harness(ScriptedChain::new(), healthy_providers(Utc::now() - Duration::days(120)));

    let fresh = h_fresh
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();
    let old = h_old
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();

    let fresh_score = h_fresh.store.latest_score(fresh.asset_id).await.unwrap().unwrap();
    let old_score = h_old.store.latest_score(old.asset_id).await.unwrap().unwrap();
    assert!(old_score.confidence.ownership < fresh_score.confidence.ownership);
    assert_eq!(old_score.sub_scores.ownership, fresh_score.sub_scores.ownership);
}

#[tokio::test]
async fn test_lock_is_released_and_contention_is_reported() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let asset = h.store.ensure_asset(CHAIN, addr(0x42), Utc::now()).await.unwrap();

    let held = h.locks.acquire(asset.id, RefreshClass::Full, "someone-else").await.unwrap();
    let err = h
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::Lock(ref e) if e.is_contention()));
    assert!(h.store.latest_score(asset.id).await.unwrap().is_none());

    h.locks.release(&held, LockStatus::Completed).await.unwrap();
    h.orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();
    assert!(h.store.active_locks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_chain_is_rejected_before_any_write() {
    let h = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let err = h
        .orchestrator
        .ingest("solana", addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::UnsupportedChain(chain) if chain == "solana"));
    assert!(h.store.find_asset("solana", addr(0x42)).await.unwrap().is_none());
}
