mod common;

use chrono::Utc;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

use common::{addr, harness, healthy_providers, ScriptedChain, CHAIN};
use decentrascore_backend::providers::{AuditProvider, AuditRegistryProvider, ProviderError};
use decentrascore_backend::store::Store;
use decentrascore_backend::types::{EvidenceKind, RefreshClass};

fn registry_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn registry_json() -> String {
    format!(
        r#"[
            {{"chain": "ethereum", "address": "{:#x}", "firm": "OpenZeppelin", "date": "{}"}},
            {{"chain": "ethereum", "address": "{:#x}", "firm": "Spearbit", "date": "2019-01-15T00:00:00Z"}}
        ]"#,
        addr(0x42),
        Utc::now().to_rfc3339(),
        addr(0x42),
    )
}

#[tokio::test]
async fn test_registry_loads_from_disk() {
    let file = registry_file(&registry_json());
    let registry = AuditRegistryProvider::from_path(file.path()).await.unwrap();

    let snapshot = registry.fetch_audits(CHAIN, addr(0x42)).await.unwrap();
    let firms: Vec<_> = snapshot.audits.iter().map(|a| a.firm.as_str()).collect();
    assert_eq!(firms, vec!["OpenZeppelin", "Spearbit"]);

    assert!(matches!(
        registry.fetch_audits(CHAIN, addr(0x43)).await,
        Err(ProviderError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_missing_or_malformed_registry_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(AuditRegistryProvider::from_path(&dir.path().join("absent.json")).await.is_err());

    let file = registry_file("{ not json");
    assert!(AuditRegistryProvider::from_path(file.path()).await.is_err());
}

#[tokio::test]
async fn test_audits_raise_code_assurance() {
    let file = registry_file(&registry_json());
    let registry = AuditRegistryProvider::from_path(file.path()).await.unwrap();

    let baseline = harness(ScriptedChain::new(), healthy_providers(Utc::now()));
    let mut providers = healthy_providers(Utc::now());
    providers.audits = Some(Arc::new(registry));
    let audited = harness(ScriptedChain::new(), providers);

    let plain = baseline
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();
    let with_audits = audited
        .orchestrator
        .ingest(CHAIN, addr(0x42), RefreshClass::Full, "test")
        .await
        .unwrap();
    assert!(with_audits.fresh.contains(&EvidenceKind::Audits));

    let plain_score = baseline.store.latest_score(plain.asset_id).await.unwrap().unwrap();
    let audited_score = audited.store.latest_score(with_audits.asset_id).await.unwrap().unwrap();
    assert!(audited_score.sub_scores.code_assurance > plain_score.sub_scores.code_assurance);
    assert!(audited_score.confidence.code_assurance > plain_score.confidence.code_assurance);
}
