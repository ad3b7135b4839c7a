//! One ingestion run: gather evidence concurrently, persist it, score, publish.

use alloy::primitives::Address;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::aggregator::HoldersAggregator;
use crate::chain::ChainReader;
use crate::introspection::{ProxyIntrospector, TokenInfo};
use crate::providers::{
    fetch_isolated, AuditProvider, ChainStatsProvider, GovernanceProvider, LiquidityProvider, ProviderError,
    ProviderOutcome,
};
use crate::refresh::{LockError, RefreshLockCoordinator};
use crate::scoring::ScoringEngine;
use crate::store::{Store, StoreError};
use crate::types::{
    Asset, AssetId, AssetStatus, AuditSnapshot, ChainStats, ContractIntrospection, EvidenceKind, GovernanceSnapshot,
    HoldersSnapshot, LiquiditySnapshot, LockStatus, RefreshClass, ScoreId,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Sources for everything except contract introspection. Unset sources yield absent evidence.
pub struct EvidenceProviders {
    pub holders: HoldersAggregator,
    pub liquidity: Option<Arc<dyn LiquidityProvider>>,
    pub governance: Option<Arc<dyn GovernanceProvider>>,
    pub chain_stats: Option<Arc<dyn ChainStatsProvider>>,
    pub audits: Option<Arc<dyn AuditProvider>>,
}

impl Default for EvidenceProviders {
    fn default() -> Self {
        Self {
            holders: HoldersAggregator::new(Vec::new()),
            liquidity: None,
            governance: None,
            chain_stats: None,
            audits: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub asset_id: AssetId,
    pub score_id: ScoreId,
    pub total: f64,
    pub refresh_class: RefreshClass,
    pub observed_at_block: u64,
    /// Evidence kinds fetched and persisted by this run.
    pub fresh: Vec<EvidenceKind>,
    /// Reasons for evidence that was scheduled but came back absent or failed.
    pub degraded: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IngestionEvent {
    #[serde(rename_all = "camelCase")]
    ScoreComputed {
        asset_id: AssetId,
        chain: String,
        address: Address,
        score_id: ScoreId,
        total: f64,
        calc_version: String,
        refresh_class: RefreshClass,
    },
}

pub struct IngestionOrchestrator {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainReader>,
    introspector: Arc<ProxyIntrospector>,
    providers: EvidenceProviders,
    engine: ScoringEngine,
    locks: Arc<RefreshLockCoordinator>,
    events: broadcast::Sender<IngestionEvent>,
}

/// Per-run bookkeeping of which evidence arrived.
#[derive(Default)]
struct RunLedger {
    fresh: Vec<EvidenceKind>,
    degraded: Vec<String>,
}

impl RunLedger {
    /// Apply one category's outcome to `slot`. Unscheduled categories keep the
    /// stored row; scheduled ones that came back empty or failed are cleared.
    fn settle<'a, T>(
        &mut self,
        kind: EvidenceKind,
        outcome: Option<ProviderOutcome<T>>,
        slot: &'a mut Option<T>,
    ) -> Option<&'a mut T> {
        match outcome? {
            ProviderOutcome::Ok(evidence) => {
                self.fresh.push(kind);
                Some(slot.insert(evidence))
            }
            ProviderOutcome::Absent => {
                self.degraded.push(format!("{}: no data", kind.as_str()));
                *slot = None;
                None
            }
            ProviderOutcome::Failed(reason) => {
                warn!("{} evidence degraded: {}", kind.as_str(), reason);
                self.degraded.push(reason);
                *slot = None;
                None
            }
        }
    }
}

/// HTTP-sourced evidence carries no block of its own; pin it to the run's head block.
fn stamp_block(observed_at_block: &mut u64, head_block: u64) {
    if *observed_at_block == 0 {
        *observed_at_block = head_block;
    }
}

impl IngestionOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainReader>,
        introspector: ProxyIntrospector,
        providers: EvidenceProviders,
        engine: ScoringEngine,
        locks: Arc<RefreshLockCoordinator>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            chain,
            introspector: Arc::new(introspector),
            providers,
            engine,
            locks,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestionEvent> {
        self.events.subscribe()
    }

    pub fn locks(&self) -> &Arc<RefreshLockCoordinator> {
        &self.locks
    }

    /// Lock-wrapped ingestion of `(chain, address)`. Contention surfaces as
    /// [`LockError::AlreadyInProgress`]; the lock always ends terminal.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn ingest(
        &self,
        chain: &str,
        address: Address,
        class: RefreshClass,
        owner: &str,
    ) -> Result<IngestionResult, IngestionError> {
        let chain = chain.to_lowercase();
        if !self.chain.supports_chain(&chain) {
            return Err(IngestionError::UnsupportedChain(chain));
        }

        let asset = self.store.ensure_asset(&chain, address, Utc::now()).await?;
        let lock = self.locks.acquire(asset.id, class, owner).await?;

        let result = self.run(asset, class).await;

        let status = if result.is_ok() { LockStatus::Completed } else { LockStatus::Failed };
        if let Err(e) = self.locks.release(&lock, status).await {
            warn!("Failed to release lock {}: {}", lock.id, e);
        }
        result
    }

    async fn run(&self, asset: Asset, class: RefreshClass) -> Result<IngestionResult, IngestionError> {
        let now = Utc::now();
        let chain = asset.chain.clone();
        let address = asset.address;

        let head_block = match self.chain.block_number(&chain).await {
            Ok(block) => block,
            Err(e) => {
                warn!("Head block read on {} failed: {}", chain, e);
                0
            }
        };

        let (contract, token, holders, liquidity, governance, chain_stats, audits) = tokio::join!(
            self.fetch_contract(&chain, address, class),
            self.fetch_token_info(&chain, address),
            self.fetch_holders(&chain, address, class),
            self.fetch_liquidity(&chain, address, class),
            self.fetch_governance(&chain, address, class),
            self.fetch_chain_stats(&chain, class),
            self.fetch_audits(&chain, address, class),
        );

        // categories this class does not schedule keep their last persisted row
        let mut evidence = self.store.latest_evidence(asset.id, &chain).await?;
        let mut ledger = RunLedger::default();

        if let Some(contract) = ledger.settle(EvidenceKind::Contract, contract, &mut evidence.contract) {
            self.store.insert_introspection(asset.id, contract).await?;
        }
        if let Some(holders) = ledger.settle(EvidenceKind::Holders, holders, &mut evidence.holders) {
            stamp_block(&mut holders.observed_at_block, head_block);
            self.store.insert_holders(asset.id, holders).await?;
        }
        if let Some(liquidity) = ledger.settle(EvidenceKind::Liquidity, liquidity, &mut evidence.liquidity) {
            stamp_block(&mut liquidity.observed_at_block, head_block);
            self.store.insert_liquidity(asset.id, liquidity).await?;
        }
        if let Some(governance) = ledger.settle(EvidenceKind::Governance, governance, &mut evidence.governance) {
            stamp_block(&mut governance.observed_at_block, head_block);
            self.store.upsert_governance(asset.id, governance).await?;
        }
        if let Some(stats) = ledger.settle(EvidenceKind::ChainStats, chain_stats, &mut evidence.chain_stats) {
            stamp_block(&mut stats.observed_at_block, head_block);
            self.store.upsert_chain_stats(stats).await?;
        }
        if let Some(audits) = ledger.settle(EvidenceKind::Audits, audits, &mut evidence.audits) {
            self.store.insert_audits(asset.id, audits).await?;
        }

        let score = self.engine.score(asset.id, &evidence, now);
        self.store.insert_score(&score).await?;

        let mut updated = asset.clone();
        if let ProviderOutcome::Ok(info) = token {
            updated.metadata = updated.metadata.merged_with(&info.metadata);
        }
        updated.status = AssetStatus::Active;
        updated.updated_at = now;
        self.store.update_asset(&updated).await?;

        info!(
            "📊 Scored {} on {}: {:.2} (class {}, block {}, {} fresh, {} degraded)",
            address,
            chain,
            score.total,
            class,
            score.observed_at_block,
            ledger.fresh.len(),
            ledger.degraded.len()
        );

        // nobody listening is fine
        let _ = self.events.send(IngestionEvent::ScoreComputed {
            asset_id: asset.id,
            chain: chain.clone(),
            address,
            score_id: score.id,
            total: score.total,
            calc_version: score.calc_version.clone(),
            refresh_class: class,
        });

        Ok(IngestionResult {
            asset_id: asset.id,
            score_id: score.id,
            total: score.total,
            refresh_class: class,
            observed_at_block: score.observed_at_block,
            fresh: ledger.fresh,
            degraded: ledger.degraded,
        })
    }

    async fn fetch_contract(
        &self,
        chain: &str,
        address: Address,
        class: RefreshClass,
    ) -> Option<ProviderOutcome<ContractIntrospection>> {
        if !class.refreshes(EvidenceKind::Contract) {
            return None;
        }
        let introspector = Arc::clone(&self.introspector);
        let chain = chain.to_string();
        let outcome = fetch_isolated("introspection".to_string(), async move {
            introspector.introspect(&chain, address).await.map_err(ProviderError::from)
        })
        .await;
        Some(outcome)
    }

    async fn fetch_token_info(&self, chain: &str, address: Address) -> ProviderOutcome<TokenInfo> {
        let introspector = Arc::clone(&self.introspector);
        let chain = chain.to_string();
        fetch_isolated("token-info".to_string(), async move {
            introspector.read_token_info(&chain, address).await.map_err(ProviderError::from)
        })
        .await
    }

    async fn fetch_holders(
        &self,
        chain: &str,
        address: Address,
        class: RefreshClass,
    ) -> Option<ProviderOutcome<HoldersSnapshot>> {
        if !class.refreshes(EvidenceKind::Holders) {
            return None;
        }
        Some(self.providers.holders.fetch_consensus(chain, address).await)
    }

    async fn fetch_liquidity(
        &self,
        chain: &str,
        address: Address,
        class: RefreshClass,
    ) -> Option<ProviderOutcome<LiquiditySnapshot>> {
        if !class.refreshes(EvidenceKind::Liquidity) {
            return None;
        }
        let Some(provider) = self.providers.liquidity.as_ref().map(Arc::clone) else {
            return Some(ProviderOutcome::Absent);
        };
        let chain = chain.to_string();
        let outcome = fetch_isolated(provider.name().to_string(), async move {
            provider.fetch_liquidity(&chain, address).await
        })
        .await;
        Some(outcome)
    }

    async fn fetch_governance(
        &self,
        chain: &str,
        address: Address,
        class: RefreshClass,
    ) -> Option<ProviderOutcome<GovernanceSnapshot>> {
        if !class.refreshes(EvidenceKind::Governance) {
            return None;
        }
        let Some(provider) = self.providers.governance.as_ref().map(Arc::clone) else {
            return Some(ProviderOutcome::Absent);
        };
        let chain = chain.to_string();
        let outcome = fetch_isolated(provider.name().to_string(), async move {
            provider.fetch_governance(&chain, address).await
        })
        .await;
        Some(outcome)
    }

    async fn fetch_chain_stats(&self, chain: &str, class: RefreshClass) -> Option<ProviderOutcome<ChainStats>> {
        if !class.refreshes(EvidenceKind::ChainStats) {
            return None;
        }
        let Some(provider) = self.providers.chain_stats.as_ref().map(Arc::clone) else {
            return Some(ProviderOutcome::Absent);
        };
        let chain = chain.to_string();
        let outcome = fetch_isolated(provider.name().to_string(), async move {
            provider.fetch_chain_stats(&chain).await
        })
        .await;
        Some(outcome)
    }

    async fn fetch_audits(
        &self,
        chain: &str,
        address: Address,
        class: RefreshClass,
    ) -> Option<ProviderOutcome<AuditSnapshot>> {
        if !class.refreshes(EvidenceKind::Audits) {
            return None;
        }
        let Some(provider) = self.providers.audits.as_ref().map(Arc::clone) else {
            return Some(ProviderOutcome::Absent);
        };
        let chain = chain.to_string();
        let outcome = fetch_isolated(provider.name().to_string(), async move {
            provider.fetch_audits(&chain, address).await
        })
        .await;
        Some(outcome)
    }
}
