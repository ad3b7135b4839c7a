#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use decentrascore_backend::aggregator::HoldersAggregator;
use decentrascore_backend::chain::{AbiUtils, ChainError, ChainReader};
use decentrascore_backend::config::{RefreshConfig, ScoringConfig};
use decentrascore_backend::introspection::ProxyIntrospector;
use decentrascore_backend::orchestrator::{EvidenceProviders, IngestionOrchestrator};
use decentrascore_backend::providers::metrics::build_snapshot;
use decentrascore_backend::providers::{
    ChainStatsProvider, GovernanceProvider, HoldersProvider, LiquidityProvider, ProviderError,
};
use decentrascore_backend::refresh::RefreshLockCoordinator;
use decentrascore_backend::scoring::ScoringEngine;
use decentrascore_backend::store::{MemoryStore, Store};
use decentrascore_backend::types::{
    ChainStats, GovernanceSnapshot, HolderShare, HoldersSnapshot, LiquidityPool, LiquiditySnapshot,
};

pub const CHAIN: &str = "ethereum";
pub const HEAD_BLOCK: u64 = 19_000_000;

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn address_word(address: Address) -> Bytes {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    Bytes::copy_from_slice(&word)
}

pub fn u256_word(value: U256) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes::<32>())
}

pub fn b256_word(word: B256) -> Bytes {
    Bytes::copy_from_slice(word.as_slice())
}

pub fn abi_string(value: &str) -> Bytes {
    let mut data = Vec::new();
    data.extend_from_slice(&U256::from(32u64).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(value.len()).to_be_bytes::<32>());
    let mut padded = value.as_bytes().to_vec();
    padded.resize(value.len().div_ceil(32) * 32, 0);
    data.extend_from_slice(&padded);
    data.into()
}

/// In-memory node: answers exactly what the test scripted, reverts everything else.
#[derive(Default)]
pub struct ScriptedChain {
    storage: Mutex<HashMap<(Address, B256), B256>>,
    calls: Mutex<HashMap<(Address, Bytes), Bytes>>,
    code: Mutex<HashSet<Address>>,
    pub storage_unavailable: bool,
    pub block: Option<u64>,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self {
            block: Some(HEAD_BLOCK),
            ..Default::default()
        }
    }

    /// A node that answers the head block but fails every storage read.
    pub fn without_storage() -> Self {
        Self {
            storage_unavailable: true,
            ..Self::new()
        }
    }

    pub fn set_slot(&self, address: Address, slot: B256, value: B256) {
        self.storage.lock().unwrap().insert((address, slot), value);
    }

    pub fn set_slot_address(&self, address: Address, slot: B256, value: Address) {
        self.set_slot(address, slot, B256::left_padding_from(value.as_slice()));
    }

    pub fn set_code(&self, address: Address) {
        self.code.lock().unwrap().insert(address);
    }

    pub fn answer(&self, to: Address, data: Bytes, result: Bytes) {
        self.calls.lock().unwrap().insert((to, data), result);
    }

    pub fn answer_selector(&self, to: Address, selector: [u8; 4], result: Bytes) {
        self.answer(to, AbiUtils::encode_call(selector), result);
    }
}

#[async_trait]
impl ChainReader for ScriptedChain {
    fn supports_chain(&self, chain: &str) -> bool {
        chain == CHAIN
    }

    async fn storage_at(&self, _chain: &str, address: Address, slot: B256) -> Result<B256, ChainError> {
        if self.storage_unavailable {
            return Err(ChainError::Rpc("connection refused".to_string()));
        }
        Ok(self
            .storage
            .lock()
            .unwrap()
            .get(&(address, slot))
            .copied()
            .unwrap_or(B256::ZERO))
    }

    async fn call(&self, _chain: &str, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        self.calls
            .lock()
            .unwrap()
            .get(&(to, data))
            .cloned()
            .ok_or_else(|| ChainError::Rpc("execution reverted".to_string()))
    }

    async fn code_at(&self, _chain: &str, address: Address) -> Result<Bytes, ChainError> {
        if self.code.lock().unwrap().contains(&address) {
            Ok(Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]))
        } else {
            Ok(Bytes::new())
        }
    }

    async fn block_number(&self, _chain: &str) -> Result<u64, ChainError> {
        self.block.ok_or_else(|| ChainError::Rpc("no head".to_string()))
    }
}

pub fn holders_snapshot(source: &str, shares: &[f64], observed_at: DateTime<Utc>) -> HoldersSnapshot {
    let holders = shares
        .iter()
        .enumerate()
        .map(|(i, pct)| HolderShare {
            address: addr(i as u8 + 1),
            pct: *pct,
            is_contract: false,
        })
        .collect();
    build_snapshot(source, U256::from(1_000_000_000u64), holders, observed_at)
}

pub struct StaticHolders {
    pub name: String,
    pub snapshot: HoldersSnapshot,
}

#[async_trait]
impl HoldersProvider for StaticHolders {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_holders(&self, _chain: &str, _address: Address) -> Result<HoldersSnapshot, ProviderError> {
        Ok(self.snapshot.clone())
    }
}

/// Fails every fetch, for every evidence kind.
pub struct FailingProvider;

#[async_trait]
impl HoldersProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing-holders"
    }

    async fn fetch_holders(&self, _chain: &str, _address: Address) -> Result<HoldersSnapshot, ProviderError> {
        Err(ProviderError::InvalidResponse("HTTP 502".to_string()))
    }
}

#[async_trait]
impl GovernanceProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing-governance"
    }

    async fn fetch_governance(&self, _chain: &str, _address: Address) -> Result<GovernanceSnapshot, ProviderError> {
        Err(ProviderError::InvalidResponse("HTTP 502".to_string()))
    }
}

/// Panics mid-fetch; the fault boundary must contain it.
pub struct PanickingLiquidity;

#[async_trait]
impl LiquidityProvider for PanickingLiquidity {
    fn name(&self) -> &str {
        "panicking-liquidity"
    }

    async fn fetch_liquidity(&self, _chain: &str, _address: Address) -> Result<LiquiditySnapshot, ProviderError> {
        panic!("liquidity source blew up")
    }
}

pub struct StaticLiquidity;

#[async_trait]
impl LiquidityProvider for StaticLiquidity {
    fn name(&self) -> &str {
        "static-liquidity"
    }

    async fn fetch_liquidity(&self, _chain: &str, _address: Address) -> Result<LiquiditySnapshot, ProviderError> {
        let tvls = [900_000.0, 600_000.0, 300_000.0, 150_000.0, 50_000.0];
        let total: f64 = tvls.iter().sum();
        Ok(LiquiditySnapshot {
            pools: tvls
                .iter()
                .enumerate()
                .map(|(i, tvl)| LiquidityPool {
                    venue: format!("dex-{}", i),
                    pool_address: format!("0x{:040x}", i + 1),
                    tvl_usd: *tvl,
                    share_pct: tvl / total * 100.0,
                })
                .collect(),
            centralized_venue_share_pct: 20.0,
            source_name: "static-liquidity".to_string(),
            observed_at_block: 0,
            observed_at: Utc::now(),
        })
    }
}

pub struct StaticChainStats;

#[async_trait]
impl ChainStatsProvider for StaticChainStats {
    fn name(&self) -> &str {
        "static-validators"
    }

    async fn fetch_chain_stats(&self, chain: &str) -> Result<ChainStats, ProviderError> {
        Ok(ChainStats {
            chain: chain.to_string(),
            validator_count: Some(900_000),
            top_validators_share_pct: Some(45.0),
            nakamoto_coefficient: Some(3),
            observed_at_block: 0,
            observed_at: Utc::now(),
        })
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub chain: Arc<ScriptedChain>,
    pub locks: Arc<RefreshLockCoordinator>,
    pub orchestrator: Arc<IngestionOrchestrator>,
}

pub fn harness(chain: ScriptedChain, providers: EvidenceProviders) -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()), chain, providers)
}

/// A harness over an existing store, to run differently wired orchestrators against shared history.
pub fn harness_with_store(store: Arc<MemoryStore>, chain: ScriptedChain, providers: EvidenceProviders) -> Harness {
    let chain = Arc::new(chain);
    let dyn_store: Arc<dyn Store> = store.clone();
    let dyn_chain: Arc<dyn ChainReader> = chain.clone();

    let locks = Arc::new(RefreshLockCoordinator::new(dyn_store.clone(), &RefreshConfig::default()));
    let orchestrator = Arc::new(IngestionOrchestrator::new(
        dyn_store,
        dyn_chain.clone(),
        ProxyIntrospector::new(dyn_chain),
        providers,
        ScoringEngine::new(ScoringConfig::default()),
        locks.clone(),
    ));

    Harness {
        store,
        chain,
        locks,
        orchestrator,
    }
}

/// Only liquidity and chain stats succeed; holders and governance fail.
pub fn degraded_providers() -> EvidenceProviders {
    EvidenceProviders {
        holders: HoldersAggregator::new(vec![Arc::new(FailingProvider)]),
        liquidity: Some(Arc::new(StaticLiquidity)),
        governance: Some(Arc::new(FailingProvider)),
        chain_stats: Some(Arc::new(StaticChainStats)),
        audits: None,
    }
}

pub fn healthy_providers(observed_at: DateTime<Utc>) -> EvidenceProviders {
    let shares = [12.0, 9.0, 7.5, 6.0, 5.0, 4.0, 3.5, 3.0, 2.5, 2.0, 1.5, 1.0];
    EvidenceProviders {
        holders: HoldersAggregator::new(vec![
            Arc::new(StaticHolders {
                name: "explorer".to_string(),
                snapshot: holders_snapshot("explorer", &shares, observed_at),
            }),
            Arc::new(StaticHolders {
                name: "indexer".to_string(),
                snapshot: holders_snapshot("indexer", &shares, observed_at),
            }),
        ]),
        liquidity: Some(Arc::new(StaticLiquidity)),
        governance: None,
        chain_stats: Some(Arc::new(StaticChainStats)),
        audits: None,
    }
}
