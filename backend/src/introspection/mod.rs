//! Upgradeable-proxy and access-control introspection over raw chain reads.

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::chain::{
    AbiUtils, ChainError, ChainReader, DECIMALS_SELECTOR, DEFAULT_ADMIN_ROLE_SELECTOR, EIP1967_ADMIN_SLOT,
    EIP1967_IMPLEMENTATION_SLOT, GET_MIN_DELAY_SELECTOR, GET_ROLE_MEMBER_COUNT_SELECTOR, NAME_SELECTOR,
    OWNER_SELECTOR, PAUSED_SELECTOR, PAUSER_ROLE_SELECTOR, SYMBOL_SELECTOR, TOTAL_SUPPLY_SELECTOR,
};
use crate::providers::ProviderError;
use crate::types::{AssetMetadata, ContractIntrospection, ProxyKind, RoleHolder};

pub const DEFAULT_ADMIN_ROLE: &str = "DEFAULT_ADMIN_ROLE";
pub const PAUSER_ROLE: &str = "PAUSER_ROLE";

const SECONDS_PER_DAY: u64 = 86_400;
/// Role enumeration stops here; larger member sets are logged and truncated.
const MAX_ROLE_MEMBERS: u64 = 50;

/// Published-source check, typically backed by a block explorer.
#[async_trait]
pub trait SourceVerifier: Send + Sync {
    async fn is_verified(&self, chain: &str, address: Address) -> Result<bool, ProviderError>;
}

/// Token metadata plus the raw supply, each field read independently.
#[derive(Debug, Clone, Default)]
pub struct TokenInfo {
    pub metadata: AssetMetadata,
    pub total_supply: Option<U256>,
}

pub struct ProxyIntrospector {
    chain: Arc<dyn ChainReader>,
    verifier: Option<Arc<dyn SourceVerifier>>,
}

impl ProxyIntrospector {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self {
            chain,
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SourceVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Inspect `address` on `chain`. Individual call failures degrade the
    /// affected field. An unconfigured chain, or a node that answers neither
    /// EIP-1967 slot read, is an error.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn introspect(&self, chain: &str, address: Address) -> Result<ContractIntrospection, ChainError> {
        if !self.chain.supports_chain(chain) {
            return Err(ChainError::UnsupportedChain(chain.to_string()));
        }

        let (implementation_word, admin_word, block) = tokio::join!(
            self.read_slot(chain, address, EIP1967_IMPLEMENTATION_SLOT),
            self.read_slot(chain, address, EIP1967_ADMIN_SLOT),
            self.chain.block_number(chain),
        );

        // proxy status is unknowable without at least one slot read
        if implementation_word.is_none() && admin_word.is_none() {
            return Err(match block {
                Err(e) => e,
                Ok(_) => ChainError::Rpc(format!("EIP-1967 slot reads failed for {}", address)),
            });
        }

        let mut implementation_address = implementation_word.and_then(AbiUtils::word_to_address);
        let admin_address = admin_word.and_then(AbiUtils::word_to_address);

        if let Some(implementation) = implementation_address {
            let has_code = match self.chain.code_at(chain, implementation).await {
                Ok(code) => !code.is_empty(),
                Err(e) => {
                    warn!("Bytecode fetch for implementation {} failed: {}", implementation, e);
                    false
                }
            };
            if !has_code {
                debug!("Implementation slot of {} points at {} with no code, not a proxy", address, implementation);
                implementation_address = None;
            }
        }

        let upgradeable = implementation_address.is_some();
        let proxy_kind = match (upgradeable, admin_address.is_some()) {
            (true, true) => Some(ProxyKind::Eip1967Transparent),
            (true, false) => Some(ProxyKind::Eip1967Uups),
            (false, _) => None,
        };

        let (admin_holders, pauser_holders, owner_address, paused_answer, verified) = tokio::join!(
            self.enumerate_role(chain, address, DEFAULT_ADMIN_ROLE_SELECTOR),
            self.enumerate_role(chain, address, PAUSER_ROLE_SELECTOR),
            self.read_owner(chain, address),
            self.call_opt(chain, address, AbiUtils::encode_call(PAUSED_SELECTOR)),
            self.check_verified(chain, address),
        );

        let pausable = paused_answer.map(|data| data.len() >= 32).unwrap_or(false) || !pauser_holders.is_empty();

        let mut timelock_candidates: Vec<Address> = Vec::new();
        for candidate in admin_address
            .into_iter()
            .chain(owner_address)
            .chain(admin_holders.iter().copied())
        {
            if !timelock_candidates.contains(&candidate) {
                timelock_candidates.push(candidate);
            }
        }
        let timelock = self.probe_timelock(chain, &timelock_candidates).await;

        let distinct_admins: HashSet<Address> = admin_holders.iter().copied().collect();
        let risk_estimate = estimate_risk(
            upgradeable,
            admin_address.is_some(),
            distinct_admins.len(),
            !pauser_holders.is_empty(),
            timelock,
        );

        let roles = admin_holders
            .into_iter()
            .map(|holder| RoleHolder {
                role_name: DEFAULT_ADMIN_ROLE.to_string(),
                holder_address: holder,
            })
            .chain(pauser_holders.into_iter().map(|holder| RoleHolder {
                role_name: PAUSER_ROLE.to_string(),
                holder_address: holder,
            }))
            .collect();

        Ok(ContractIntrospection {
            verified,
            upgradeable,
            proxy_kind,
            implementation_address,
            admin_address,
            owner_address,
            roles,
            pausable,
            timelock,
            risk_estimate,
            observed_at_block: block.unwrap_or(0),
            observed_at: Utc::now(),
        })
    }

    /// `name()`, `symbol()`, `decimals()` and `totalSupply()`, each optional.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn read_token_info(&self, chain: &str, address: Address) -> Result<TokenInfo, ChainError> {
        if !self.chain.supports_chain(chain) {
            return Err(ChainError::UnsupportedChain(chain.to_string()));
        }

        let (name, symbol, decimals, supply) = tokio::join!(
            self.call_opt(chain, address, AbiUtils::encode_call(NAME_SELECTOR)),
            self.call_opt(chain, address, AbiUtils::encode_call(SYMBOL_SELECTOR)),
            self.call_opt(chain, address, AbiUtils::encode_call(DECIMALS_SELECTOR)),
            self.call_opt(chain, address, AbiUtils::encode_call(TOTAL_SUPPLY_SELECTOR)),
        );

        Ok(TokenInfo {
            metadata: AssetMetadata {
                symbol: symbol.and_then(|d| AbiUtils::decode_string(&d)),
                name: name.and_then(|d| AbiUtils::decode_string(&d)),
                decimals: decimals
                    .and_then(|d| AbiUtils::decode_u64(&d))
                    .and_then(|v| u8::try_from(v).ok()),
                icon_url: None,
            },
            total_supply: supply.and_then(|d| AbiUtils::decode_u256(&d)),
        })
    }

    async fn read_slot(&self, chain: &str, address: Address, slot: B256) -> Option<B256> {
        match self.chain.storage_at(chain, address, slot).await {
            Ok(word) => Some(word),
            Err(e) => {
                warn!("Storage read {} on {} failed: {}", slot, address, e);
                None
            }
        }
    }

    /// `eth_call` where a revert, an error or an empty answer all mean "not implemented".
    async fn call_opt(&self, chain: &str, to: Address, data: Bytes) -> Option<Bytes> {
        match self.chain.call(chain, to, data).await {
            Ok(result) if !result.is_empty() => Some(result),
            Ok(_) => None,
            Err(e) => {
                debug!("eth_call to {} failed: {}", to, e);
                None
            }
        }
    }

    async fn read_owner(&self, chain: &str, address: Address) -> Option<Address> {
        self.call_opt(chain, address, AbiUtils::encode_call(OWNER_SELECTOR))
            .await
            .and_then(|data| AbiUtils::decode_address(&data))
    }

    /// Resolve the role id through its getter, then list members one call at a time.
    async fn enumerate_role(&self, chain: &str, address: Address, role_getter: [u8; 4]) -> Vec<Address> {
        let Some(role) = self
            .call_opt(chain, address, AbiUtils::encode_call(role_getter))
            .await
            .and_then(|data| AbiUtils::first_word(&data))
        else {
            return Vec::new();
        };

        let count = self
            .call_opt(chain, address, AbiUtils::encode_with_word(GET_ROLE_MEMBER_COUNT_SELECTOR, role))
            .await
            .and_then(|data| AbiUtils::decode_u64(&data))
            .unwrap_or(0);

        if count > MAX_ROLE_MEMBERS {
            warn!("Role {} on {} has {} members, enumerating first {}", role, address, count, MAX_ROLE_MEMBERS);
        }

        let calls = (0..count.min(MAX_ROLE_MEMBERS)).map(|index| {
            self.call_opt(chain, address, AbiUtils::encode_role_member(role, U256::from(index)))
        });

        join_all(calls)
            .await
            .into_iter()
            .flatten()
            .filter_map(|data| AbiUtils::decode_address(&data))
            .collect()
    }

    async fn probe_timelock(&self, chain: &str, candidates: &[Address]) -> Option<u64> {
        for candidate in candidates {
            let delay = self
                .call_opt(chain, *candidate, AbiUtils::encode_call(GET_MIN_DELAY_SELECTOR))
                .await
                .and_then(|data| AbiUtils::decode_u64(&data));
            if let Some(delay) = delay {
                debug!("Timelock at {} with delay {}s", candidate, delay);
                return Some(delay);
            }
        }
        None
    }

    async fn check_verified(&self, chain: &str, address: Address) -> bool {
        let Some(verifier) = &self.verifier else {
            return false;
        };
        match verifier.is_verified(chain, address).await {
            Ok(verified) => verified,
            Err(e) => {
                warn!("Source verification for {} failed: {}", address, e);
                false
            }
        }
    }
}

/// Internal 0-1 control risk, kept alongside the evidence for tuning.
pub fn estimate_risk(
    upgradeable: bool,
    has_admin_slot: bool,
    distinct_admins: usize,
    has_pauser: bool,
    timelock_secs: Option<u64>,
) -> f64 {
    let mut risk = 0.0;
    if upgradeable {
        risk += 0.3;
    }
    if has_admin_slot {
        risk += 0.15;
    }
    risk += match distinct_admins {
        0 | 1 => 0.2,
        2 => 0.1,
        _ => 0.0,
    };
    if has_pauser {
        risk += 0.1;
    }
    if let Some(secs) = timelock_secs {
        let periods = secs / (30 * SECONDS_PER_DAY);
        risk -= (periods as f64 * 0.05).min(0.2);
    }
    risk.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_estimate_orders_admin_concentration() {
        let single = estimate_risk(true, true, 1, false, None);
        let pair = estimate_risk(true, true, 2, false, None);
        let many = estimate_risk(true, true, 3, false, None);
        assert!(single > pair && pair > many);
        assert!((single - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_risk_estimate_timelock_reduction_is_capped() {
        let base = estimate_risk(true, false, 3, true, None);
        let month = estimate_risk(true, false, 3, true, Some(30 * SECONDS_PER_DAY));
        let year = estimate_risk(true, false, 3, true, Some(365 * SECONDS_PER_DAY));
        assert!((base - month - 0.05).abs() < 1e-9);
        assert!((base - year - 0.2).abs() < 1e-9);
        assert_eq!(estimate_risk(false, false, 5, false, Some(365 * SECONDS_PER_DAY)), 0.0);
    }
}
