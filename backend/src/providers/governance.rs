use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::cache::TtlCache;
use super::{format_address, http_client, GovernanceProvider, ProviderError};
use crate::chain::{AbiUtils, ChainReader, DECIMALS_SELECTOR, TOTAL_SUPPLY_SELECTOR};
use crate::types::{GovernanceFramework, GovernanceSnapshot, TurnoutRecord};

const SPACES_KEY: &str = "spaces";

const SPACES_QUERY: &str = r#"
query Spaces($first: Int!) {
  spaces(first: $first, orderBy: "followersCount", orderDirection: desc) {
    id
    network
    voting { quorum }
    strategies { name network params }
    plugins
  }
}"#;

const PROPOSALS_QUERY: &str = r#"
query Proposals($space: String!, $first: Int!) {
  proposals(first: $first, where: { space: $space, state: "closed" }, orderBy: "created", orderDirection: desc) {
    id
    scores_total
    created
  }
}"#;

/// Governance space as far as token matching needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceSummary {
    pub id: String,
    pub network: String,
    pub quorum: Option<f64>,
    pub token_addresses: Vec<String>,
    pub executes_onchain: bool,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SpacesData {
    #[serde(default)]
    spaces: Vec<RawSpace>,
}

#[derive(Debug, Deserialize)]
struct RawSpace {
    id: String,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    voting: Option<RawVoting>,
    #[serde(default)]
    strategies: Vec<RawStrategy>,
    #[serde(default)]
    plugins: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawVoting {
    #[serde(default)]
    quorum: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawStrategy {
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ProposalsData {
    #[serde(default)]
    proposals: Vec<RawProposal>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawProposal {
    pub id: String,
    #[serde(default)]
    pub scores_total: Option<f64>,
    pub created: i64,
}

/// Off-chain voting hub (Snapshot GraphQL). The space listing is large and
/// slow-changing, so it lives in an injected [`TtlCache`].
pub struct SnapshotGovernanceProvider {
    client: reqwest::Client,
    hub_url: String,
    chain_reader: Arc<dyn ChainReader>,
    spaces: TtlCache<String, Arc<Vec<SpaceSummary>>>,
    spaces_limit: u32,
    proposals_limit: u32,
}

impl SnapshotGovernanceProvider {
    pub fn new(
        hub_url: impl Into<String>,
        chain_reader: Arc<dyn ChainReader>,
        spaces: TtlCache<String, Arc<Vec<SpaceSummary>>>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            client: http_client(timeout),
            hub_url: hub_url.into(),
            chain_reader,
            spaces,
            spaces_limit: 1000,
            proposals_limit: 50,
        }
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, ProviderError> {
        let response = self
            .client
            .post(&self.hub_url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::InvalidResponse(format!("HTTP {} from governance hub", response.status())));
        }
        let body: GraphqlResponse<T> = serde_json::from_str(&response.text().await?)?;
        if let Some(errors) = body.errors.filter(|e| !e.is_empty()) {
            return Err(ProviderError::InvalidResponse(format!("GraphQL errors: {:?}", errors)));
        }
        body.data
            .ok_or_else(|| ProviderError::InvalidResponse("GraphQL response without data".to_string()))
    }

    async fn list_spaces(&self) -> Result<Arc<Vec<SpaceSummary>>, ProviderError> {
        self.spaces
            .get_or_fetch(SPACES_KEY.to_string(), || async {
                let data: SpacesData = self
                    .graphql(SPACES_QUERY, json!({ "first": self.spaces_limit }))
                    .await?;
                let summaries: Vec<SpaceSummary> = data.spaces.into_iter().map(summarize_space).collect();
                debug!("Cached {} governance spaces", summaries.len());
                Ok(Arc::new(summaries))
            })
            .await
    }

    /// Circulating supply in whole tokens, used as the turnout denominator.
    async fn supply_in_tokens(&self, chain: &str, address: Address) -> Option<f64> {
        let (supply, decimals) = tokio::join!(
            self.chain_reader.call(chain, address, AbiUtils::encode_call(TOTAL_SUPPLY_SELECTOR)),
            self.chain_reader.call(chain, address, AbiUtils::encode_call(DECIMALS_SELECTOR)),
        );
        let supply = supply.ok().and_then(|d| AbiUtils::decode_u256(&d))?;
        let decimals = decimals.ok().and_then(|d| AbiUtils::decode_u64(&d)).unwrap_or(18);
        to_token_units(supply, decimals)
    }
}

#[async_trait]
impl GovernanceProvider for SnapshotGovernanceProvider {
    fn name(&self) -> &str {
        "snapshot"
    }

    #[instrument(skip(self), fields(address = %address))]
    async fn fetch_governance(&self, chain: &str, address: Address) -> Result<GovernanceSnapshot, ProviderError> {
        let network = chain_network_id(chain).ok_or_else(|| ProviderError::UnsupportedChain(chain.to_string()))?;
        let token = format_address(address);

        let spaces = self.list_spaces().await?;
        let space = find_space(&spaces, network, &token)
            .ok_or_else(|| ProviderError::NotFound(format!("no governance space for {}", token)))?;

        let (proposals, supply) = tokio::join!(
            self.graphql::<ProposalsData>(
                PROPOSALS_QUERY,
                json!({ "space": space.id, "first": self.proposals_limit }),
            ),
            self.supply_in_tokens(chain, address),
        );
        let proposals = proposals?.proposals;

        if supply.is_none() {
            warn!("Supply unreadable for {}, governance turnout left empty", token);
        }

        Ok(GovernanceSnapshot {
            framework: Some(if space.executes_onchain {
                GovernanceFramework::SafeSnap
            } else {
                GovernanceFramework::Snapshot
            }),
            quorum_pct: match (space.quorum, supply) {
                (Some(quorum), Some(supply)) if quorum > 0.0 && supply > 0.0 => {
                    Some((quorum / supply * 100.0).min(100.0))
                }
                _ => None,
            },
            turnout_history: supply.map(|s| turnout_records(&proposals, s)).unwrap_or_default(),
            observed_at_block: 0,
            observed_at: Utc::now(),
        })
    }
}

fn summarize_space(raw: RawSpace) -> SpaceSummary {
    let token_addresses = raw
        .strategies
        .iter()
        .filter_map(|s| s.params.as_ref())
        .filter_map(|p| p.get("address").and_then(|a| a.as_str()))
        .map(|a| a.to_lowercase())
        .collect();
    let executes_onchain = raw
        .plugins
        .as_ref()
        .and_then(|p| p.as_object())
        .map(|p| p.contains_key("safeSnap"))
        .unwrap_or(false);

    SpaceSummary {
        id: raw.id,
        network: raw.network.unwrap_or_default(),
        quorum: raw.voting.and_then(|v| v.quorum),
        token_addresses,
        executes_onchain,
    }
}

pub fn find_space<'a>(spaces: &'a [SpaceSummary], network: &str, token: &str) -> Option<&'a SpaceSummary> {
    let token = token.to_lowercase();
    spaces
        .iter()
        .find(|s| s.network == network && s.token_addresses.iter().any(|a| *a == token))
}

pub(crate) fn turnout_records(proposals: &[RawProposal], supply_tokens: f64) -> Vec<TurnoutRecord> {
    proposals
        .iter()
        .filter_map(|p| {
            let votes = p.scores_total?;
            let timestamp = Utc.timestamp_opt(p.created, 0).single()?;
            Some(TurnoutRecord {
                proposal_id: p.id.clone(),
                turnout_pct: (votes / supply_tokens * 100.0).clamp(0.0, 100.0),
                timestamp,
            })
        })
        .collect()
}

fn to_token_units(raw: U256, decimals: u64) -> Option<f64> {
    let raw: f64 = raw.to_string().parse().ok()?;
    let scale = 10f64.powi(i32::try_from(decimals).ok()?);
    (scale > 0.0).then(|| raw / scale)
}

/// EVM network id as the governance hub spells it.
pub fn chain_network_id(chain: &str) -> Option<&'static str> {
    match chain {
        "ethereum" => Some("1"),
        "optimism" => Some("10"),
        "bsc" => Some("56"),
        "polygon" => Some("137"),
        "base" => Some("8453"),
        "arbitrum" => Some("42161"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_matching_by_strategy_token() {
        let raw: RawSpace = serde_json::from_value(json!({
            "id": "uniswapgovernance.eth",
            "network": "1",
            "voting": {"quorum": 40000000.0},
            "strategies": [
                {"name": "erc20-votes", "network": "1", "params": {"address": "0x1F9840a85d5aF5bf1D1762F925BDADdC4201F984", "symbol": "UNI"}}
            ],
            "plugins": {"safeSnap": {}}
        }))
        .unwrap();
        let spaces = vec![summarize_space(raw)];
        assert!(spaces[0].executes_onchain);

        let found = find_space(&spaces, "1", "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984");
        assert_eq!(found.map(|s| s.id.as_str()), Some("uniswapgovernance.eth"));
        assert!(find_space(&spaces, "137", "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984").is_none());
    }

    #[test]
    fn test_turnout_records() {
        let proposals = vec![
            RawProposal { id: "a".into(), scores_total: Some(250.0), created: 1_700_000_000 },
            RawProposal { id: "b".into(), scores_total: None, created: 1_700_000_100 },
            RawProposal { id: "c".into(), scores_total: Some(5000.0), created: 1_700_000_200 },
        ];
        let records = turnout_records(&proposals, 1000.0);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].turnout_pct, 25.0);
        assert_eq!(records[1].turnout_pct, 100.0);
    }

    #[test]
    fn test_token_units() {
        let raw = U256::from(1_000u64) * U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(to_token_units(raw, 18), Some(1000.0));
        assert_eq!(chain_network_id("arbitrum"), Some("42161"));
        assert_eq!(chain_network_id("solana"), None);
    }
}
