use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::metrics::{build_snapshot, share_pct};
use super::{format_address, get_json, http_client, HoldersProvider, ProviderError};
use crate::chain::ChainReader;
use crate::config::ProviderEndpoints;
use crate::types::{HolderShare, HoldersSnapshot};

/// Etherscan-family `tokenholderlist` plus `tokensupply`.
pub struct ExplorerHoldersProvider {
    client: reqwest::Client,
    api_bases: HashMap<String, String>,
    api_key: Option<String>,
    chain_reader: Option<Arc<dyn ChainReader>>,
    page_size: u32,
    classify_top: usize,
}

impl ExplorerHoldersProvider {
    pub fn new(endpoints: &ProviderEndpoints) -> Self {
        Self {
            client: http_client(endpoints.http_timeout),
            api_bases: endpoints.explorer_apis.clone(),
            api_key: endpoints.explorer_api_key.clone(),
            chain_reader: None,
            page_size: 100,
            classify_top: 25,
        }
    }

    /// Classify the largest holders as contract or EOA through bytecode reads.
    pub fn with_chain_reader(mut self, reader: Arc<dyn ChainReader>) -> Self {
        self.chain_reader = Some(reader);
        self
    }

    fn api_base(&self, chain: &str) -> Result<&str, ProviderError> {
        self.api_bases
            .get(chain)
            .map(String::as_str)
            .ok_or_else(|| ProviderError::UnsupportedChain(chain.to_string()))
    }

    fn with_key(&self, mut url: String) -> String {
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&apikey={}", key));
        }
        url
    }

    async fn classify(&self, chain: &str, holders: &mut [HolderShare]) {
        let Some(reader) = &self.chain_reader else {
            return;
        };
        let limit = self.classify_top.min(holders.len());
        let checks = holders[..limit].iter().map(|h| reader.code_at(chain, h.address));
        let results = join_all(checks).await;
        for (holder, code) in holders.iter_mut().zip(results) {
            // unreadable bytecode is treated as an EOA
            holder.is_contract = code.map(|c| !c.is_empty()).unwrap_or(false);
        }
    }
}

#[async_trait]
impl HoldersProvider for ExplorerHoldersProvider {
    fn name(&self) -> &str {
        "explorer"
    }

    #[instrument(skip(self), fields(address = %address))]
    async fn fetch_holders(&self, chain: &str, address: Address) -> Result<HoldersSnapshot, ProviderError> {
        let base = self.api_base(chain)?;
        let token = format_address(address);

        let supply_url = self.with_key(format!(
            "{}?module=stats&action=tokensupply&contractaddress={}",
            base, token
        ));
        let holders_url = self.with_key(format!(
            "{}?module=token&action=tokenholderlist&contractaddress={}&page=1&offset={}",
            base, token, self.page_size
        ));

        let (supply, holders) = tokio::join!(
            get_json::<Value>(&self.client, &supply_url),
            get_json::<Value>(&self.client, &holders_url),
        );
        let total_supply = parse_explorer_supply(&supply?)?;
        let balances = parse_explorer_holders(&holders?)?;
        if balances.is_empty() {
            return Err(ProviderError::NotFound(format!("no holders for {} on {}", token, chain)));
        }

        let mut shares: Vec<HolderShare> = balances
            .into_iter()
            .map(|(holder, balance)| HolderShare {
                address: holder,
                pct: share_pct(balance, total_supply),
                is_contract: false,
            })
            .collect();
        shares.sort_by(|a, b| b.pct.partial_cmp(&a.pct).unwrap_or(std::cmp::Ordering::Equal));
        self.classify(chain, &mut shares).await;

        debug!("Explorer returned {} holders for {}", shares.len(), token);
        Ok(build_snapshot(self.name(), total_supply, shares, Utc::now()))
    }
}

fn explorer_result(response: &Value) -> Result<&Value, ProviderError> {
    let status = response.get("status").and_then(|s| s.as_str()).unwrap_or("0");
    let result = response
        .get("result")
        .ok_or_else(|| ProviderError::InvalidResponse("missing result".to_string()))?;
    if status != "1" {
        let message = result.as_str().unwrap_or("unknown error");
        if message.to_lowercase().contains("no ") {
            return Err(ProviderError::NotFound(message.to_string()));
        }
        return Err(ProviderError::InvalidResponse(message.to_string()));
    }
    Ok(result)
}

pub(crate) fn parse_explorer_supply(response: &Value) -> Result<U256, ProviderError> {
    let raw = explorer_result(response)?
        .as_str()
        .ok_or_else(|| ProviderError::InvalidResponse("token supply is not a string".to_string()))?;
    parse_decimal(raw)
}

pub(crate) fn parse_explorer_holders(response: &Value) -> Result<Vec<(Address, U256)>, ProviderError> {
    let rows = explorer_result(response)?
        .as_array()
        .ok_or_else(|| ProviderError::InvalidResponse("holder list is not an array".to_string()))?;

    let mut holders = Vec::with_capacity(rows.len());
    for row in rows {
        let address = row
            .get("TokenHolderAddress")
            .and_then(|a| a.as_str())
            .and_then(|a| Address::from_str(a).ok());
        let balance = row
            .get("TokenHolderQuantity")
            .and_then(|q| q.as_str())
            .and_then(|q| parse_decimal(q).ok());
        if let (Some(address), Some(balance)) = (address, balance) {
            holders.push((address, balance));
        }
    }
    Ok(holders)
}

fn parse_decimal(raw: &str) -> Result<U256, ProviderError> {
    U256::from_str_radix(raw.trim(), 10)
        .map_err(|e| ProviderError::InvalidResponse(format!("bad integer {:?}: {}", raw, e)))
}

/// Holder-indexer REST source returning raw balances with a contract flag.
pub struct IndexerHoldersProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexerHoldersResponse {
    pub total_supply: String,
    #[serde(default)]
    pub holders: Vec<IndexerHolder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexerHolder {
    pub address: String,
    pub balance: String,
    #[serde(default)]
    pub is_contract: bool,
}

impl IndexerHoldersProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: std::time::Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            limit: 100,
        }
    }
}

#[async_trait]
impl HoldersProvider for IndexerHoldersProvider {
    fn name(&self) -> &str {
        "indexer"
    }

    #[instrument(skip(self), fields(address = %address))]
    async fn fetch_holders(&self, chain: &str, address: Address) -> Result<HoldersSnapshot, ProviderError> {
        let url = format!(
            "{}/v1/{}/tokens/{}/holders?limit={}",
            self.base_url,
            chain,
            format_address(address),
            self.limit
        );
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(url));
        }
        if !response.status().is_success() {
            return Err(ProviderError::InvalidResponse(format!("HTTP {} from indexer", response.status())));
        }
        let body: IndexerHoldersResponse = serde_json::from_str(&response.text().await?)?;
        normalize_indexer(self.name(), body)
    }
}

pub(crate) fn normalize_indexer(source: &str, body: IndexerHoldersResponse) -> Result<HoldersSnapshot, ProviderError> {
    let total_supply = parse_decimal(&body.total_supply)?;
    let holders: Vec<HolderShare> = body
        .holders
        .into_iter()
        .filter_map(|h| {
            let address = Address::from_str(&h.address).ok()?;
            let balance = parse_decimal(&h.balance).ok()?;
            Some(HolderShare {
                address,
                pct: share_pct(balance, total_supply),
                is_contract: h.is_contract,
            })
        })
        .collect();
    if holders.is_empty() {
        return Err(ProviderError::NotFound(format!("{} returned no holders", source)));
    }
    Ok(build_snapshot(source, total_supply, holders, Utc::now()))
}
