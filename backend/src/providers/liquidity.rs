use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{instrument, warn};

use super::{format_address, get_json, http_client, LiquidityProvider, ProviderError};
use crate::config::ProviderEndpoints;
use crate::types::{LiquidityPool, LiquiditySnapshot};

/// DEX pool listing (DexScreener-shaped), optionally joined with centralized
/// exchange ticker volume to estimate the centralized venue share.
pub struct DexPoolsLiquidityProvider {
    client: reqwest::Client,
    pools_base_url: String,
    cex_base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PairsResponse {
    #[serde(default)]
    pub pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Pair {
    pub chain_id: String,
    pub dex_id: String,
    pub pair_address: String,
    #[serde(default)]
    pub liquidity: Option<PairLiquidity>,
    #[serde(default)]
    pub volume: Option<PairVolume>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PairLiquidity {
    #[serde(default)]
    pub usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PairVolume {
    #[serde(default)]
    pub h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TickersResponse {
    #[serde(default)]
    pub tickers: Vec<Ticker>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Ticker {
    #[serde(default)]
    pub converted_volume: Option<ConvertedVolume>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConvertedVolume {
    #[serde(default)]
    pub usd: Option<f64>,
}

impl DexPoolsLiquidityProvider {
    pub fn new(endpoints: &ProviderEndpoints) -> Self {
        Self {
            client: http_client(endpoints.http_timeout),
            pools_base_url: endpoints.dex_pools_base_url.trim_end_matches('/').to_string(),
            cex_base_url: endpoints
                .cex_tickers_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    async fn cex_volume(&self, chain: &str, token: &str) -> Option<f64> {
        let base = self.cex_base_url.as_ref()?;
        let url = format!("{}/coins/{}/contract/{}/tickers", base, chain, token);
        match get_json::<TickersResponse>(&self.client, &url).await {
            Ok(body) => Some(total_ticker_volume(&body)),
            Err(e) => {
                warn!("CEX ticker lookup for {} failed: {}", token, e);
                None
            }
        }
    }
}

#[async_trait]
impl LiquidityProvider for DexPoolsLiquidityProvider {
    fn name(&self) -> &str {
        "dex-pools"
    }

    #[instrument(skip(self), fields(address = %address))]
    async fn fetch_liquidity(&self, chain: &str, address: Address) -> Result<LiquiditySnapshot, ProviderError> {
        let token = format_address(address);
        let url = format!("{}/tokens/{}", self.pools_base_url, token);

        let (pairs, cex_volume) = tokio::join!(
            get_json::<PairsResponse>(&self.client, &url),
            self.cex_volume(chain, &token),
        );
        let pairs = pairs?.pairs.unwrap_or_default();

        let (pools, dex_volume) = normalize_pools(&pairs, chain);
        if pools.is_empty() {
            return Err(ProviderError::NotFound(format!("no pools for {} on {}", token, chain)));
        }

        Ok(LiquiditySnapshot {
            pools,
            centralized_venue_share_pct: cex_volume
                .map(|cex| centralized_share_pct(dex_volume, cex))
                .unwrap_or(0.0),
            source_name: self.name().to_string(),
            observed_at_block: 0,
            observed_at: Utc::now(),
        })
    }
}

/// Pools on `chain` with positive TVL, largest first, with each pool's share
/// of the summed TVL. Also returns the summed 24h DEX volume.
pub(crate) fn normalize_pools(pairs: &[Pair], chain: &str) -> (Vec<LiquidityPool>, f64) {
    let on_chain: Vec<&Pair> = pairs.iter().filter(|p| p.chain_id.eq_ignore_ascii_case(chain)).collect();

    let dex_volume: f64 = on_chain
        .iter()
        .filter_map(|p| p.volume.as_ref().and_then(|v| v.h24))
        .sum();

    let mut pools: Vec<LiquidityPool> = on_chain
        .iter()
        .filter_map(|p| {
            let tvl = p.liquidity.as_ref().and_then(|l| l.usd)?;
            (tvl > 0.0).then(|| LiquidityPool {
                venue: p.dex_id.clone(),
                pool_address: p.pair_address.clone(),
                tvl_usd: tvl,
                share_pct: 0.0,
            })
        })
        .collect();

    let total: f64 = pools.iter().map(|p| p.tvl_usd).sum();
    for pool in &mut pools {
        pool.share_pct = if total > 0.0 { pool.tvl_usd / total * 100.0 } else { 0.0 };
    }
    pools.sort_by(|a, b| b.tvl_usd.partial_cmp(&a.tvl_usd).unwrap_or(std::cmp::Ordering::Equal));
    (pools, dex_volume)
}

pub(crate) fn total_ticker_volume(body: &TickersResponse) -> f64 {
    body.tickers
        .iter()
        .filter_map(|t| t.converted_volume.as_ref().and_then(|v| v.usd))
        .filter(|v| v.is_finite() && *v > 0.0)
        .sum()
}

/// Centralized share of combined 24h volume, 0 when nothing traded.
pub(crate) fn centralized_share_pct(dex_volume: f64, cex_volume: f64) -> f64 {
    let total = dex_volume + cex_volume;
    if total <= 0.0 {
        return 0.0;
    }
    (cex_volume / total * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_pools_filters_chain_and_computes_shares() {
        let body: PairsResponse = serde_json::from_value(json!({
            "pairs": [
                {"chainId": "ethereum", "dexId": "uniswap", "pairAddress": "0xa", "liquidity": {"usd": 750000.0}, "volume": {"h24": 100.0}},
                {"chainId": "ethereum", "dexId": "sushiswap", "pairAddress": "0xb", "liquidity": {"usd": 250000.0}, "volume": {"h24": 50.0}},
                {"chainId": "bsc", "dexId": "pancakeswap", "pairAddress": "0xc", "liquidity": {"usd": 9000000.0}},
                {"chainId": "ethereum", "dexId": "curve", "pairAddress": "0xd"}
            ]
        }))
        .unwrap();

        let (pools, volume) = normalize_pools(body.pairs.as_deref().unwrap_or_default(), "ethereum");
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].venue, "uniswap");
        assert!((pools[0].share_pct - 75.0).abs() < 1e-9);
        assert!((pools[1].share_pct - 25.0).abs() < 1e-9);
        assert_eq!(volume, 150.0);
    }

    #[test]
    fn test_null_pairs_parse_as_empty() {
        let body: PairsResponse = serde_json::from_value(json!({"schemaVersion": "1.0.0", "pairs": null})).unwrap();
        assert!(body.pairs.is_none());
    }

    #[test]
    fn test_centralized_share() {
        assert_eq!(centralized_share_pct(0.0, 0.0), 0.0);
        assert_eq!(centralized_share_pct(300.0, 100.0), 25.0);
        assert_eq!(centralized_share_pct(0.0, 10.0), 100.0);

        let tickers: TickersResponse = serde_json::from_value(json!({
            "tickers": [
                {"converted_volume": {"usd": 60.0}},
                {"converted_volume": {"usd": 40.0}},
                {"market": {"name": "x"}}
            ]
        }))
        .unwrap();
        assert_eq!(total_ticker_volume(&tickers), 100.0);
    }
}
