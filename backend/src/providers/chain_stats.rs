use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::instrument;

use super::metrics::{nakamoto_coefficient, round_to, top_n_share};
use super::{get_json, http_client, ChainStatsProvider, ProviderError};
use crate::types::ChainStats;

const TOP_VALIDATORS: usize = 10;

/// Validator-set concentration from a stake listing service.
pub struct ValidatorStatsProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValidatorsResponse {
    #[serde(default)]
    pub validators: Vec<ValidatorEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValidatorEntry {
    pub stake: f64,
}

impl ValidatorStatsProvider {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChainStatsProvider for ValidatorStatsProvider {
    fn name(&self) -> &str {
        "validator-stats"
    }

    #[instrument(skip(self))]
    async fn fetch_chain_stats(&self, chain: &str) -> Result<ChainStats, ProviderError> {
        let url = format!("{}/chains/{}/validators", self.base_url, chain);
        let body: ValidatorsResponse = get_json(&self.client, &url).await?;
        normalize_validators(chain, &body)
    }
}

pub(crate) fn normalize_validators(chain: &str, body: &ValidatorsResponse) -> Result<ChainStats, ProviderError> {
    let stakes: Vec<f64> = body
        .validators
        .iter()
        .map(|v| v.stake)
        .filter(|s| s.is_finite() && *s > 0.0)
        .collect();
    let total: f64 = stakes.iter().sum();
    if stakes.is_empty() || total <= 0.0 {
        return Err(ProviderError::NotFound(format!("no validator stake for {}", chain)));
    }

    let shares: Vec<f64> = stakes.iter().map(|s| s / total * 100.0).collect();
    Ok(ChainStats {
        chain: chain.to_string(),
        validator_count: Some(stakes.len() as u32),
        top_validators_share_pct: Some(round_to(top_n_share(&shares, TOP_VALIDATORS), 4)),
        nakamoto_coefficient: Some(nakamoto_coefficient(&shares)),
        observed_at_block: 0,
        observed_at: Utc::now(),
    })
}
