//! Evidence providers: each adapts one external source to one evidence shape.

pub mod audits;
pub mod cache;
pub mod chain_stats;
pub mod explorer;
pub mod governance;
pub mod holders;
pub mod liquidity;
pub mod metrics;

pub use audits::AuditRegistryProvider;
pub use cache::TtlCache;
pub use chain_stats::ValidatorStatsProvider;
pub use explorer::ExplorerSourceVerifier;
pub use governance::SnapshotGovernanceProvider;
pub use holders::{ExplorerHoldersProvider, IndexerHoldersProvider};
pub use liquidity::DexPoolsLiquidityProvider;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use thiserror::Error;
use tracing::warn;

use crate::chain::ChainError;
use crate::types::{AuditSnapshot, ChainStats, GovernanceSnapshot, HoldersSnapshot, LiquiditySnapshot};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid response from source: {0}")]
    InvalidResponse(String),
    #[error("No data for asset: {0}")]
    NotFound(String),
    #[error("Chain access failed: {0}")]
    Chain(#[from] ChainError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one provider call. Failures never escape as errors past this point.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome<T> {
    Ok(T),
    /// The source had nothing for this asset, or no source is configured.
    Absent,
    Failed(String),
}

impl<T> ProviderOutcome<T> {
    pub fn from_result(source: &str, result: Result<T, ProviderError>) -> Self {
        match result {
            Ok(evidence) => ProviderOutcome::Ok(evidence),
            Err(ProviderError::NotFound(what)) => {
                tracing::debug!("{} has no data: {}", source, what);
                ProviderOutcome::Absent
            }
            Err(e) => {
                warn!("Provider {} failed: {}", source, e);
                ProviderOutcome::Failed(format!("{}: {}", source, e))
            }
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            ProviderOutcome::Ok(evidence) => Some(evidence),
            _ => None,
        }
    }

}

/// Run one provider call behind its own fault boundary. A panic inside the
/// provider is contained to this outcome as well.
pub async fn fetch_isolated<T, F>(source: String, fut: F) -> ProviderOutcome<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, ProviderError>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => ProviderOutcome::from_result(&source, result),
        Err(join_error) => {
            warn!("Provider {} aborted: {}", source, join_error);
            ProviderOutcome::Failed(format!("{}: task aborted", source))
        }
    }
}

#[async_trait]
pub trait HoldersProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_holders(&self, chain: &str, address: Address) -> Result<HoldersSnapshot, ProviderError>;
}

#[async_trait]
pub trait LiquidityProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_liquidity(&self, chain: &str, address: Address) -> Result<LiquiditySnapshot, ProviderError>;
}

#[async_trait]
pub trait GovernanceProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_governance(&self, chain: &str, address: Address) -> Result<GovernanceSnapshot, ProviderError>;
}

#[async_trait]
pub trait ChainStatsProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_chain_stats(&self, chain: &str) -> Result<ChainStats, ProviderError>;
}

#[async_trait]
pub trait AuditProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_audits(&self, chain: &str, address: Address) -> Result<AuditSnapshot, ProviderError>;
}

pub(crate) fn http_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent("decentrascore/0.1")
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub(crate) async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T, ProviderError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(ProviderError::InvalidResponse(format!("HTTP {} from {}", status, url)));
    }
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

pub(crate) fn format_address(address: Address) -> String {
    format!("{:#x}", address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_result() {
        let ok: ProviderOutcome<u32> = ProviderOutcome::from_result("a", Ok(7));
        assert_eq!(ok, ProviderOutcome::Ok(7));

        let absent: ProviderOutcome<u32> =
            ProviderOutcome::from_result("a", Err(ProviderError::NotFound("x".into())));
        assert_eq!(absent, ProviderOutcome::Absent);

        let failed: ProviderOutcome<u32> =
            ProviderOutcome::from_result("a", Err(ProviderError::UnsupportedChain("tron".into())));
        assert!(matches!(failed, ProviderOutcome::Failed(reason) if reason.contains("tron")));
    }

    #[tokio::test]
    async fn test_fetch_isolated_contains_panics() {
        let outcome: ProviderOutcome<u32> = fetch_isolated("panicky".to_string(), async {
            if true {
                panic!("boom");
            }
            Ok(1)
        })
        .await;
        assert!(matches!(outcome, ProviderOutcome::Failed(_)));
    }
}
