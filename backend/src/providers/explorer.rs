use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use super::{format_address, get_json, http_client, ProviderError};
use crate::config::ProviderEndpoints;
use crate::introspection::SourceVerifier;

/// Published-source check through the explorer `getsourcecode` action.
pub struct ExplorerSourceVerifier {
    client: reqwest::Client,
    api_bases: HashMap<String, String>,
    api_key: Option<String>,
}

impl ExplorerSourceVerifier {
    pub fn new(endpoints: &ProviderEndpoints) -> Self {
        Self {
            client: http_client(endpoints.http_timeout),
            api_bases: endpoints.explorer_apis.clone(),
            api_key: endpoints.explorer_api_key.clone(),
        }
    }
}

#[async_trait]
impl SourceVerifier for ExplorerSourceVerifier {
    async fn is_verified(&self, chain: &str, address: Address) -> Result<bool, ProviderError> {
        let base = self
            .api_bases
            .get(chain)
            .ok_or_else(|| ProviderError::UnsupportedChain(chain.to_string()))?;

        let mut url = format!(
            "{}?module=contract&action=getsourcecode&address={}",
            base,
            format_address(address)
        );
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&apikey={}", key));
        }

        let response: Value = get_json(&self.client, &url).await?;
        let verified = source_is_published(&response)?;
        debug!("Source for {} on {} verified: {}", address, chain, verified);
        Ok(verified)
    }
}

pub(crate) fn source_is_published(response: &Value) -> Result<bool, ProviderError> {
    let entries = response
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("getsourcecode result is not an array".to_string()))?;

    Ok(entries
        .first()
        .and_then(|entry| entry.get("SourceCode"))
        .and_then(|s| s.as_str())
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false))
}
