use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use super::{AuditProvider, ProviderError};
use crate::types::{AuditReport, AuditSnapshot};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryEntry {
    chain: String,
    address: String,
    firm: String,
    date: DateTime<Utc>,
    #[serde(default)]
    report_url: Option<String>,
}

/// Curated audit list loaded once from a JSON file of
/// `[{chain, address, firm, date, reportUrl}]`.
pub struct AuditRegistryProvider {
    entries: HashMap<(String, Address), Vec<AuditReport>>,
    loaded_at: DateTime<Utc>,
}

impl AuditRegistryProvider {
    pub async fn from_path(path: &Path) -> Result<Self, ProviderError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let provider = Self::from_json(&raw)?;
        info!("📋 Loaded audit registry from {} ({} assets)", path.display(), provider.entries.len());
        Ok(provider)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProviderError> {
        let rows: Vec<RegistryEntry> = serde_json::from_str(raw)?;
        let mut entries: HashMap<(String, Address), Vec<AuditReport>> = HashMap::new();
        for row in rows {
            let Ok(address) = Address::from_str(&row.address) else {
                warn!("Skipping audit registry row with bad address {:?}", row.address);
                continue;
            };
            entries
                .entry((row.chain.to_lowercase(), address))
                .or_default()
                .push(AuditReport {
                    firm: row.firm,
                    date: row.date,
                    report_url: row.report_url,
                });
        }
        for audits in entries.values_mut() {
            audits.sort_by(|a, b| b.date.cmp(&a.date));
        }
        Ok(Self {
            entries,
            loaded_at: Utc::now(),
        })
    }
}

#[async_trait]
impl AuditProvider for AuditRegistryProvider {
    fn name(&self) -> &str {
        "audit-registry"
    }

    async fn fetch_audits(&self, chain: &str, address: Address) -> Result<AuditSnapshot, ProviderError> {
        let audits = self
            .entries
            .get(&(chain.to_lowercase(), address))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("no audits registered for {}", address)))?;
        Ok(AuditSnapshot {
            audits,
            observed_at: self.loaded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[tokio::test]
    async fn test_registry_lookup() {
        let provider = AuditRegistryProvider::from_json(
            r#"[
                {"chain": "ethereum", "address": "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984", "firm": "Trail of Bits", "date": "2021-03-01T00:00:00Z"},
                {"chain": "Ethereum", "address": "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984", "firm": "ABDK", "date": "2023-06-01T00:00:00Z", "reportUrl": "https://example.org/r.pdf"},
                {"chain": "ethereum", "address": "garbage", "firm": "X", "date": "2023-06-01T00:00:00Z"}
            ]"#,
        )
        .unwrap();

        let uni = address!("1f9840a85d5af5bf1d1762f925bdaddc4201f984");
        let snapshot = provider.fetch_audits("ethereum", uni).await.unwrap();
        assert_eq!(snapshot.audits.len(), 2);
        assert_eq!(snapshot.audits[0].firm, "ABDK");

        let missing = provider.fetch_audits("polygon", uni).await;
        assert!(matches!(missing, Err(ProviderError::NotFound(_))));
    }
}
