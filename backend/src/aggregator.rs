use alloy::primitives::Address;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::providers::metrics::{free_float, round_to};
use crate::providers::{fetch_isolated, HoldersProvider, ProviderOutcome};
use crate::types::{ConsensusStatus, HoldersSnapshot};

pub const CONSENSUS_SOURCE_NAME: &str = "consensus";

/// Population variance ceiling on `top10_pct` across sources (percentage points squared).
pub const TOP10_VARIANCE_THRESHOLD: f64 = 5.0;
/// Population variance ceiling on HHI across sources, measured on HHI / 100.
pub const HHI_VARIANCE_THRESHOLD: f64 = 100.0;

/// Fans out to every registered holder source and reconciles what comes back.
pub struct HoldersAggregator {
    providers: Vec<Arc<dyn HoldersProvider>>,
}

impl HoldersAggregator {
    pub fn new(providers: Vec<Arc<dyn HoldersProvider>>) -> Self {
        Self { providers }
    }

    /// Query all sources concurrently; each result is isolated from the others.
    pub async fn collect(&self, chain: &str, address: Address) -> Vec<ProviderOutcome<HoldersSnapshot>> {
        let fetches = self.providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            let chain = chain.to_string();
            fetch_isolated(provider.name().to_string(), async move {
                provider.fetch_holders(&chain, address).await
            })
        });
        join_all(fetches).await
    }

    #[instrument(skip(self), fields(address = %address))]
    pub async fn fetch_consensus(&self, chain: &str, address: Address) -> ProviderOutcome<HoldersSnapshot> {
        if self.providers.is_empty() {
            return ProviderOutcome::Absent;
        }

        let outcomes = self.collect(chain, address).await;
        let failures: Vec<String> = outcomes
            .iter()
            .filter_map(|o| match o {
                ProviderOutcome::Failed(reason) => Some(reason.clone()),
                _ => None,
            })
            .collect();
        let snapshots: Vec<HoldersSnapshot> = outcomes.into_iter().filter_map(ProviderOutcome::ok).collect();

        match aggregate_holders(snapshots) {
            Some(snapshot) => {
                info!(
                    "Holder evidence for {} from {} source(s): {}",
                    address,
                    snapshot.contributing_sources.len(),
                    snapshot.consensus_status
                );
                ProviderOutcome::Ok(snapshot)
            }
            None if failures.is_empty() => ProviderOutcome::Absent,
            None => {
                warn!("All holder sources failed for {}", address);
                ProviderOutcome::Failed(failures.join("; "))
            }
        }
    }
}

/// Merge same-type holder snapshots into one consensus snapshot.
///
/// A single snapshot passes through untouched. With two or more, the highest
/// coverage snapshot supplies the holder list, scalar metrics become
/// coverage-weighted averages, the Nakamoto coefficient takes the maximum and
/// the sources are checked for agreement on top-10 share and HHI.
pub fn aggregate_holders(mut snapshots: Vec<HoldersSnapshot>) -> Option<HoldersSnapshot> {
    match snapshots.len() {
        0 => return None,
        1 => {
            let mut only = snapshots.pop()?;
            only.consensus_status = ConsensusStatus::SingleSource;
            return Some(only);
        }
        _ => {}
    }

    let total_coverage: f64 = snapshots.iter().map(|s| s.coverage_pct.max(0.0)).sum();
    let weights: Vec<f64> = if total_coverage > 0.0 {
        snapshots.iter().map(|s| s.coverage_pct.max(0.0) / total_coverage).collect()
    } else {
        vec![1.0 / snapshots.len() as f64; snapshots.len()]
    };
    let weighted = |metric: fn(&HoldersSnapshot) -> f64| -> f64 {
        snapshots.iter().zip(&weights).map(|(s, w)| metric(s) * w).sum()
    };

    let top10_pct = round_to(weighted(|s| s.top10_pct), 4);
    let herfindahl_index = round_to(weighted(|s| s.herfindahl_index), 4);
    let gini_coefficient = round_to(weighted(|s| s.gini_coefficient), 6);
    let top1_pct = round_to(weighted(|s| s.top1_pct), 4);
    let top3_pct = round_to(weighted(|s| s.top3_pct), 4);
    let contract_share_pct = round_to(weighted(|s| s.contract_share_pct), 4);
    let eoa_share_pct = round_to(weighted(|s| s.eoa_share_pct), 4);

    let nakamoto_coefficient = snapshots.iter().map(|s| s.nakamoto_coefficient).max().unwrap_or(0);
    let sample_size =
        (snapshots.iter().map(|s| s.sample_size as f64).sum::<f64>() / snapshots.len() as f64).round() as u32;

    let top10_values: Vec<f64> = snapshots.iter().map(|s| s.top10_pct).collect();
    let hhi_values: Vec<f64> = snapshots.iter().map(|s| s.herfindahl_index / 100.0).collect();
    let agree = population_variance(&top10_values) < TOP10_VARIANCE_THRESHOLD
        && population_variance(&hhi_values) < HHI_VARIANCE_THRESHOLD;
    let consensus_status = if agree {
        ConsensusStatus::Agree(snapshots.len())
    } else {
        ConsensusStatus::Conflict
    };

    let contributing_sources: Vec<String> = snapshots.iter().map(|s| s.source_name.clone()).collect();
    let observed_at_block = snapshots.iter().map(|s| s.observed_at_block).max().unwrap_or(0);
    let observed_at = snapshots.iter().map(|s| s.observed_at).max()?;

    let template_index = snapshots
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.coverage_pct
                .partial_cmp(&b.coverage_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)?;
    let template = snapshots.swap_remove(template_index);

    Some(HoldersSnapshot {
        free_float: free_float(template.total_supply, top10_pct),
        total_supply: template.total_supply,
        top_holders: template.top_holders,
        top1_pct,
        top3_pct,
        top10_pct,
        herfindahl_index,
        gini_coefficient,
        nakamoto_coefficient,
        contract_share_pct,
        eoa_share_pct,
        coverage_pct: template.coverage_pct,
        sample_size,
        source_name: CONSENSUS_SOURCE_NAME.to_string(),
        contributing_sources,
        consensus_status,
        observed_at_block,
        observed_at,
    })
}

pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
