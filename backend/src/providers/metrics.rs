//! Distribution metrics over holder (or validator) percentage shares.

use alloy::primitives::U256;
use chrono::{DateTime, Utc};

use crate::types::{ConsensusStatus, HolderShare, HoldersSnapshot};

/// Sum of squared percentage shares (0-10,000).
pub fn herfindahl_index(shares: &[f64]) -> f64 {
    shares.iter().map(|s| s * s).sum()
}

/// Gini coefficient over the nonzero shares, with the unbiased-sample
/// correction `n / (n - 1)`. A single holder yields 0.
pub fn gini_coefficient(shares: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = shares.iter().copied().filter(|s| *s > 0.0).collect();
    let n = sorted.len();
    if n < 2 {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let total: f64 = sorted.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, s)| (i as f64 + 1.0) * s)
        .sum();
    let n_f = n as f64;
    let g = (2.0 * weighted) / (n_f * total) - (n_f + 1.0) / n_f;
    (g * n_f / (n_f - 1.0)).clamp(0.0, 1.0)
}

/// Holder count at which the running share, measured before adding that
/// holder, already exceeds 50%. Capped at the sample size; a sample that
/// never crosses 50% returns its full size.
pub fn nakamoto_coefficient(shares: &[f64]) -> u32 {
    let sorted = sorted_desc(shares);
    let mut cumulative = 0.0;
    for (i, share) in sorted.iter().enumerate() {
        if cumulative > 50.0 {
            return (i + 1) as u32;
        }
        cumulative += share;
    }
    sorted.len() as u32
}

/// Cumulative share of the `n` largest entries.
pub fn top_n_share(shares: &[f64], n: usize) -> f64 {
    sorted_desc(shares).iter().take(n).sum()
}

fn sorted_desc(shares: &[f64]) -> Vec<f64> {
    let mut sorted = shares.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// Percentage of `total` held by `balance`, computed in parts-per-million on
/// the raw integers before converting to float.
pub fn share_pct(balance: U256, total: U256) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    let million = U256::from(1_000_000u64);
    let ppm = match balance.checked_mul(million) {
        Some(scaled) => scaled / total,
        None => balance / (total / million).max(U256::from(1u64)),
    };
    let ppm = u64::try_from(ppm).unwrap_or(u64::MAX);
    ppm as f64 / 10_000.0
}

/// Total supply minus the top-10 share, in integer basis points on the raw
/// supply so very large supplies do not lose precision.
pub fn free_float(total_supply: U256, top10_pct: f64) -> U256 {
    let bps = (top10_pct * 100.0).round().clamp(0.0, 10_000.0) as u64;
    let bps = U256::from(bps);
    let denom = U256::from(10_000u64);
    let locked = (total_supply / denom) * bps + (total_supply % denom) * bps / denom;
    total_supply.saturating_sub(locked)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Build a single-source snapshot from a ranked holder sample.
pub fn build_snapshot(
    source_name: &str,
    total_supply: U256,
    mut holders: Vec<HolderShare>,
    observed_at: DateTime<Utc>,
) -> HoldersSnapshot {
    holders.retain(|h| h.pct > 0.0);
    holders.sort_by(|a, b| b.pct.partial_cmp(&a.pct).unwrap_or(std::cmp::Ordering::Equal));

    let shares: Vec<f64> = holders.iter().map(|h| h.pct).collect();
    let top10_pct = round_to(top_n_share(&shares, 10), 4);
    let contract_share: f64 = holders.iter().filter(|h| h.is_contract).map(|h| h.pct).sum();
    let eoa_share: f64 = holders.iter().filter(|h| !h.is_contract).map(|h| h.pct).sum();
    let coverage: f64 = shares.iter().sum::<f64>().min(100.0);

    HoldersSnapshot {
        total_supply,
        free_float: free_float(total_supply, top10_pct),
        top1_pct: round_to(top_n_share(&shares, 1), 4),
        top3_pct: round_to(top_n_share(&shares, 3), 4),
        top10_pct,
        herfindahl_index: round_to(herfindahl_index(&shares), 4),
        gini_coefficient: round_to(gini_coefficient(&shares), 6),
        nakamoto_coefficient: nakamoto_coefficient(&shares),
        contract_share_pct: round_to(contract_share, 4),
        eoa_share_pct: round_to(eoa_share, 4),
        coverage_pct: round_to(coverage, 4),
        sample_size: holders.len() as u32,
        source_name: source_name.to_string(),
        contributing_sources: vec![source_name.to_string()],
        consensus_status: ConsensusStatus::SingleSource,
        top_holders: holders,
        observed_at_block: 0,
        observed_at,
    }
}
