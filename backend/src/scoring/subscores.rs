//! One pure function per category, each mapping optional evidence to 0-100.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::introspection::DEFAULT_ADMIN_ROLE;
use crate::providers::metrics::{herfindahl_index, round_to};
use crate::types::{AuditSnapshot, ChainStats, ContractIntrospection, GovernanceSnapshot, HoldersSnapshot, LiquiditySnapshot};

pub const OWNERSHIP_DEFAULT: f64 = 40.0;
pub const CONTROL_RISK_DEFAULT: f64 = 45.0;
pub const LIQUIDITY_DEFAULT: f64 = 45.0;
pub const GOVERNANCE_DEFAULT: f64 = 40.0;
pub const CHAIN_LEVEL_DEFAULT: f64 = 55.0;
pub const CODE_ASSURANCE_DEFAULT: f64 = 45.0;

const NAKAMOTO_TARGET: f64 = 10.0;
const QUORUM_TARGET_PCT: f64 = 10.0;
const TURNOUT_TARGET_PCT: f64 = 50.0;
const UNKNOWN_QUORUM_BASELINE: f64 = 40.0;
const RECENT_AUDIT_DAYS: i64 = 730;

fn finish(score: f64) -> f64 {
    round_to(score.clamp(0.0, 100.0), 2)
}

fn inverted_pct(pct: f64) -> f64 {
    100.0 - pct.clamp(0.0, 100.0)
}

fn inverted_hhi(hhi: f64) -> f64 {
    100.0 * (1.0 - (hhi / 10_000.0).clamp(0.0, 1.0))
}

pub fn ownership_score(holders: Option<&HoldersSnapshot>) -> f64 {
    let Some(h) = holders else {
        return OWNERSHIP_DEFAULT;
    };

    let nakamoto = (h.nakamoto_coefficient as f64 / NAKAMOTO_TARGET).min(1.0) * 100.0;
    let inverted_gini = (1.0 - h.gini_coefficient.clamp(0.0, 1.0)) * 100.0;

    finish(
        0.20 * inverted_pct(h.top10_pct)
            + 0.15 * inverted_hhi(h.herfindahl_index)
            + 0.15 * nakamoto
            + 0.15 * inverted_gini
            + 0.10 * inverted_pct(h.top1_pct)
            + 0.10 * inverted_pct(h.top3_pct)
            + 0.10 * inverted_pct(h.contract_share_pct)
            + 0.05 * h.coverage_pct.clamp(0.0, 100.0),
    )
}

/// Base points reward a single immutable code path (30) less than an
/// upgradeable one (60). Admin, timelock and pause adjustments follow.
pub fn control_risk_score(contract: Option<&ContractIntrospection>) -> f64 {
    let Some(c) = contract else {
        return CONTROL_RISK_DEFAULT;
    };

    let mut score = if c.upgradeable { 60.0 } else { 30.0 };

    let admins: HashSet<_> = c
        .roles
        .iter()
        .filter(|r| r.role_name == DEFAULT_ADMIN_ROLE)
        .map(|r| r.holder_address)
        .collect();
    score += match admins.len() {
        n if n >= 2 => 20.0,
        1 => -15.0,
        _ if c.admin_address.is_some() || c.owner_address.is_some() => -15.0,
        _ => 10.0,
    };

    if let Some(delay_secs) = c.timelock {
        let days = delay_secs as f64 / 86_400.0;
        score += 5.0 + 20.0 * (days / 30.0).min(1.0);
    }

    if c.pausable {
        score -= if c.timelock.is_some() { 5.0 } else { 15.0 };
    }

    finish(score)
}

pub fn liquidity_score(liquidity: Option<&LiquiditySnapshot>) -> f64 {
    let Some(l) = liquidity else {
        return LIQUIDITY_DEFAULT;
    };

    let shares: Vec<f64> = l.pools.iter().map(|p| p.share_pct).collect();
    let (max_share, hhi) = if shares.is_empty() {
        (100.0, 10_000.0)
    } else {
        (shares.iter().cloned().fold(0.0, f64::max), herfindahl_index(&shares))
    };

    let dex_share = inverted_pct(l.centralized_venue_share_pct);
    let venue = 50.0 + dex_share / 2.0;

    finish(0.40 * inverted_pct(max_share) + 0.35 * venue + 0.25 * inverted_hhi(hhi))
}

pub fn governance_score(governance: Option<&GovernanceSnapshot>) -> f64 {
    let Some(g) = governance else {
        return GOVERNANCE_DEFAULT;
    };

    let quorum = g
        .quorum_pct
        .map(|q| (q / QUORUM_TARGET_PCT).clamp(0.0, 1.0) * 100.0)
        .unwrap_or(UNKNOWN_QUORUM_BASELINE);

    let mut score = if g.turnout_history.is_empty() {
        quorum
    } else {
        let average = g.turnout_history.iter().map(|t| t.turnout_pct).sum::<f64>() / g.turnout_history.len() as f64;
        let turnout = (average / TURNOUT_TARGET_PCT).clamp(0.0, 1.0) * 100.0;
        0.6 * quorum + 0.4 * turnout
    };

    if g.framework.map(|f| f.executes_onchain()).unwrap_or(false) {
        score += 5.0;
    }

    finish(score)
}

pub fn chain_level_score(stats: Option<&ChainStats>) -> f64 {
    match stats.and_then(|s| s.nakamoto_coefficient) {
        None => CHAIN_LEVEL_DEFAULT,
        Some(n) if n >= 20 => 100.0,
        Some(n) if n >= 10 => 80.0,
        Some(n) if n >= 5 => 60.0,
        Some(n) if n >= 2 => 40.0,
        Some(_) => 20.0,
    }
}

pub fn code_assurance_score(
    contract: Option<&ContractIntrospection>,
    audits: Option<&AuditSnapshot>,
    now: DateTime<Utc>,
) -> f64 {
    if contract.is_none() && audits.is_none() {
        return CODE_ASSURANCE_DEFAULT;
    }

    let mut score = if contract.map(|c| c.verified).unwrap_or(false) { 50.0 } else { 20.0 };

    if let Some(a) = audits {
        let recent_cutoff = now - Duration::days(RECENT_AUDIT_DAYS);
        let bonus: f64 = a
            .audits
            .iter()
            .map(|audit| if audit.date >= recent_cutoff { 15.0 } else { 10.0 })
            .sum();
        score += bonus.min(30.0);

        if a.distinct_firms() >= 2 {
            score += 5.0;
        }
    }

    finish(score)
}
