//! Per-category confidence in [0.2, 1.0] from evidence completeness and age.

use chrono::{DateTime, Utc};

use crate::providers::metrics::round_to;
use crate::types::{
    AuditSnapshot, ChainStats, ConsensusStatus, ContractIntrospection, GovernanceSnapshot, HoldersSnapshot,
    LiquiditySnapshot,
};

pub const CONFIDENCE_FLOOR: f64 = 0.2;
pub const CONFIDENCE_CEILING: f64 = 1.0;

/// Shared adjustment by evidence age.
pub fn recency_adjustment(observed_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_days = (now - observed_at).num_seconds().max(0) as f64 / 86_400.0;
    match age_days {
        d if d <= 3.0 => 0.25,
        d if d <= 7.0 => 0.18,
        d if d <= 30.0 => 0.08,
        d if d <= 90.0 => 0.0,
        d if d <= 180.0 => -0.05,
        _ => -0.10,
    }
}

fn finish(base: f64, observed_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    round_to(
        (base + recency_adjustment(observed_at, now)).clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING),
        4,
    )
}

pub fn ownership_confidence(holders: Option<&HoldersSnapshot>, now: DateTime<Utc>) -> f64 {
    let Some(h) = holders else {
        return CONFIDENCE_FLOOR;
    };

    let mut value = 0.35;
    value += match h.coverage_pct {
        c if c >= 85.0 => 0.25,
        c if c >= 40.0 => 0.15,
        _ => 0.05,
    };
    value += match h.sample_size {
        n if n >= 100 => 0.10,
        n if n >= 25 => 0.05,
        _ => 0.0,
    };
    value += match h.consensus_status {
        ConsensusStatus::Agree(_) => 0.10,
        ConsensusStatus::Conflict => -0.05,
        ConsensusStatus::SingleSource => 0.0,
    };
    finish(value, h.observed_at, now)
}

pub fn control_risk_confidence(contract: Option<&ContractIntrospection>, now: DateTime<Utc>) -> f64 {
    let Some(c) = contract else {
        return CONFIDENCE_FLOOR;
    };

    let mut value = 0.5;
    if c.verified {
        value += 0.10;
    }
    if !c.roles.is_empty() {
        value += 0.10;
    }
    if c.owner_address.is_some() || c.admin_address.is_some() {
        value += 0.05;
    }
    finish(value, c.observed_at, now)
}

pub fn liquidity_confidence(liquidity: Option<&LiquiditySnapshot>, now: DateTime<Utc>) -> f64 {
    let Some(l) = liquidity else {
        return CONFIDENCE_FLOOR;
    };

    let mut value = 0.4;
    value += match l.pools.len() {
        n if n >= 5 => 0.20,
        n if n >= 1 => 0.10,
        _ => 0.0,
    };
    if l.total_tvl_usd() > 1_000_000.0 {
        value += 0.10;
    }
    finish(value, l.observed_at, now)
}

pub fn governance_confidence(governance: Option<&GovernanceSnapshot>, now: DateTime<Utc>) -> f64 {
    let Some(g) = governance else {
        return CONFIDENCE_FLOOR;
    };

    let mut value = 0.3;
    if g.quorum_pct.is_some() {
        value += 0.10;
    }
    if g.framework.is_some() {
        value += 0.05;
    }
    value += match g.turnout_history.len() {
        n if n >= 25 => 0.25,
        n if n >= 3 => 0.12,
        _ => 0.0,
    };
    finish(value, g.observed_at, now)
}

pub fn chain_level_confidence(stats: Option<&ChainStats>, now: DateTime<Utc>) -> f64 {
    let Some(s) = stats else {
        return CONFIDENCE_FLOOR;
    };

    let mut value = 0.45;
    if s.nakamoto_coefficient.is_some() {
        value += 0.20;
    }
    if s.validator_count.is_some() {
        value += 0.10;
    }
    if s.top_validators_share_pct.is_some() {
        value += 0.05;
    }
    finish(value, s.observed_at, now)
}

pub fn code_assurance_confidence(
    contract: Option<&ContractIntrospection>,
    audits: Option<&AuditSnapshot>,
    now: DateTime<Utc>,
) -> f64 {
    let observed_at = match (contract, audits) {
        (None, None) => return CONFIDENCE_FLOOR,
        (Some(c), Some(a)) => c.observed_at.max(a.observed_at),
        (Some(c), None) => c.observed_at,
        (None, Some(a)) => a.observed_at,
    };

    let mut value = 0.4;
    if contract.map(|c| c.verified).unwrap_or(false) {
        value += 0.10;
    }
    if let Some(a) = audits {
        if !a.audits.is_empty() {
            value += 0.15;
        }
        if a.distinct_firms() >= 2 {
            value += 0.05;
        }
    }
    finish(value, observed_at, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_recency_steps() {
        let now = Utc::now();
        assert_eq!(recency_adjustment(now, now), 0.25);
        assert_eq!(recency_adjustment(now - Duration::days(5), now), 0.18);
        assert_eq!(recency_adjustment(now - Duration::days(20), now), 0.08);
        assert_eq!(recency_adjustment(now - Duration::days(60), now), 0.0);
        assert_eq!(recency_adjustment(now - Duration::days(120), now), -0.05);
        assert_eq!(recency_adjustment(now - Duration::days(400), now), -0.10);
        // clock skew counts as fresh
        assert_eq!(recency_adjustment(now + Duration::hours(1), now), 0.25);
    }

    #[test]
    fn test_absent_evidence_sits_on_floor() {
        let now = Utc::now();
        assert_eq!(ownership_confidence(None, now), CONFIDENCE_FLOOR);
        assert_eq!(control_risk_confidence(None, now), CONFIDENCE_FLOOR);
        assert_eq!(liquidity_confidence(None, now), CONFIDENCE_FLOOR);
        assert_eq!(governance_confidence(None, now), CONFIDENCE_FLOOR);
        assert_eq!(chain_level_confidence(None, now), CONFIDENCE_FLOOR);
        assert_eq!(code_assurance_confidence(None, None, now), CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_richer_governance_history_raises_confidence() {
        let now = Utc::now();
        let record = |i: usize| crate::types::TurnoutRecord {
            proposal_id: i.to_string(),
            turnout_pct: 10.0,
            timestamp: now,
        };
        let stale = now - Duration::days(100);
        let few = GovernanceSnapshot {
            framework: None,
            quorum_pct: None,
            turnout_history: (0..3).map(record).collect(),
            observed_at_block: 0,
            observed_at: stale,
        };
        let many = GovernanceSnapshot {
            turnout_history: (0..25).map(record).collect(),
            ..few.clone()
        };
        // 0.3 + 0.12 - 0.05 and 0.3 + 0.25 - 0.05
        assert_eq!(governance_confidence(Some(&few), now), 0.37);
        assert_eq!(governance_confidence(Some(&many), now), 0.5);
    }

    #[test]
    fn test_fresh_complete_chain_stats_hit_ceiling() {
        let now = Utc::now();
        let stats = ChainStats {
            chain: "ethereum".into(),
            validator_count: Some(900_000),
            top_validators_share_pct: Some(60.0),
            nakamoto_coefficient: Some(3),
            observed_at_block: 1,
            observed_at: now,
        };
        assert_eq!(chain_level_confidence(Some(&stats), now), 1.0);
    }

    #[test]
    fn test_firm_names_are_normalised_for_diversity() {
        let now = Utc::now();
        let snapshot = |firms: &[&str]| AuditSnapshot {
            audits: firms
                .iter()
                .map(|firm| crate::types::AuditReport {
                    firm: firm.to_string(),
                    date: now,
                    report_url: None,
                })
                .collect(),
            observed_at: now,
        };
        let same = snapshot(&["ABDK", " abdk"]);
        let two = snapshot(&["ABDK", "Spearbit"]);
        assert_eq!(same.distinct_firms(), 1);

        // both the sub-score and its confidence see one firm, not two
        assert!(code_assurance_confidence(None, Some(&same), now) < code_assurance_confidence(None, Some(&two), now));
        assert_eq!(
            crate::scoring::subscores::code_assurance_score(None, Some(&two), now)
                - crate::scoring::subscores::code_assurance_score(None, Some(&same), now),
            5.0
        );
    }
}
