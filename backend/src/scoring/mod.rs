pub mod composer;
pub mod confidence;
pub mod subscores;

pub use composer::{compose, renormalize, Composition};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::types::{
    AssetId, AuditSnapshot, CategoryValues, ChainStats, ContractIntrospection, GovernanceSnapshot, HoldersSnapshot,
    LiquiditySnapshot, Score,
};

/// Everything known about one asset at scoring time. Any field may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSet {
    pub contract: Option<ContractIntrospection>,
    pub holders: Option<HoldersSnapshot>,
    pub liquidity: Option<LiquiditySnapshot>,
    pub governance: Option<GovernanceSnapshot>,
    pub chain_stats: Option<ChainStats>,
    pub audits: Option<AuditSnapshot>,
}

impl EvidenceSet {
    /// Highest block any piece of evidence was observed at.
    pub fn observed_at_block(&self) -> u64 {
        [
            self.contract.as_ref().map(|e| e.observed_at_block),
            self.holders.as_ref().map(|e| e.observed_at_block),
            self.liquidity.as_ref().map(|e| e.observed_at_block),
            self.governance.as_ref().map(|e| e.observed_at_block),
            self.chain_stats.as_ref().map(|e| e.observed_at_block),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn calc_version(&self) -> &str {
        &self.config.calc_version
    }

    pub fn sub_scores(&self, evidence: &EvidenceSet, now: DateTime<Utc>) -> CategoryValues {
        CategoryValues {
            ownership: subscores::ownership_score(evidence.holders.as_ref()),
            control_risk: subscores::control_risk_score(evidence.contract.as_ref()),
            liquidity: subscores::liquidity_score(evidence.liquidity.as_ref()),
            governance: subscores::governance_score(evidence.governance.as_ref()),
            chain_level: subscores::chain_level_score(evidence.chain_stats.as_ref()),
            code_assurance: subscores::code_assurance_score(
                evidence.contract.as_ref(),
                evidence.audits.as_ref(),
                now,
            ),
        }
    }

    pub fn confidence(&self, evidence: &EvidenceSet, now: DateTime<Utc>) -> CategoryValues {
        CategoryValues {
            ownership: confidence::ownership_confidence(evidence.holders.as_ref(), now),
            control_risk: confidence::control_risk_confidence(evidence.contract.as_ref(), now),
            liquidity: confidence::liquidity_confidence(evidence.liquidity.as_ref(), now),
            governance: confidence::governance_confidence(evidence.governance.as_ref(), now),
            chain_level: confidence::chain_level_confidence(evidence.chain_stats.as_ref(), now),
            code_assurance: confidence::code_assurance_confidence(
                evidence.contract.as_ref(),
                evidence.audits.as_ref(),
                now,
            ),
        }
    }

    /// Full pipeline: sub-scores, confidence, composition.
    pub fn score(&self, asset_id: AssetId, evidence: &EvidenceSet, now: DateTime<Utc>) -> Score {
        let sub_scores = self.sub_scores(evidence, now);
        let confidence = self.confidence(evidence, now);
        let composition = compose(&sub_scores, &self.config.weights, &confidence);

        Score {
            id: Uuid::new_v4(),
            asset_id,
            sub_scores,
            weights: composition.weights,
            confidence,
            total: composition.total,
            calc_version: self.config.calc_version.clone(),
            observed_at_block: evidence.observed_at_block(),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_evidence_still_scores() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let score = engine.score(Uuid::new_v4(), &EvidenceSet::default(), Utc::now());

        assert_eq!(score.sub_scores.control_risk, 45.0);
        assert_eq!(score.confidence.ownership, 0.2);
        assert!((score.weights.sum() - 1.0).abs() < 0.001);
        assert!(score.total > 0.0 && score.total <= 100.0);
        assert_eq!(score.observed_at_block, 0);
        assert_eq!(score.calc_version, "v1.3");
    }
}
