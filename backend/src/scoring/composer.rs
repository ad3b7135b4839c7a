use crate::providers::metrics::round_to;
use crate::types::{Category, CategoryValues};

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub total: f64,
    /// Confidence-adjusted weights actually used for `total`.
    pub weights: CategoryValues,
}

/// Scale configured weights by confidence, renormalize them to sum to 1 and
/// take the weighted sum of sub-scores. Low confidence categories give their
/// weight to better-evidenced ones.
pub fn compose(sub_scores: &CategoryValues, configured: &CategoryValues, confidence: &CategoryValues) -> Composition {
    let weights = renormalize(configured, confidence);
    let total: f64 = Category::ALL
        .iter()
        .map(|c| sub_scores.get(*c) * weights.get(*c))
        .sum();

    Composition {
        total: round_to(total.clamp(0.0, 100.0), 2),
        weights,
    }
}

pub fn renormalize(configured: &CategoryValues, confidence: &CategoryValues) -> CategoryValues {
    let adjusted = CategoryValues::from_fn(|c| configured.get(c).max(0.0) * confidence.get(c).clamp(0.0, 1.0));
    let sum = adjusted.sum();
    if sum <= 0.0 {
        return *configured;
    }

    let mut weights = CategoryValues::from_fn(|c| round_to(adjusted.get(c) / sum, 4));

    // put the rounding residue on the largest weight so the vector sums to 1
    let residue = 1.0 - weights.sum();
    if residue.abs() > f64::EPSILON {
        let largest = Category::ALL
            .iter()
            .copied()
            .max_by(|a, b| {
                weights
                    .get(*a)
                    .partial_cmp(&weights.get(*b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(Category::Ownership);
        weights.set(largest, round_to(weights.get(largest) + residue, 4));
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;

    fn uniform(value: f64) -> CategoryValues {
        CategoryValues::from_fn(|_| value)
    }

    #[test]
    fn test_weights_sum_to_one_over_confidence_grid() {
        let configured = ScoringConfig::default().weights;
        let steps = [0.2, 0.35, 0.5, 0.77, 1.0];
        for a in steps {
            for b in steps {
                for c in steps {
                    let confidence = CategoryValues {
                        ownership: a,
                        control_risk: b,
                        liquidity: c,
                        governance: a,
                        chain_level: b,
                        code_assurance: c,
                    };
                    let weights = renormalize(&configured, &confidence);
                    assert!((weights.sum() - 1.0).abs() <= 0.001, "sum {} for {:?}", weights.sum(), confidence);
                }
            }
        }
    }

    #[test]
    fn test_uniform_confidence_keeps_configured_weights() {
        let configured = ScoringConfig::default().weights;
        let composition = compose(&uniform(50.0), &configured, &uniform(0.6));
        assert_eq!(composition.weights, configured);
        assert_eq!(composition.total, 50.0);
    }

    #[test]
    fn test_degenerate_confidence_falls_back_to_configured() {
        let configured = ScoringConfig::default().weights;
        let weights = renormalize(&configured, &uniform(0.0));
        assert_eq!(weights, configured);
    }

    #[test]
    fn test_low_confidence_category_loses_weight() {
        let configured = uniform(1.0 / 6.0);
        let mut confidence = uniform(1.0);
        confidence.governance = 0.2;
        let mut sub_scores = uniform(80.0);
        sub_scores.governance = 0.0;

        let composition = compose(&sub_scores, &configured, &confidence);
        assert!(composition.weights.governance < composition.weights.ownership);
        // governance weight is 0.2 / 5.2
        assert!((composition.total - 80.0 * 5.0 / 5.2).abs() < 0.05);
        assert!(composition.total <= 100.0);
    }
}
