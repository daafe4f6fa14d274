//! Secured, expected and best-case contributions of every leaf.
//!
//! Effective weights already carry the recursive composition, so course
//! totals are plain sums over the leaves. Container subtotals are only kept
//! for display.

use std::ops::AddAssign;

use serde::Serialize;

use crate::config::{EngineConfig, EstimationPolicy};
use crate::entry::Resolution;
use crate::tree::Forest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Contribution {
    pub secured: f64,
    pub expected: f64,
    pub best_case: f64,
}

impl Contribution {
    pub fn for_leaf(effective_weight: f64, ratio: Option<f64>, estimate: f64) -> Self {
        match ratio {
            Some(ratio) => {
                let points = ratio * effective_weight;
                Self {
                    secured: points,
                    expected: points,
                    best_case: points,
                }
            }
            None => Self {
                secured: 0.0,
                expected: effective_weight * estimate,
                best_case: effective_weight,
            },
        }
    }
}

impl AddAssign for Contribution {
    fn add_assign(&mut self, other: Self) {
        self.secured += other.secured;
        self.expected += other.expected;
        self.best_case += other.best_case;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBounds {
    pub current_score: f64,
    pub predicted_score: f64,
    pub max_score: f64,
}

impl From<Contribution> for ScoreBounds {
    fn from(total: Contribution) -> Self {
        Self {
            current_score: total.secured,
            predicted_score: total.expected,
            max_score: total.best_case,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    /// Subtotal per forest position; a leaf's subtotal is its own contribution.
    pub node_totals: Vec<Contribution>,
    pub estimated_completion_ratio: f64,
    pub bounds: ScoreBounds,
}

impl Aggregation {
    pub fn node_total(&self, position: usize) -> Contribution {
        self.node_totals[position]
    }
}

/// Ratio assumed for every pending leaf under the configured policy.
pub fn estimated_completion_ratio(
    forest: &Forest,
    resolution: &Resolution,
    config: &EngineConfig,
) -> f64 {
    match config.estimation {
        EstimationPolicy::Constant => config.default_completion_ratio,
        EstimationPolicy::History => {
            let (weighted, weight) = forest
                .leaves()
                .filter_map(|position| {
                    let ratio = resolution.leaf(position)?.ratio?;
                    Some((ratio, forest.get(position).effective_weight))
                })
                .fold((0.0, 0.0), |(weighted, total), (ratio, weight)| {
                    (weighted + ratio * weight, total + weight)
                });
            if weight > 0.0 {
                (weighted / weight).clamp(0.0, 1.0)
            } else {
                config.default_completion_ratio
            }
        }
    }
}

pub fn aggregate(forest: &Forest, resolution: &Resolution, config: &EngineConfig) -> Aggregation {
    let estimate = estimated_completion_ratio(forest, resolution, config);
    let mut node_totals = vec![Contribution::default(); forest.len()];
    let mut total = Contribution::default();

    for position in forest.leaves() {
        let ratio = resolution.leaf(position).and_then(|outcome| outcome.ratio);
        let contribution =
            Contribution::for_leaf(forest.get(position).effective_weight, ratio, estimate);
        node_totals[position] = contribution;
        total += contribution;
    }

    // Children come after their parent in pre-order, so walking it backwards
    // finishes every subtree before its parent is read.
    for &position in forest.preorder().iter().rev() {
        if let Some(parent) = forest.get(position).parent {
            let subtotal = node_totals[position];
            node_totals[parent] += subtotal;
        }
    }

    tracing::debug!(
        course = %forest.course_id(),
        estimate,
        current = total.secured,
        predicted = total.expected,
        max = total.best_case,
        "aggregated scores"
    );

    Aggregation {
        node_totals,
        estimated_completion_ratio: estimate,
        bounds: total.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::resolve;
    use crate::models::EvalEntry;
    use crate::tree::tests::node;
    use uuid::Uuid;

    fn completed(node_id: Uuid, earned: f64, max: f64) -> EvalEntry {
        EvalEntry {
            earned: Some(earned),
            max: Some(max),
            ..EvalEntry::new(node_id)
        }
    }

    #[test]
    fn pending_leaf_bounds_are_ordered() {
        let leaf = Contribution::for_leaf(40.0, None, 0.25);
        assert_eq!(leaf.secured, 0.0);
        assert_eq!(leaf.expected, 10.0);
        assert_eq!(leaf.best_case, 40.0);
    }

    #[test]
    fn completed_leaf_is_fixed() {
        let leaf = Contribution::for_leaf(40.0, Some(0.5), 1.0);
        assert_eq!(leaf.secured, 20.0);
        assert_eq!(leaf.expected, 20.0);
        assert_eq!(leaf.best_case, 20.0);
    }

    #[test]
    fn history_estimate_is_weighted_by_effective_weight() {
        let course = Uuid::new_v4();
        let heavy = node(course, None, 60.0, true);
        let light = node(course, None, 20.0, true);
        let pending = node(course, None, 20.0, true);
        let entries = vec![completed(heavy.id, 1.0, 1.0), completed(light.id, 0.0, 1.0)];
        let forest = Forest::assemble(course, vec![heavy, light, pending]).unwrap();
        let resolution = resolve(&forest, &entries).unwrap();

        let estimate = estimated_completion_ratio(&forest, &resolution, &EngineConfig::default());
        assert!((estimate - 0.75).abs() < 1e-9);

        let result = aggregate(&forest, &resolution, &EngineConfig::default());
        assert!((result.bounds.current_score - 60.0).abs() < 1e-9);
        assert!((result.bounds.predicted_score - 75.0).abs() < 1e-9);
        assert!((result.bounds.max_score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn constant_policy_ignores_history() {
        let course = Uuid::new_v4();
        let done = node(course, None, 50.0, true);
        let pending = node(course, None, 50.0, true);
        let entries = vec![completed(done.id, 1.0, 1.0)];
        let forest = Forest::assemble(course, vec![done, pending]).unwrap();
        let resolution = resolve(&forest, &entries).unwrap();
        let config = EngineConfig {
            estimation: EstimationPolicy::Constant,
            default_completion_ratio: 0.0,
            ..EngineConfig::default()
        };

        let result = aggregate(&forest, &resolution, &config);
        assert_eq!(result.estimated_completion_ratio, 0.0);
        assert!((result.bounds.predicted_score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_default_without_completed_leaves() {
        let course = Uuid::new_v4();
        let pending = node(course, None, 100.0, true);
        let forest = Forest::assemble(course, vec![pending]).unwrap();
        let resolution = resolve(&forest, &[]).unwrap();
        let config = EngineConfig {
            default_completion_ratio: 0.6,
            ..EngineConfig::default()
        };
        let result = aggregate(&forest, &resolution, &config);
        assert_eq!(result.estimated_completion_ratio, 0.6);
        assert!((result.bounds.predicted_score - 60.0).abs() < 1e-9);
        assert_eq!(result.bounds.current_score, 0.0);
        assert_eq!(result.bounds.max_score, 100.0);
    }

    #[test]
    fn zero_weight_history_falls_back_to_default() {
        let course = Uuid::new_v4();
        let practice = node(course, None, 0.0, true);
        let exam = node(course, None, 100.0, true);
        let entries = vec![completed(practice.id, 2.0, 10.0)];
        let forest = Forest::assemble(course, vec![practice, exam]).unwrap();
        let resolution = resolve(&forest, &entries).unwrap();
        assert_eq!(resolution.completed_count(), 1);

        let config = EngineConfig {
            default_completion_ratio: 0.7,
            ..EngineConfig::default()
        };
        let result = aggregate(&forest, &resolution, &config);
        assert_eq!(result.estimated_completion_ratio, 0.7);
        assert!((result.bounds.predicted_score - 70.0).abs() < 1e-9);
        assert_eq!(result.bounds.current_score, 0.0);
        assert_eq!(result.bounds.max_score, 100.0);
    }

    #[test]
    fn container_subtotals_roll_up() {
        let course = Uuid::new_v4();
        let root = node(course, None, 100.0, false);
        let mid = node(course, Some(root.id), 50.0, false);
        let inner = node(course, Some(mid.id), 100.0, true);
        let outer = node(course, Some(root.id), 50.0, true);
        let entries = vec![completed(inner.id, 10.0, 10.0)];
        let (root_id, mid_id) = (root.id, mid.id);
        let forest = Forest::assemble(course, vec![root, mid, inner, outer]).unwrap();
        let resolution = resolve(&forest, &entries).unwrap();
        let result = aggregate(&forest, &resolution, &EngineConfig::default());

        let mid_total = result.node_total(forest.position(mid_id).unwrap());
        assert!((mid_total.secured - 50.0).abs() < 1e-9);
        let root_total = result.node_total(forest.position(root_id).unwrap());
        assert!((root_total.secured - result.bounds.current_score).abs() < 1e-9);
        assert!((root_total.best_case - 100.0).abs() < 1e-9);
    }

    #[test]
    fn over_subscribed_weights_are_not_clamped() {
        let course = Uuid::new_v4();
        let a = node(course, None, 80.0, true);
        let b = node(course, None, 80.0, true);
        let forest = Forest::assemble(course, vec![a, b]).unwrap();
        let resolution = resolve(&forest, &[]).unwrap();
        let result = aggregate(&forest, &resolution, &EngineConfig::default());
        assert!((result.bounds.max_score - 160.0).abs() < 1e-9);
    }
}
