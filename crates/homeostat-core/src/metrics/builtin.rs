//! # Built-in Metrics
//!
//! The scoring rules shipped with Homeostat. Node roles: the *primary* node
//! supplies individuality (its own goals and dimensions), the *secondary*
//! node supplies collectivity.
//!
//! | id | reads |
//! |----|-------|
//! | `goal_alignment` | goals of both nodes |
//! | `dimension_coherence` | dimension scores present on both nodes |
//! | `harmony` | weighted dimensions of both nodes |
//! | `equilibrium` | one dimension per node + `coupling_strength` |
//! | `stability` | upstream `equilibrium`, own history, balance |
//! | `drift` | upstream `goal_alignment` |
//! | `consent_stability` | gauge `policy.allowed_ratio` |

use super::{InputCollector, Metric, MetricInputs, MetricsConfig, Scored};
use crate::primitives::NEUTRAL_SCORE;
use crate::types::{MetricId, MetricSample, NodeState};
use std::collections::BTreeSet;

pub const GOAL_ALIGNMENT: &str = "goal_alignment";
pub const DIMENSION_COHERENCE: &str = "dimension_coherence";
pub const HARMONY: &str = "harmony";
pub const EQUILIBRIUM: &str = "equilibrium";
pub const STABILITY: &str = "stability";
pub const DRIFT: &str = "drift";
pub const CONSENT_STABILITY: &str = "consent_stability";

/// Tunable written by the auto-tune controller.
pub const COUPLING_STRENGTH: &str = "coupling_strength";

/// Gauge published by the policy gate.
pub const ALLOWED_RATIO: &str = "policy.allowed_ratio";

/// Instantiate a built-in metric by id.
pub fn create(id: &str, config: &MetricsConfig) -> Option<Box<dyn super::Metric>> {
    let metric: Box<dyn Metric> = match id {
        GOAL_ALIGNMENT => Box::new(GoalAlignmentMetric),
        DIMENSION_COHERENCE => Box::new(DimensionCoherenceMetric),
        HARMONY => Box::new(HarmonyMetric {
            dimensions: config
                .harmony_dimensions
                .iter()
                .map(|(name, weight)| (name.clone(), *weight))
                .collect(),
            divergence_target: config.harmony_divergence_target,
        }),
        EQUILIBRIUM => Box::new(EquilibriumMetric {
            dimension: config.equilibrium_dimension.clone(),
            optimum: config.equilibrium_optimum,
        }),
        STABILITY => Box::new(StabilityMetric {
            dimension: config.equilibrium_dimension.clone(),
        }),
        DRIFT => Box::new(DriftMetric),
        CONSENT_STABILITY => Box::new(ConsentStabilityMetric),
        _ => return None,
    };
    Some(metric)
}

fn dim_source(node: Option<&NodeState>, role: &str, dimension: &str) -> String {
    match node {
        Some(state) => format!("{}.{}", state.node_id, dimension),
        None => format!("{}.{}", role, dimension),
    }
}

// =============================================================================
// GOAL ALIGNMENT
// =============================================================================

/// Agreement between the nodes' goal priorities.
///
/// Goals held by both nodes score `1 - |pA - pB|` at full consensus weight.
/// Goals held by only one node score neutral at half weight.
#[derive(Debug)]
pub struct GoalAlignmentMetric;

impl Metric for GoalAlignmentMetric {
    fn id(&self) -> MetricId {
        MetricId::from(GOAL_ALIGNMENT)
    }

    fn score(&self, inputs: &MetricInputs<'_>, _previous: Option<&MetricSample>) -> Scored {
        let mut collector = InputCollector::new();
        let (Some(a), Some(b)) = (inputs.primary, inputs.secondary) else {
            let value = collector.neutral("nodes");
            return Scored::new(value, collector);
        };

        let names: BTreeSet<&str> = a
            .goals
            .iter()
            .chain(b.goals.iter())
            .map(|g| g.name.as_str())
            .collect();
        if names.is_empty() {
            let value = collector.neutral("goals");
            return Scored::new(value, collector);
        }

        let mut weighted = 0.0;
        let mut total = 0.0;
        for name in names {
            let (agreement, consensus) = match (a.goal(name), b.goal(name)) {
                (Some(ga), Some(gb)) => {
                    let pa = collector.take(format!("{}.goal.{}", a.node_id, name), Some(ga.priority));
                    let pb = collector.take(format!("{}.goal.{}", b.node_id, name), Some(gb.priority));
                    (1.0 - (pa - pb).abs(), 1.0)
                }
                _ => (NEUTRAL_SCORE, 0.5),
            };
            weighted += agreement * consensus;
            total += consensus;
        }

        Scored::new(weighted / total, collector)
    }
}

// =============================================================================
// DIMENSION COHERENCE
// =============================================================================

/// Mean unity (`1 - |a - b|`) over dimensions both nodes report.
#[derive(Debug)]
pub struct DimensionCoherenceMetric;

impl Metric for DimensionCoherenceMetric {
    fn id(&self) -> MetricId {
        MetricId::from(DIMENSION_COHERENCE)
    }

    fn score(&self, inputs: &MetricInputs<'_>, _previous: Option<&MetricSample>) -> Scored {
        let mut collector = InputCollector::new();
        let (Some(a), Some(b)) = (inputs.primary, inputs.secondary) else {
            let value = collector.neutral("nodes");
            return Scored::new(value, collector);
        };

        let shared: Vec<&String> = a
            .dimension_scores
            .keys()
            .filter(|k| b.dimension_scores.contains_key(*k))
            .collect();
        if shared.is_empty() {
            let value = collector.neutral("dimensions.shared");
            return Scored::new(value, collector);
        }

        let mut unity_sum = 0.0;
        for dim in &shared {
            let va = collector.take(format!("{}.{}", a.node_id, dim), a.dimension(dim));
            let vb = collector.take(format!("{}.{}", b.node_id, dim), b.dimension(dim));
            unity_sum += 1.0 - (va - vb).abs();
        }

        Scored::new(unity_sum / shared.len() as f64, collector)
    }
}

// =============================================================================
// HARMONY
// =============================================================================

/// Weighted balance across resonance dimensions, penalised when the mean
/// divergence strays from the healthy target.
#[derive(Debug)]
pub struct HarmonyMetric {
    dimensions: Vec<(String, f64)>,
    divergence_target: f64,
}

impl Metric for HarmonyMetric {
    fn id(&self) -> MetricId {
        MetricId::from(HARMONY)
    }

    fn score(&self, inputs: &MetricInputs<'_>, _previous: Option<&MetricSample>) -> Scored {
        let mut collector = InputCollector::new();
        if self.dimensions.is_empty() {
            let value = collector.neutral("dimensions");
            return Scored::new(value, collector);
        }

        let weight_sum: f64 = self
            .dimensions
            .iter()
            .map(|(_, w)| *w)
            .filter(|w| w.is_finite() && *w > 0.0)
            .sum();
        let equal = 1.0 / self.dimensions.len() as f64;

        let mut harmony = 0.0;
        let mut divergence_sum = 0.0;
        for (dim, weight) in &self.dimensions {
            let a = collector.take(
                dim_source(inputs.primary, "primary", dim),
                inputs.primary.and_then(|s| s.dimension(dim)),
            );
            let b = collector.take(
                dim_source(inputs.secondary, "secondary", dim),
                inputs.secondary.and_then(|s| s.dimension(dim)),
            );
            let w = if weight_sum > 0.0 && weight.is_finite() && *weight > 0.0 {
                weight / weight_sum
            } else if weight_sum > 0.0 {
                0.0
            } else {
                equal
            };
            harmony += w * (a + b) / 2.0;
            divergence_sum += (a - b).abs();
        }

        let mean_divergence = divergence_sum / self.dimensions.len() as f64;
        collector.record("divergence.mean", mean_divergence);
        harmony -= (mean_divergence - self.divergence_target).abs() * 0.3;

        Scored::new(harmony.clamp(0.0, 1.0), collector)
    }
}

// =============================================================================
// EQUILIBRIUM
// =============================================================================

/// Equilibrium coefficient between individuality (primary) and collectivity
/// (secondary) under the current coupling strength, pulled 10% toward the
/// optimum.
#[derive(Debug)]
pub struct EquilibriumMetric {
    dimension: String,
    optimum: f64,
}

impl Metric for EquilibriumMetric {
    fn id(&self) -> MetricId {
        MetricId::from(EQUILIBRIUM)
    }

    fn score(&self, inputs: &MetricInputs<'_>, _previous: Option<&MetricSample>) -> Scored {
        let mut collector = InputCollector::new();
        let individuality = collector.take(
            dim_source(inputs.primary, "primary", &self.dimension),
            inputs.primary.and_then(|s| s.dimension(&self.dimension)),
        );
        let collectivity = collector.take(
            dim_source(inputs.secondary, "secondary", &self.dimension),
            inputs.secondary.and_then(|s| s.dimension(&self.dimension)),
        );
        let coupling = collector.take(COUPLING_STRENGTH, inputs.parameters.get(COUPLING_STRENGTH));

        let hec = (individuality * (1.0 - coupling) + collectivity * coupling) / 2.0;
        let adjusted = hec + (self.optimum - hec) * 0.1;

        Scored::new(adjusted.clamp(0.0, 1.0), collector)
    }
}

// =============================================================================
// STABILITY
// =============================================================================

/// How still the equilibrium is (`1 - |Δ equilibrium|` since the previous
/// sample) averaged with how balanced the two nodes are.
///
/// The first computation has no previous sample, so its delta is 0.
#[derive(Debug)]
pub struct StabilityMetric {
    dimension: String,
}

impl Metric for StabilityMetric {
    fn id(&self) -> MetricId {
        MetricId::from(STABILITY)
    }

    fn upstream(&self) -> Vec<MetricId> {
        vec![MetricId::from(EQUILIBRIUM)]
    }

    fn score(&self, inputs: &MetricInputs<'_>, previous: Option<&MetricSample>) -> Scored {
        let mut collector = InputCollector::new();
        let equilibrium = collector.take(EQUILIBRIUM, inputs.upstream.latest_value(EQUILIBRIUM));
        let delta = previous
            .and_then(|p| p.input(EQUILIBRIUM))
            .map(|before| equilibrium - before)
            .unwrap_or(0.0);
        collector.record("equilibrium.delta", delta);

        let individuality = collector.take(
            dim_source(inputs.primary, "primary", &self.dimension),
            inputs.primary.and_then(|s| s.dimension(&self.dimension)),
        );
        let collectivity = collector.take(
            dim_source(inputs.secondary, "secondary", &self.dimension),
            inputs.secondary.and_then(|s| s.dimension(&self.dimension)),
        );
        let balance = 1.0 - (individuality - collectivity).abs();

        Scored::new(((1.0 - delta.abs()) + balance) / 2.0, collector)
    }
}

// =============================================================================
// DRIFT
// =============================================================================

/// Complement of goal alignment.
#[derive(Debug)]
pub struct DriftMetric;

impl Metric for DriftMetric {
    fn id(&self) -> MetricId {
        MetricId::from(DRIFT)
    }

    fn upstream(&self) -> Vec<MetricId> {
        vec![MetricId::from(GOAL_ALIGNMENT)]
    }

    fn score(&self, inputs: &MetricInputs<'_>, _previous: Option<&MetricSample>) -> Scored {
        let mut collector = InputCollector::new();
        let alignment =
            collector.take(GOAL_ALIGNMENT, inputs.upstream.latest_value(GOAL_ALIGNMENT));
        Scored::new(1.0 - alignment, collector)
    }
}

// =============================================================================
// CONSENT STABILITY
// =============================================================================

/// Share of gated artifacts that were allowed outright.
#[derive(Debug)]
pub struct ConsentStabilityMetric;

impl Metric for ConsentStabilityMetric {
    fn id(&self) -> MetricId {
        MetricId::from(CONSENT_STABILITY)
    }

    fn score(&self, inputs: &MetricInputs<'_>, _previous: Option<&MetricSample>) -> Scored {
        let mut collector = InputCollector::new();
        let ratio = collector.take(ALLOWED_RATIO, inputs.parameters.get(ALLOWED_RATIO));
        Scored::new(ratio, collector)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{LatestMetric, ParameterSnapshot};
    use crate::types::{Goal, MetricId, Timestamp};
    use std::collections::BTreeMap;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn score_with(
        metric: &dyn Metric,
        a: Option<&NodeState>,
        b: Option<&NodeState>,
        upstream: &BTreeMap<MetricId, f64>,
        params: &ParameterSnapshot,
        previous: Option<&MetricSample>,
    ) -> Scored {
        let inputs = MetricInputs {
            primary: a,
            secondary: b,
            upstream: upstream as &dyn LatestMetric,
            parameters: params,
        };
        metric.score(&inputs, previous)
    }

    #[test]
    fn goal_alignment_weights_shared_goals_fully() {
        let a = NodeState::new("individual", Timestamp(0))
            .with_goal(Goal::new("growth", 0.9, 0.8))
            .with_goal(Goal::new("solitude", 0.4, 0.8));
        let b = NodeState::new("collective", Timestamp(0)).with_goal(Goal::new("growth", 0.7, 0.8));

        let scored = score_with(
            &GoalAlignmentMetric,
            Some(&a),
            Some(&b),
            &BTreeMap::new(),
            &ParameterSnapshot::new(),
            None,
        );
        // growth: 0.8 at weight 1.0, solitude: 0.5 at weight 0.5
        let expected = (0.8 * 1.0 + 0.5 * 0.5) / 1.5;
        assert!(approx(scored.value, expected));
    }

    #[test]
    fn goal_alignment_without_nodes_is_neutral() {
        let scored = score_with(
            &GoalAlignmentMetric,
            None,
            None,
            &BTreeMap::new(),
            &ParameterSnapshot::new(),
            None,
        );
        assert!(approx(scored.value, NEUTRAL_SCORE));
        assert!(scored.inputs[0].substituted);
    }

    #[test]
    fn coherence_uses_shared_dimensions_only() {
        let a = NodeState::new("a", Timestamp(0))
            .with_dimension("x", 0.9)
            .with_dimension("only_a", 0.1);
        let b = NodeState::new("b", Timestamp(0))
            .with_dimension("x", 0.5)
            .with_dimension("only_b", 0.9);

        let scored = score_with(
            &DimensionCoherenceMetric,
            Some(&a),
            Some(&b),
            &BTreeMap::new(),
            &ParameterSnapshot::new(),
            None,
        );
        assert!(approx(scored.value, 0.6));
        assert_eq!(scored.inputs.len(), 2);
    }

    #[test]
    fn harmony_penalises_divergence_away_from_target() {
        let metric = HarmonyMetric {
            dimensions: vec![("logical".to_string(), 1.0)],
            divergence_target: 0.2,
        };
        let a = NodeState::new("a", Timestamp(0)).with_dimension("logical", 0.8);
        let b = NodeState::new("b", Timestamp(0)).with_dimension("logical", 0.6);

        let scored = score_with(
            &metric,
            Some(&a),
            Some(&b),
            &BTreeMap::new(),
            &ParameterSnapshot::new(),
            None,
        );
        // balance 0.7, divergence exactly at target so no penalty
        assert!(approx(scored.value, 0.7));
    }

    #[test]
    fn equilibrium_follows_coupling() {
        let metric = EquilibriumMetric {
            dimension: "coherence".to_string(),
            optimum: 0.88,
        };
        let a = NodeState::new("a", Timestamp(0)).with_dimension("coherence", 0.8);
        let b = NodeState::new("b", Timestamp(0)).with_dimension("coherence", 0.6);
        let params = ParameterSnapshot::new().with(COUPLING_STRENGTH, 0.5);

        let scored = score_with(&metric, Some(&a), Some(&b), &BTreeMap::new(), &params, None);
        let hec = (0.8 * 0.5 + 0.6 * 0.5) / 2.0;
        assert!(approx(scored.value, hec + (0.88 - hec) * 0.1));
    }

    #[test]
    fn stability_first_delta_is_zero() {
        let metric = StabilityMetric {
            dimension: "coherence".to_string(),
        };
        let a = NodeState::new("a", Timestamp(0)).with_dimension("coherence", 0.7);
        let b = NodeState::new("b", Timestamp(0)).with_dimension("coherence", 0.7);
        let upstream = BTreeMap::from([(MetricId::from(EQUILIBRIUM), 0.4)]);

        let scored = score_with(
            &metric,
            Some(&a),
            Some(&b),
            &upstream,
            &ParameterSnapshot::new(),
            None,
        );
        assert!(approx(scored.value, 1.0));
    }

    #[test]
    fn stability_uses_previous_equilibrium() {
        let metric = StabilityMetric {
            dimension: "coherence".to_string(),
        };
        let a = NodeState::new("a", Timestamp(0)).with_dimension("coherence", 0.7);
        let b = NodeState::new("b", Timestamp(0)).with_dimension("coherence", 0.7);
        let upstream = BTreeMap::from([(MetricId::from(EQUILIBRIUM), 0.4)]);
        let params = ParameterSnapshot::new();

        let first = score_with(&metric, Some(&a), Some(&b), &upstream, &params, None);
        let previous = MetricSample {
            engine_id: MetricId::from(STABILITY),
            cycle: 1,
            timestamp: Timestamp(0),
            value: first.value,
            inputs: first.inputs,
        };

        let moved = BTreeMap::from([(MetricId::from(EQUILIBRIUM), 0.6)]);
        let second = score_with(&metric, Some(&a), Some(&b), &moved, &params, Some(&previous));
        assert!(approx(second.value, ((1.0 - 0.2) + 1.0) / 2.0));
    }

    #[test]
    fn drift_is_complement_of_alignment() {
        let upstream = BTreeMap::from([(MetricId::from(GOAL_ALIGNMENT), 0.73)]);
        let scored = score_with(
            &DriftMetric,
            None,
            None,
            &upstream,
            &ParameterSnapshot::new(),
            None,
        );
        assert!(approx(scored.value, 1.0 - 0.73));
    }

    #[test]
    fn consent_stability_neutral_without_gauge() {
        let scored = score_with(
            &ConsentStabilityMetric,
            None,
            None,
            &BTreeMap::new(),
            &ParameterSnapshot::new(),
            None,
        );
        assert!(approx(scored.value, NEUTRAL_SCORE));
    }

    #[test]
    fn unknown_id_is_not_created() {
        assert!(create("nonexistent", &MetricsConfig::default()).is_none());
        assert!(create(HARMONY, &MetricsConfig::default()).is_some());
    }
}
