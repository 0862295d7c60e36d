//! # Metric Engines
//!
//! One engine per monitored dimension. An engine wraps a [`Metric`] (the
//! scoring rule) and owns everything the rule should not care about:
//! - neutral substitution of missing/invalid inputs (via [`InputCollector`])
//! - clamping and invariant reporting
//! - the bounded sample history and its eviction policy
//!
//! ## Late Binding
//!
//! Engines never hold references to one another. Each metric declares the
//! ids it reads; the [`MetricRegistry`] orders engines topologically and
//! hands every engine a read-only view ([`LatestMetric`]) of the values
//! computed so far in the cycle.
//!
//! ## Cycle Versioning
//!
//! Tunable parameters (e.g. coupling strength) and gauges (e.g. the policy
//! gate's allowed ratio) are frozen into a [`ParameterSnapshot`] before the
//! cycle starts. A controller writing a new value mid-cycle is only seen
//! on the next cycle.

pub mod builtin;

use crate::history::{BoundedHistory, EvictionPolicy};
use crate::invariant::{clamp_unit, sanitize_input};
use crate::primitives::{DEFAULT_METRIC_HISTORY, NEUTRAL_SCORE};
use crate::types::{HomeostatError, InputRef, MetricId, MetricSample, NodeState, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Which engines to run and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub engines: Vec<EngineConfig>,
    /// Default history capacity for engines that do not set their own.
    pub history_capacity: usize,
    /// Dimension weights for the harmony metric.
    pub harmony_dimensions: BTreeMap<String, f64>,
    /// Divergence the harmony metric considers healthy.
    pub harmony_divergence_target: f64,
    /// Dimension read from each node by the equilibrium metric.
    pub equilibrium_dimension: String,
    /// Equilibrium value the equilibrium metric is pulled toward.
    pub equilibrium_optimum: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let engines = [
            builtin::GOAL_ALIGNMENT,
            builtin::DIMENSION_COHERENCE,
            builtin::HARMONY,
            builtin::EQUILIBRIUM,
            builtin::STABILITY,
            builtin::DRIFT,
            builtin::CONSENT_STABILITY,
        ]
        .into_iter()
        .map(EngineConfig::new)
        .collect();

        Self {
            engines,
            history_capacity: DEFAULT_METRIC_HISTORY,
            harmony_dimensions: BTreeMap::from([
                ("emotional".to_string(), 0.4),
                ("logical".to_string(), 0.4),
                ("philosophical".to_string(), 0.2),
            ]),
            harmony_divergence_target: 0.2,
            equilibrium_dimension: "coherence".to_string(),
            equilibrium_optimum: 0.88,
        }
    }
}

/// One enabled engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub id: String,
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub eviction: EvictionPolicy,
}

impl EngineConfig {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            capacity: None,
            eviction: EvictionPolicy::Fifo,
        }
    }
}

// =============================================================================
// CYCLE INPUTS
// =============================================================================

/// Tunables and gauges frozen at cycle start.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    values: BTreeMap<String, f64>,
}

impl ParameterSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// Read-only access to the latest value of other metrics.
pub trait LatestMetric {
    fn latest_value(&self, id: &str) -> Option<f64>;
}

impl LatestMetric for BTreeMap<MetricId, f64> {
    fn latest_value(&self, id: &str) -> Option<f64> {
        self.get(id).copied()
    }
}

/// Everything a metric may read during one cycle.
pub struct MetricInputs<'a> {
    pub primary: Option<&'a NodeState>,
    pub secondary: Option<&'a NodeState>,
    pub upstream: &'a dyn LatestMetric,
    pub parameters: &'a ParameterSnapshot,
}

/// Records the inputs a metric used and substitutes neutral defaults.
#[derive(Debug, Default)]
pub struct InputCollector {
    inputs: Vec<InputRef>,
}

impl InputCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an external input, replacing missing or invalid values with
    /// the neutral score.
    pub fn take(&mut self, source: impl Into<String>, raw: Option<f64>) -> f64 {
        let source = source.into();
        let (value, substituted) = sanitize_input(raw);
        if substituted {
            match raw {
                Some(invalid) => tracing::warn!(
                    event = "input_defaulted",
                    source = %source,
                    value = invalid,
                    "Invalid metric input; using neutral"
                ),
                None => tracing::debug!(source = %source, "Missing metric input; using neutral"),
            }
        }
        self.inputs.push(InputRef {
            source,
            value,
            substituted,
        });
        value
    }

    /// Record a derived value the metric computed along the way.
    pub fn record(&mut self, source: impl Into<String>, value: f64) {
        self.inputs.push(InputRef {
            source: source.into(),
            value,
            substituted: false,
        });
    }

    /// Record that the whole input was absent and return the neutral score.
    pub fn neutral(&mut self, source: impl Into<String>) -> f64 {
        self.take(source, None)
    }

    #[must_use]
    pub fn into_inputs(self) -> Vec<InputRef> {
        self.inputs
    }
}

/// A metric's raw result before the engine clamps and stores it.
#[derive(Debug)]
pub struct Scored {
    pub value: f64,
    pub inputs: Vec<InputRef>,
}

impl Scored {
    #[must_use]
    pub fn new(value: f64, collector: InputCollector) -> Self {
        Self {
            value,
            inputs: collector.into_inputs(),
        }
    }
}

// =============================================================================
// METRIC TRAIT
// =============================================================================

/// A scoring rule for one dimension.
///
/// Implementations must be pure functions of `inputs` and `previous`.
pub trait Metric: Send + Sync + fmt::Debug {
    fn id(&self) -> MetricId;

    /// Metrics whose current-cycle value this metric reads.
    fn upstream(&self) -> Vec<MetricId> {
        Vec::new()
    }

    /// Compute a score. `previous` is this engine's last sample, `None` on
    /// the first computation.
    fn score(&self, inputs: &MetricInputs<'_>, previous: Option<&MetricSample>) -> Scored;
}

// =============================================================================
// METRIC ENGINE
// =============================================================================

/// A metric plus its bounded history.
pub struct MetricEngine {
    metric: Box<dyn Metric>,
    history: BoundedHistory<MetricSample>,
    eviction: EvictionPolicy,
}

impl fmt::Debug for MetricEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricEngine")
            .field("id", &self.metric.id())
            .field("samples", &self.history.len())
            .field("capacity", &self.history.capacity())
            .field("eviction", &self.eviction)
            .finish()
    }
}

impl MetricEngine {
    #[must_use]
    pub fn new(metric: Box<dyn Metric>, capacity: usize, eviction: EvictionPolicy) -> Self {
        Self {
            metric,
            history: BoundedHistory::new(capacity),
            eviction,
        }
    }

    #[must_use]
    pub fn id(&self) -> MetricId {
        self.metric.id()
    }

    #[must_use]
    pub fn upstream(&self) -> Vec<MetricId> {
        self.metric.upstream()
    }

    /// Compute, clamp and append one sample. Never fails.
    pub fn compute(
        &mut self,
        cycle: u64,
        timestamp: Timestamp,
        inputs: &MetricInputs<'_>,
    ) -> MetricSample {
        let id = self.metric.id();
        let scored = self.metric.score(inputs, self.history.latest());
        let value = clamp_unit(scored.value, id.as_str());

        let sample = MetricSample {
            engine_id: id,
            cycle,
            timestamp,
            value,
            inputs: scored.inputs,
        };

        // Samples closest to neutral carry the least information.
        self.history.push_with(sample.clone(), self.eviction, |s| {
            (s.value - NEUTRAL_SCORE).abs()
        });
        sample
    }

    #[must_use]
    pub fn latest(&self) -> Option<&MetricSample> {
        self.history.latest()
    }

    #[must_use]
    pub fn history(&self) -> &BoundedHistory<MetricSample> {
        &self.history
    }

    /// Replace the history with restored samples (oldest first).
    pub fn restore_history(&mut self, samples: Vec<MetricSample>) {
        self.history = BoundedHistory::from_items(self.history.capacity(), samples);
    }
}

// =============================================================================
// METRIC REGISTRY
// =============================================================================

/// All engines, evaluated in dependency order.
#[derive(Debug)]
pub struct MetricRegistry {
    engines: BTreeMap<MetricId, MetricEngine>,
    order: Vec<MetricId>,
}

impl MetricRegistry {
    /// Build a registry, validating the dependency graph.
    ///
    /// Duplicate ids and dependency cycles are configuration errors.
    /// Upstream ids with no engine are tolerated; readers get neutral.
    pub fn new(engines: Vec<MetricEngine>) -> Result<Self, HomeostatError> {
        let mut by_id = BTreeMap::new();
        for engine in engines {
            let id = engine.id();
            if by_id.insert(id.clone(), engine).is_some() {
                return Err(HomeostatError::ConfigurationError(format!(
                    "duplicate metric engine '{}'",
                    id
                )));
            }
        }

        let order = topological_order(&by_id)?;
        Ok(Self {
            engines: by_id,
            order,
        })
    }

    /// Build the built-in engines named in `config`.
    pub fn from_config(config: &MetricsConfig) -> Result<Self, HomeostatError> {
        let mut engines = Vec::with_capacity(config.engines.len());
        for engine in &config.engines {
            match builtin::create(&engine.id, config) {
                Some(metric) => engines.push(MetricEngine::new(
                    metric,
                    engine.capacity.unwrap_or(config.history_capacity),
                    engine.eviction,
                )),
                None => {
                    tracing::warn!(
                        event = "configuration_error",
                        engine = %engine.id,
                        "Unknown metric engine; skipping"
                    );
                }
            }
        }
        Self::new(engines)
    }

    /// Run every engine once, in dependency order.
    pub fn run_cycle(
        &mut self,
        cycle: u64,
        timestamp: Timestamp,
        primary: Option<&NodeState>,
        secondary: Option<&NodeState>,
        parameters: &ParameterSnapshot,
    ) -> Vec<MetricSample> {
        let mut current = self.latest_values();
        let mut samples = Vec::with_capacity(self.order.len());

        for id in &self.order {
            let Some(engine) = self.engines.get_mut(id) else {
                continue;
            };
            let sample = {
                let inputs = MetricInputs {
                    primary,
                    secondary,
                    upstream: &current,
                    parameters,
                };
                engine.compute(cycle, timestamp, &inputs)
            };
            current.insert(id.clone(), sample.value);
            samples.push(sample);
        }

        tracing::debug!(cycle, engines = samples.len(), "Metric cycle complete");
        samples
    }

    /// Latest value of every engine that has produced a sample.
    #[must_use]
    pub fn latest_values(&self) -> BTreeMap<MetricId, f64> {
        self.engines
            .iter()
            .filter_map(|(id, engine)| engine.latest().map(|s| (id.clone(), s.value)))
            .collect()
    }

    #[must_use]
    pub fn latest(&self, id: &str) -> Option<&MetricSample> {
        self.engines.get(id).and_then(MetricEngine::latest)
    }

    /// Up to `limit` samples of one engine, newest first.
    #[must_use]
    pub fn history(&self, id: &str, limit: usize) -> Vec<MetricSample> {
        self.engines
            .get(id)
            .map(|e| e.history().recent(limit))
            .unwrap_or_default()
    }

    /// Evaluation order.
    #[must_use]
    pub fn order(&self) -> &[MetricId] {
        &self.order
    }

    /// Full histories for snapshotting.
    #[must_use]
    pub fn histories(&self) -> BTreeMap<MetricId, Vec<MetricSample>> {
        self.engines
            .iter()
            .map(|(id, engine)| (id.clone(), engine.history().to_vec()))
            .collect()
    }

    /// Restore histories; ids with no engine are dropped.
    pub fn restore(&mut self, histories: BTreeMap<MetricId, Vec<MetricSample>>) {
        for (id, samples) in histories {
            match self.engines.get_mut(&id) {
                Some(engine) => engine.restore_history(samples),
                None => tracing::warn!(engine = %id, "Snapshot holds history for unknown engine; dropping"),
            }
        }
    }
}

impl LatestMetric for MetricRegistry {
    fn latest_value(&self, id: &str) -> Option<f64> {
        self.latest(id).map(|s| s.value)
    }
}

/// Kahn's algorithm over the declared upstream edges.
fn topological_order(
    engines: &BTreeMap<MetricId, MetricEngine>,
) -> Result<Vec<MetricId>, HomeostatError> {
    let mut indegree: BTreeMap<&MetricId, usize> = engines.keys().map(|id| (id, 0)).collect();
    let mut dependents: BTreeMap<&MetricId, Vec<&MetricId>> = BTreeMap::new();

    for (id, engine) in engines {
        let upstream: BTreeSet<MetricId> = engine.upstream().into_iter().collect();
        for dep in &upstream {
            match engines.get_key_value(dep) {
                Some((dep_key, _)) => {
                    dependents.entry(dep_key).or_default().push(id);
                    if let Some(count) = indegree.get_mut(id) {
                        *count += 1;
                    }
                }
                None => tracing::warn!(
                    event = "configuration_error",
                    engine = %id,
                    upstream = %dep,
                    "Upstream metric has no engine; it will read neutral"
                ),
            }
        }
    }

    let mut ready: VecDeque<&MetricId> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(engines.len());

    while let Some(id) = ready.pop_front() {
        order.push(id.clone());
        if let Some(children) = dependents.get(id) {
            for child in children {
                if let Some(count) = indegree.get_mut(child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*child);
                    }
                }
            }
        }
    }

    if order.len() != engines.len() {
        let stuck: Vec<String> = indegree
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(HomeostatError::ConfigurationError(format!(
            "metric dependency cycle among: {}",
            stuck.join(", ")
        )));
    }

    Ok(order)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Constant {
        id: &'static str,
        value: f64,
        upstream: Vec<&'static str>,
    }

    impl Metric for Constant {
        fn id(&self) -> MetricId {
            MetricId::from(self.id)
        }

        fn upstream(&self) -> Vec<MetricId> {
            self.upstream.iter().map(|s| MetricId::from(*s)).collect()
        }

        fn score(&self, inputs: &MetricInputs<'_>, _previous: Option<&MetricSample>) -> Scored {
            let mut collector = InputCollector::new();
            let mut value = self.value;
            for dep in &self.upstream {
                value = collector.take(*dep, inputs.upstream.latest_value(dep));
            }
            Scored::new(value, collector)
        }
    }

    fn constant(id: &'static str, value: f64, upstream: Vec<&'static str>) -> MetricEngine {
        MetricEngine::new(
            Box::new(Constant {
                id,
                value,
                upstream,
            }),
            4,
            EvictionPolicy::Fifo,
        )
    }

    #[test]
    fn engine_clamps_out_of_range_scores() {
        let mut engine = constant("wild", 3.0, vec![]);
        let params = ParameterSnapshot::new();
        let upstream = BTreeMap::new();
        let inputs = MetricInputs {
            primary: None,
            secondary: None,
            upstream: &upstream,
            parameters: &params,
        };
        let sample = engine.compute(1, Timestamp(0), &inputs);
        assert!((sample.value - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn engine_history_is_bounded() {
        let mut engine = constant("steady", 0.6, vec![]);
        let params = ParameterSnapshot::new();
        let upstream = BTreeMap::new();
        let inputs = MetricInputs {
            primary: None,
            secondary: None,
            upstream: &upstream,
            parameters: &params,
        };
        for cycle in 0..10 {
            engine.compute(cycle, Timestamp(cycle), &inputs);
        }
        assert_eq!(engine.history().len(), 4);
        assert_eq!(engine.latest().map(|s| s.cycle), Some(9));
    }

    #[test]
    fn registry_orders_by_dependency() {
        let registry = MetricRegistry::new(vec![
            constant("c", 0.1, vec!["b"]),
            constant("b", 0.2, vec!["a"]),
            constant("a", 0.3, vec![]),
        ])
        .expect("registry");

        let order: Vec<&str> = registry.order().iter().map(MetricId::as_str).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn registry_propagates_values_within_cycle() {
        let mut registry = MetricRegistry::new(vec![
            constant("b", 0.0, vec!["a"]),
            constant("a", 0.8, vec![]),
        ])
        .expect("registry");

        let samples = registry.run_cycle(1, Timestamp(0), None, None, &ParameterSnapshot::new());
        assert_eq!(samples.len(), 2);
        assert_eq!(registry.latest_value("b"), Some(0.8));
        assert_eq!(registry.latest("b").map(|s| s.inputs[0].substituted), Some(false));
    }

    #[test]
    fn registry_rejects_cycles() {
        let result = MetricRegistry::new(vec![
            constant("a", 0.1, vec!["b"]),
            constant("b", 0.2, vec!["a"]),
        ]);
        assert!(matches!(result, Err(HomeostatError::ConfigurationError(_))));
    }

    #[test]
    fn registry_rejects_duplicates() {
        let result = MetricRegistry::new(vec![
            constant("a", 0.1, vec![]),
            constant("a", 0.2, vec![]),
        ]);
        assert!(matches!(result, Err(HomeostatError::ConfigurationError(_))));
    }

    #[test]
    fn unknown_upstream_reads_neutral() {
        let mut registry =
            MetricRegistry::new(vec![constant("a", 0.9, vec!["ghost"])]).expect("registry");
        registry.run_cycle(1, Timestamp(0), None, None, &ParameterSnapshot::new());

        let sample = registry.latest("a").expect("sample");
        assert!((sample.value - NEUTRAL_SCORE).abs() < f64::EPSILON);
        assert!(sample.inputs[0].substituted);
    }

    #[test]
    fn default_config_builds() {
        let registry = MetricRegistry::from_config(&MetricsConfig::default()).expect("registry");
        assert_eq!(registry.order().len(), 7);
    }
}
