//! # Composite Indices
//!
//! Aggregates the latest metric samples into named health indices.
//!
//! ## Weights
//!
//! - Empty weights: equal split over the available samples.
//! - Weights that do not sum to 1 (within tolerance) are renormalised.
//! - A sum ≤ 0, a negative weight or a non-finite weight falls back to an
//!   equal split over the weighted components (configuration warning).
//! - A weighted component with no sample contributes the neutral score.
//!
//! ## Status Bands
//!
//! Bands are policy data: ordered floors, contiguous and exhaustive. The
//! lowest floor must be 0.0 so every value in [0,1] maps to exactly one band.
//!
//! ## Alerts
//!
//! Level-triggered: every aggregation below the index's alert threshold
//! produces an [`IndexAlert`], not only the first crossing.

use crate::history::BoundedHistory;
use crate::invariant::{clamp_unit, is_unit};
use crate::metrics::builtin;
use crate::primitives::{NEUTRAL_SCORE, WEIGHT_SUM_TOLERANCE};
use crate::types::{CompositeIndexRecord, HomeostatError, IndexAlert, MetricId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// STATUS BANDS
// =============================================================================

/// A named status applying to values at or above `floor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBand {
    pub name: String,
    pub floor: f64,
}

impl StatusBand {
    #[must_use]
    pub fn new(name: impl Into<String>, floor: f64) -> Self {
        Self {
            name: name.into(),
            floor,
        }
    }
}

/// Validated, descending status bands.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusBands {
    bands: Vec<StatusBand>,
}

impl StatusBands {
    /// Validate and sort bands.
    ///
    /// Rejects empty sets, floors outside [0,1], duplicate floors, and sets
    /// whose lowest floor is not 0.0.
    pub fn new(mut bands: Vec<StatusBand>) -> Result<Self, HomeostatError> {
        if bands.is_empty() {
            return Err(HomeostatError::ConfigurationError(
                "status bands must not be empty".to_string(),
            ));
        }
        if let Some(bad) = bands.iter().find(|b| !is_unit(b.floor)) {
            return Err(HomeostatError::ConfigurationError(format!(
                "band '{}' floor {} outside [0,1]",
                bad.name, bad.floor
            )));
        }

        bands.sort_by(|a, b| b.floor.total_cmp(&a.floor));

        for pair in bands.windows(2) {
            if pair[0].floor.total_cmp(&pair[1].floor).is_eq() {
                return Err(HomeostatError::ConfigurationError(format!(
                    "bands '{}' and '{}' share floor {}",
                    pair[0].name, pair[1].name, pair[0].floor
                )));
            }
        }

        match bands.last() {
            Some(lowest) if lowest.floor == 0.0 => Ok(Self { bands }),
            _ => Err(HomeostatError::ConfigurationError(
                "lowest status band must start at 0.0".to_string(),
            )),
        }
    }

    /// The band a value falls into.
    #[must_use]
    pub fn classify(&self, value: f64) -> &str {
        self.bands
            .iter()
            .find(|band| value >= band.floor)
            .or_else(|| self.bands.last())
            .map(|band| band.name.as_str())
            .unwrap_or("unknown")
    }

    #[must_use]
    pub fn bands(&self) -> &[StatusBand] {
        &self.bands
    }
}

// =============================================================================
// INDEX DEFINITIONS
// =============================================================================

/// Index definition as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub id: String,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    pub bands: Vec<StatusBand>,
    pub alert_below: f64,
}

impl IndexConfig {
    /// Harmony, coherence and consent stability.
    #[must_use]
    pub fn harmonic_health() -> Self {
        Self {
            id: "harmonic_health".to_string(),
            weights: BTreeMap::from([
                (builtin::HARMONY.to_string(), 0.4),
                (builtin::DIMENSION_COHERENCE.to_string(), 0.35),
                (builtin::CONSENT_STABILITY.to_string(), 0.25),
            ]),
            bands: vec![
                StatusBand::new("harmonic", 0.8),
                StatusBand::new("balanced", 0.7),
                StatusBand::new("divergent", 0.6),
                StatusBand::new("decoherent", 0.5),
                StatusBand::new("critical", 0.0),
            ],
            alert_below: 0.6,
        }
    }

    /// Equilibrium and stability; read by the auto-tune controller.
    #[must_use]
    pub fn equilibrium() -> Self {
        Self {
            id: "equilibrium".to_string(),
            weights: BTreeMap::from([
                (builtin::EQUILIBRIUM.to_string(), 0.6),
                (builtin::STABILITY.to_string(), 0.4),
            ]),
            bands: vec![
                StatusBand::new("optimal", 0.8),
                StatusBand::new("acceptable", 0.7),
                StatusBand::new("degraded", 0.6),
                StatusBand::new("critical", 0.0),
            ],
            alert_below: 0.6,
        }
    }

    /// Overall health of the node pair.
    #[must_use]
    pub fn collective_health() -> Self {
        Self {
            id: "collective_health".to_string(),
            weights: BTreeMap::from([
                (builtin::GOAL_ALIGNMENT.to_string(), 0.5),
                (builtin::STABILITY.to_string(), 0.25),
                (builtin::DIMENSION_COHERENCE.to_string(), 0.25),
            ]),
            bands: vec![
                StatusBand::new("healthy", 0.7),
                StatusBand::new("degraded", 0.5),
                StatusBand::new("critical", 0.0),
            ],
            alert_below: 0.5,
        }
    }

    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::harmonic_health(),
            Self::equilibrium(),
            Self::collective_health(),
        ]
    }
}

/// A validated index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub id: String,
    pub weights: BTreeMap<String, f64>,
    pub bands: StatusBands,
    pub alert_below: f64,
}

impl TryFrom<IndexConfig> for IndexDefinition {
    type Error = HomeostatError;

    fn try_from(config: IndexConfig) -> Result<Self, Self::Error> {
        let bands = StatusBands::new(config.bands).map_err(|e| {
            HomeostatError::ConfigurationError(format!("index '{}': {}", config.id, e))
        })?;
        if !is_unit(config.alert_below) {
            return Err(HomeostatError::ConfigurationError(format!(
                "index '{}': alert threshold {} outside [0,1]",
                config.id, config.alert_below
            )));
        }
        Ok(Self {
            id: config.id,
            weights: config.weights,
            bands,
            alert_below: config.alert_below,
        })
    }
}

// =============================================================================
// WEIGHTING
// =============================================================================

/// Resolve the effective, normalised weights for an aggregation.
///
/// The returned weights always sum to 1 (unless there is nothing to weigh).
pub fn normalize_weights(
    samples: &BTreeMap<MetricId, f64>,
    weights: &BTreeMap<String, f64>,
) -> BTreeMap<String, f64> {
    if weights.is_empty() {
        return equal_split(samples.keys().map(|k| k.as_str().to_string()));
    }

    let valid = weights.values().all(|w| w.is_finite() && *w >= 0.0);
    let sum: f64 = weights.values().sum();

    if !valid || !sum.is_finite() || sum <= 0.0 {
        tracing::warn!(
            event = "configuration_error",
            sum,
            "Composite weights unusable; falling back to equal split"
        );
        return equal_split(weights.keys().cloned());
    }

    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        tracing::warn!(
            event = "configuration_error",
            sum,
            "Composite weights do not sum to 1; renormalising"
        );
    }
    weights
        .iter()
        .map(|(component, weight)| (component.clone(), weight / sum))
        .collect()
}

fn equal_split(components: impl Iterator<Item = String>) -> BTreeMap<String, f64> {
    let components: Vec<String> = components.collect();
    if components.is_empty() {
        return BTreeMap::new();
    }
    let share = 1.0 / components.len() as f64;
    components.into_iter().map(|c| (c, share)).collect()
}

/// Weighted value of `samples` under normalised `weights`.
///
/// Returns the value and the component values actually used.
pub fn weighted_value(
    samples: &BTreeMap<MetricId, f64>,
    weights: &BTreeMap<String, f64>,
) -> (f64, BTreeMap<String, f64>) {
    if weights.is_empty() {
        return (NEUTRAL_SCORE, BTreeMap::new());
    }

    let mut value = 0.0;
    let mut components = BTreeMap::new();
    for (component, weight) in weights {
        let sample = match samples.get(component.as_str()) {
            Some(v) => *v,
            None => {
                tracing::warn!(
                    event = "input_defaulted",
                    component = %component,
                    "Composite component has no sample; using neutral"
                );
                NEUTRAL_SCORE
            }
        };
        value += weight * sample;
        components.insert(component.clone(), sample);
    }
    (value, components)
}

// =============================================================================
// AGGREGATOR
// =============================================================================

/// One aggregated record plus the alert it raised, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationOutcome {
    pub record: CompositeIndexRecord,
    pub alert: Option<IndexAlert>,
}

/// Holds index definitions and a bounded record history per index.
#[derive(Debug)]
pub struct CompositeIndexAggregator {
    definitions: Vec<IndexDefinition>,
    history: BTreeMap<String, BoundedHistory<CompositeIndexRecord>>,
    capacity: usize,
}

impl CompositeIndexAggregator {
    pub fn new(indices: Vec<IndexConfig>, capacity: usize) -> Result<Self, HomeostatError> {
        let mut definitions = Vec::with_capacity(indices.len());
        for config in indices {
            let definition = IndexDefinition::try_from(config)?;
            if definitions
                .iter()
                .any(|d: &IndexDefinition| d.id == definition.id)
            {
                return Err(HomeostatError::ConfigurationError(format!(
                    "duplicate index '{}'",
                    definition.id
                )));
            }
            definitions.push(definition);
        }
        let history = definitions
            .iter()
            .map(|d| (d.id.clone(), BoundedHistory::new(capacity)))
            .collect();
        Ok(Self {
            definitions,
            history,
            capacity,
        })
    }

    /// Aggregate one index from the latest samples. Pure; nothing is stored.
    pub fn aggregate(
        definition: &IndexDefinition,
        samples: &BTreeMap<MetricId, f64>,
        cycle: u64,
        timestamp: Timestamp,
    ) -> AggregationOutcome {
        let weights = normalize_weights(samples, &definition.weights);
        let (raw, components) = weighted_value(samples, &weights);
        let value = clamp_unit(raw, &definition.id);
        let status = definition.bands.classify(value).to_string();

        let alert = (value < definition.alert_below).then(|| IndexAlert {
            index_id: definition.id.clone(),
            timestamp,
            value,
            threshold: definition.alert_below,
            status: status.clone(),
        });

        AggregationOutcome {
            record: CompositeIndexRecord {
                index_id: definition.id.clone(),
                cycle,
                timestamp,
                components,
                weights,
                value,
                status,
            },
            alert,
        }
    }

    /// Aggregate every index and append the records to their histories.
    pub fn run(
        &mut self,
        samples: &BTreeMap<MetricId, f64>,
        cycle: u64,
        timestamp: Timestamp,
    ) -> Vec<AggregationOutcome> {
        let mut outcomes = Vec::with_capacity(self.definitions.len());
        for definition in &self.definitions {
            let outcome = Self::aggregate(definition, samples, cycle, timestamp);
            if let Some(alert) = &outcome.alert {
                tracing::warn!(
                    event = "index_alert",
                    index = %alert.index_id,
                    value = alert.value,
                    threshold = alert.threshold,
                    status = %alert.status,
                    "Composite index below alert threshold"
                );
            }
            self.history
                .entry(definition.id.clone())
                .or_insert_with(|| BoundedHistory::new(self.capacity))
                .push(outcome.record.clone());
            outcomes.push(outcome);
        }
        outcomes
    }

    #[must_use]
    pub fn latest(&self, index_id: &str) -> Option<&CompositeIndexRecord> {
        self.history.get(index_id).and_then(BoundedHistory::latest)
    }

    /// Up to `limit` records, newest first.
    #[must_use]
    pub fn history(&self, index_id: &str, limit: usize) -> Vec<CompositeIndexRecord> {
        self.history
            .get(index_id)
            .map(|h| h.recent(limit))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn definitions(&self) -> &[IndexDefinition] {
        &self.definitions
    }

    #[must_use]
    pub fn histories(&self) -> BTreeMap<String, Vec<CompositeIndexRecord>> {
        self.history
            .iter()
            .map(|(id, h)| (id.clone(), h.to_vec()))
            .collect()
    }

    /// Restore histories; records for unknown indices are dropped.
    pub fn restore(&mut self, histories: BTreeMap<String, Vec<CompositeIndexRecord>>) {
        for (id, records) in histories {
            if self.definitions.iter().any(|d| d.id == id) {
                self.history
                    .insert(id, BoundedHistory::from_items(self.capacity, records));
            } else {
                tracing::warn!(index = %id, "Snapshot holds history for unknown index; dropping");
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(pairs: &[(&str, f64)]) -> BTreeMap<MetricId, f64> {
        pairs
            .iter()
            .map(|(k, v)| (MetricId::from(*k), *v))
            .collect()
    }

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn sum(w: &BTreeMap<String, f64>) -> f64 {
        w.values().sum()
    }

    #[test]
    fn bands_must_end_at_zero() {
        let result = StatusBands::new(vec![StatusBand::new("ok", 0.5)]);
        assert!(matches!(result, Err(HomeostatError::ConfigurationError(_))));
    }

    #[test]
    fn bands_reject_duplicate_floors() {
        let result = StatusBands::new(vec![
            StatusBand::new("a", 0.5),
            StatusBand::new("b", 0.5),
            StatusBand::new("c", 0.0),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn bands_classify_in_any_input_order() {
        let bands = StatusBands::new(vec![
            StatusBand::new("critical", 0.0),
            StatusBand::new("harmonic", 0.8),
            StatusBand::new("balanced", 0.7),
        ])
        .expect("bands");

        assert_eq!(bands.classify(0.95), "harmonic");
        assert_eq!(bands.classify(0.8), "harmonic");
        assert_eq!(bands.classify(0.75), "balanced");
        assert_eq!(bands.classify(0.1), "critical");
        assert_eq!(bands.classify(0.0), "critical");
    }

    #[test]
    fn empty_weights_split_equally() {
        let s = samples(&[("a", 0.2), ("b", 0.8)]);
        let w = normalize_weights(&s, &BTreeMap::new());
        assert_eq!(w.len(), 2);
        assert!((w["a"] - 0.5).abs() < 1e-12);
        let (value, _) = weighted_value(&s, &w);
        assert!((value - 0.5).abs() < 1e-12);
    }

    #[test]
    fn non_unit_weights_are_renormalised() {
        let s = samples(&[("a", 1.0), ("b", 0.0)]);
        let w = normalize_weights(&s, &weights(&[("a", 3.0), ("b", 1.0)]));
        assert!((sum(&w) - 1.0).abs() < 1e-12);
        let (value, _) = weighted_value(&s, &w);
        assert!((value - 0.75).abs() < 1e-12);
    }

    #[test]
    fn zero_sum_weights_fall_back_to_equal_split() {
        let s = samples(&[("a", 1.0), ("b", 0.0)]);
        let w = normalize_weights(&s, &weights(&[("a", 0.0), ("b", 0.0)]));
        assert!((w["a"] - 0.5).abs() < 1e-12);
        assert!((w["b"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn negative_weight_falls_back_to_equal_split() {
        let s = samples(&[("a", 1.0), ("b", 0.0)]);
        let w = normalize_weights(&s, &weights(&[("a", 2.0), ("b", -1.0)]));
        assert!((w["a"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn missing_component_contributes_neutral() {
        let s = samples(&[("a", 1.0)]);
        let w = normalize_weights(&s, &weights(&[("a", 0.5), ("ghost", 0.5)]));
        let (value, components) = weighted_value(&s, &w);
        assert!((value - 0.75).abs() < 1e-12);
        assert_eq!(components.get("ghost"), Some(&NEUTRAL_SCORE));
    }

    #[test]
    fn alert_is_level_triggered() {
        let mut aggregator =
            CompositeIndexAggregator::new(vec![IndexConfig::collective_health()], 10)
                .expect("aggregator");
        let low = samples(&[
            ("goal_alignment", 0.2),
            ("stability", 0.2),
            ("dimension_coherence", 0.2),
        ]);

        let first = aggregator.run(&low, 1, Timestamp(1));
        let second = aggregator.run(&low, 2, Timestamp(2));
        assert!(first[0].alert.is_some());
        assert!(second[0].alert.is_some());
        assert_eq!(first[0].record.status, "critical");
    }

    #[test]
    fn history_is_bounded_per_index() {
        let mut aggregator =
            CompositeIndexAggregator::new(vec![IndexConfig::equilibrium()], 3).expect("aggregator");
        let s = samples(&[("equilibrium", 0.9), ("stability", 0.9)]);
        for cycle in 0..7 {
            aggregator.run(&s, cycle, Timestamp(cycle));
        }
        assert_eq!(aggregator.history("equilibrium", 100).len(), 3);
        assert_eq!(aggregator.latest("equilibrium").map(|r| r.cycle), Some(6));
        assert_eq!(
            aggregator.latest("equilibrium").map(|r| r.status.as_str()),
            Some("optimal")
        );
    }

    #[test]
    fn default_indices_are_valid() {
        let aggregator = CompositeIndexAggregator::new(IndexConfig::defaults(), 10).unwrap();
        assert_eq!(aggregator.definitions().len(), 3);
    }

    #[test]
    fn duplicate_index_ids_rejected() {
        let result = CompositeIndexAggregator::new(
            vec![IndexConfig::equilibrium(), IndexConfig::equilibrium()],
            10,
        );
        assert!(result.is_err());
    }
}
