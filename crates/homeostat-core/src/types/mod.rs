//! # Core Type Definitions
//!
//! This module contains all core types for the Homeostat engine:
//! - Identifiers and time (`Timestamp`, `NodeId`, `MetricId`)
//! - Node input (`NodeState`, `Goal`)
//! - Derived records (`MetricSample`, `CompositeIndexRecord`, `TuningEvent`,
//!   `DriftReport`, `IndexAlert`)
//! - Gating records (`Artifact`, `PolicyDecision`, `ConsentRecord`)
//! - Memory records (`MemoryFragment`, `MemoryAnchor`)
//! - Error types (`HomeostatError`)
//!
//! ## Persistence Note
//!
//! Everything that ends up in a snapshot is serialized with postcard, so
//! these types stick to plain structs and externally tagged unit enums.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

// =============================================================================
// TIME
// =============================================================================

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` is in the future.
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a state-producing node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a metric engine (and of the metric it produces).
///
/// Borrows as `str` so maps keyed by `MetricId` can be queried with plain
/// component names from configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct MetricId(pub String);

impl MetricId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MetricId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MetricId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// NODE STATE
// =============================================================================

/// A goal reported by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub name: String,
    /// How much the node currently prioritises this goal, in [0,1].
    pub priority: f64,
    /// How firmly the node holds the goal, in [0,1].
    pub strength: f64,
}

impl Goal {
    #[must_use]
    pub fn new(name: impl Into<String>, priority: f64, strength: f64) -> Self {
        Self {
            name: name.into(),
            priority,
            strength,
        }
    }
}

/// A periodic state snapshot produced by one node.
///
/// Produced externally and consumed read-only. The latest state per node is
/// what every metric engine sees during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub node_id: NodeId,
    pub timestamp: Timestamp,
    pub dimension_scores: BTreeMap<String, f64>,
    pub goals: Vec<Goal>,
}

impl NodeState {
    /// Create an empty state for a node.
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>, timestamp: Timestamp) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp,
            dimension_scores: BTreeMap::new(),
            goals: Vec::new(),
        }
    }

    /// Builder-style helper to add a dimension score.
    #[must_use]
    pub fn with_dimension(mut self, name: impl Into<String>, score: f64) -> Self {
        self.dimension_scores.insert(name.into(), score);
        self
    }

    /// Builder-style helper to add a goal.
    #[must_use]
    pub fn with_goal(mut self, goal: Goal) -> Self {
        self.goals.push(goal);
        self
    }

    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<f64> {
        self.dimension_scores.get(name).copied()
    }

    #[must_use]
    pub fn goal(&self, name: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.name == name)
    }
}

// =============================================================================
// METRIC SAMPLES
// =============================================================================

/// One input that fed a metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRef {
    pub source: String,
    pub value: f64,
    /// True when the raw input was missing or invalid and the neutral
    /// default was used instead.
    pub substituted: bool,
}

/// Immutable output of one metric engine for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub engine_id: MetricId,
    pub cycle: u64,
    pub timestamp: Timestamp,
    pub value: f64,
    pub inputs: Vec<InputRef>,
}

impl MetricSample {
    /// Value of the named input, if it was recorded.
    #[must_use]
    pub fn input(&self, source: &str) -> Option<f64> {
        self.inputs
            .iter()
            .find(|i| i.source == source)
            .map(|i| i.value)
    }
}

// =============================================================================
// COMPOSITE INDICES
// =============================================================================

/// One aggregation of weighted metric samples into a named index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeIndexRecord {
    pub index_id: String,
    pub cycle: u64,
    pub timestamp: Timestamp,
    /// Component value actually used (after neutral substitution).
    pub components: BTreeMap<String, f64>,
    /// Normalised weights; always sum to 1.
    pub weights: BTreeMap<String, f64>,
    pub value: f64,
    pub status: String,
}

/// Raised every time an index aggregates below its alert threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexAlert {
    pub index_id: String,
    pub timestamp: Timestamp,
    pub value: f64,
    pub threshold: f64,
    pub status: String,
}

// =============================================================================
// TUNING & DRIFT
// =============================================================================

/// A single invocation of the auto-tune controller. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningEvent {
    pub id: String,
    pub timestamp: Timestamp,
    pub parameter_id: String,
    pub previous: f64,
    pub next: f64,
    pub delta: f64,
    pub reason: String,
}

/// A priority correction applied by the drift monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityAdjustment {
    pub entity: String,
    pub previous: f64,
    pub next: f64,
    pub target: f64,
}

/// Outcome of one drift evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub id: String,
    pub timestamp: Timestamp,
    pub alignment: f64,
    pub drift: f64,
    pub tracked: usize,
    pub recalibrated: bool,
    pub adjustments: Vec<PriorityAdjustment>,
}

// =============================================================================
// POLICY GATING
// =============================================================================

/// A newly generated artifact awaiting gating.
///
/// `attestations` carries per-concern scores declared by the producer
/// (e.g. `"privacy": 0.92`); `goal_refs` names the goals it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub origin: Option<NodeId>,
    #[serde(default)]
    pub attestations: BTreeMap<String, f64>,
    #[serde(default)]
    pub goal_refs: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Artifact {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: String::new(),
            origin: None,
            attestations: BTreeMap::new(),
            goal_refs: BTreeSet::new(),
            tags: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_attestation(mut self, concern: impl Into<String>, score: f64) -> Self {
        self.attestations.insert(concern.into(), score);
        self
    }

    #[must_use]
    pub fn with_goal_ref(mut self, goal: impl Into<String>) -> Self {
        self.goal_refs.insert(goal.into());
        self
    }
}

/// Terminal state of a gated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allowed,
    Blocked,
    Modified,
    Flagged,
}

impl PolicyAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
            Self::Modified => "modified",
            Self::Flagged => "flagged",
        }
    }
}

/// How well an artifact serves the goals currently held by the nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalAlignment {
    pub aligned: bool,
    pub score: f64,
}

/// The gate's verdict on one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub id: String,
    pub timestamp: Timestamp,
    pub artifact_id: String,
    pub action: PolicyAction,
    pub score_per_filter: BTreeMap<String, f64>,
    pub overall_score: f64,
    pub goal_alignment: GoalAlignment,
    pub reasoning: Vec<String>,
}

/// Outcome of the two-party consent exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentOutcome {
    MutualAccept,
    MutualReject,
    Partial,
}

impl ConsentOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MutualAccept => "mutual-accept",
            Self::MutualReject => "mutual-reject",
            Self::Partial => "partial",
        }
    }
}

/// Consent exchanged for exactly one policy decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub decision_id: String,
    pub party_a_consent: bool,
    pub party_b_consent: bool,
    pub outcome: ConsentOutcome,
    pub timestamp: Timestamp,
    pub reasoning: String,
}

/// Consent state of a decision as seen by queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentState {
    Pending,
    MutualAccept,
    MutualReject,
    Partial,
}

impl From<ConsentOutcome> for ConsentState {
    fn from(outcome: ConsentOutcome) -> Self {
        match outcome {
            ConsentOutcome::MutualAccept => Self::MutualAccept,
            ConsentOutcome::MutualReject => Self::MutualReject,
            ConsentOutcome::Partial => Self::Partial,
        }
    }
}

// =============================================================================
// MEMORY
// =============================================================================

/// What happened, as recorded in a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FragmentPayload {
    pub event: String,
    pub outcome: String,
    pub context: BTreeMap<String, String>,
}

impl FragmentPayload {
    #[must_use]
    pub fn new(event: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            outcome: outcome.into(),
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// A single remembered event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub id: String,
    pub timestamp: Timestamp,
    pub node_id: NodeId,
    pub category: String,
    pub payload: FragmentPayload,
    pub significance: f64,
    pub tags: BTreeSet<String>,
}

/// A consolidated summary of a group of fragments.
///
/// Only created by consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAnchor {
    pub id: String,
    pub timestamp: Timestamp,
    pub source_fragment_ids: Vec<String>,
    pub category: String,
    pub tags: BTreeSet<String>,
    pub summary: String,
    pub key_points: Vec<String>,
    pub reliability: f64,
}

/// Result of one consolidation sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub timestamp: Timestamp,
    pub groups_examined: usize,
    pub anchors_created: Vec<String>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Homeostat engine.
///
/// Most of these never reach a caller: compute paths recover (neutral
/// default, renormalise, clamp) and log. The ones that do surface are
/// configuration problems at startup, persistence failures, and consent
/// being negotiated twice.
#[derive(Debug, Error)]
pub enum HomeostatError {
    /// Node input could not be interpreted.
    #[error("Invalid input: {0}")]
    InputError(String),

    /// A snapshot or audit write/read failed.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Configuration is inconsistent (weights, bands, engine graph).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A bounded value left its range.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Consent was already exchanged for this decision.
    #[error("Consent already recorded for decision {0}")]
    ConsentAlreadyRecorded(String),

    /// No decision with this id is retained by the gate.
    #[error("Decision not found: {0}")]
    DecisionNotFound(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_millis_since_saturates() {
        let early = Timestamp::from_millis(100);
        let late = Timestamp::from_millis(250);
        assert_eq!(late.millis_since(early), 150);
        assert_eq!(early.millis_since(late), 0);
    }

    #[test]
    fn metric_id_map_lookup_by_str() {
        let mut map = BTreeMap::new();
        map.insert(MetricId::from("harmony"), 0.7);
        assert_eq!(map.get("harmony"), Some(&0.7));
    }

    #[test]
    fn node_state_builder() {
        let state = NodeState::new("individual", Timestamp(1))
            .with_dimension("coherence", 0.8)
            .with_goal(Goal::new("growth", 0.6, 0.9));

        assert_eq!(state.dimension("coherence"), Some(0.8));
        assert_eq!(state.dimension("missing"), None);
        assert_eq!(state.goal("growth").map(|g| g.priority), Some(0.6));
    }

    #[test]
    fn policy_action_serializes_lowercase() {
        let json = serde_json::to_string(&PolicyAction::Flagged).expect("serialize");
        assert_eq!(json, "\"flagged\"");
    }

    #[test]
    fn consent_outcome_serializes_kebab() {
        let json = serde_json::to_string(&ConsentOutcome::MutualAccept).expect("serialize");
        assert_eq!(json, "\"mutual-accept\"");
        assert_eq!(
            ConsentState::from(ConsentOutcome::Partial),
            ConsentState::Partial
        );
    }

    #[test]
    fn artifact_defaults_missing_fields() {
        let artifact: Artifact = serde_json::from_str(r#"{"id":"art-1"}"#).expect("parse");
        assert_eq!(artifact.id, "art-1");
        assert!(artifact.attestations.is_empty());
        assert!(artifact.origin.is_none());
    }
}
