//! # Policy Gate
//!
//! Every generated artifact is evaluated before it may be persisted:
//!
//! ```text
//! generated → evaluated → { allowed | blocked | modified | flagged }
//!                                   ↓
//!                  consent { pending → mutual-accept | mutual-reject | partial }
//! ```
//!
//! Each active filter scores the artifact through a pluggable
//! [`ConcernScorer`]; the overall score is the mean. Goal alignment comes
//! from a pluggable [`GoalAlignmentScorer`]. The action then follows a fixed
//! precedence (first match wins):
//!
//! 1. overall < 0.5 → blocked
//! 2. overall < 0.7 and not aligned → blocked
//! 3. overall < 0.7 or not aligned → flagged
//! 4. overall < 0.8 → modified
//! 5. otherwise → allowed

pub mod consent;

use crate::history::BoundedHistory;
use crate::invariant::{clamp_unit, sanitize_input};
use crate::primitives::{DEFAULT_DECISION_HISTORY, NEUTRAL_SCORE};
use crate::types::{Artifact, GoalAlignment, PolicyAction, PolicyDecision, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use consent::{
    ActionConsentParty, ConsentNegotiator, ConsentParty, ScoreConsentParty, outcome_for,
};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// A named concern the gate scores artifacts against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyFilter {
    pub id: String,
    /// Scores below this are called out in the decision's reasoning.
    pub threshold: f64,
}

impl PolicyFilter {
    #[must_use]
    pub fn new(id: impl Into<String>, threshold: f64) -> Self {
        Self {
            id: id.into(),
            threshold,
        }
    }
}

/// Gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub filters: Vec<PolicyFilter>,
    /// Filters applied when a caller does not name its own.
    pub active: Vec<String>,
    pub decision_history: usize,
    /// Alignment credit per matching goal reference.
    pub goal_match_credit: f64,
    /// Alignment score an artifact must exceed to count as aligned.
    pub aligned_above: f64,
    /// Overall score the second consent party requires.
    pub consent_min_overall: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let filters = vec![
            PolicyFilter::new("privacy", 0.9),
            PolicyFilter::new("safety", 0.8),
            PolicyFilter::new("transparency", 0.7),
            PolicyFilter::new("beneficence", 0.8),
            PolicyFilter::new("autonomy", 0.7),
            PolicyFilter::new("fairness", 0.8),
        ];
        let active = filters.iter().map(|f| f.id.clone()).collect();
        Self {
            filters,
            active,
            decision_history: DEFAULT_DECISION_HISTORY,
            goal_match_credit: 0.1,
            aligned_above: 0.6,
            consent_min_overall: 0.7,
        }
    }
}

// =============================================================================
// SCORING SEAMS
// =============================================================================

/// Scores one artifact against one filter, in [0,1].
pub trait ConcernScorer: Send + Sync + fmt::Debug {
    fn score(&self, filter: &PolicyFilter, artifact: &Artifact) -> f64;
}

/// Reads the score the producer attested for the filter's concern.
///
/// Missing or invalid attestations score neutral.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttestationScorer;

impl ConcernScorer for AttestationScorer {
    fn score(&self, filter: &PolicyFilter, artifact: &Artifact) -> f64 {
        let (score, substituted) = sanitize_input(artifact.attestations.get(&filter.id).copied());
        if substituted {
            tracing::debug!(
                artifact = %artifact.id,
                filter = %filter.id,
                "No usable attestation; scoring neutral"
            );
        }
        score
    }
}

/// What goal alignment may consult.
#[derive(Debug, Clone, Default)]
pub struct AlignmentContext {
    /// Goal names currently held by either node.
    pub active_goals: BTreeSet<String>,
    /// Latest goal alignment metric value, if any.
    pub fallback: Option<f64>,
}

/// Decides whether an artifact serves the nodes' goals.
pub trait GoalAlignmentScorer: Send + Sync + fmt::Debug {
    fn assess(&self, artifact: &Artifact, context: &AlignmentContext) -> GoalAlignment;
}

/// `0.5 + credit × matching goal references`, capped at 1.
///
/// Artifacts that reference no goals fall back to the latest goal alignment
/// metric (or neutral).
#[derive(Debug, Clone, Copy)]
pub struct GoalReferenceScorer {
    pub credit: f64,
    pub aligned_above: f64,
}

impl GoalAlignmentScorer for GoalReferenceScorer {
    fn assess(&self, artifact: &Artifact, context: &AlignmentContext) -> GoalAlignment {
        let score = if artifact.goal_refs.is_empty() {
            sanitize_input(context.fallback).0
        } else {
            let matches = artifact
                .goal_refs
                .iter()
                .filter(|g| context.active_goals.contains(*g))
                .count();
            (NEUTRAL_SCORE + self.credit * matches as f64).min(1.0)
        };
        GoalAlignment {
            aligned: score > self.aligned_above,
            score,
        }
    }
}

// =============================================================================
// DECISION RULE
// =============================================================================

/// Apply the action precedence.
#[must_use]
pub fn decide(overall: f64, aligned: bool) -> PolicyAction {
    if overall < 0.5 {
        PolicyAction::Blocked
    } else if overall < 0.7 && !aligned {
        PolicyAction::Blocked
    } else if overall < 0.7 || !aligned {
        PolicyAction::Flagged
    } else if overall < 0.8 {
        PolicyAction::Modified
    } else {
        PolicyAction::Allowed
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Running totals over every decision the gate has made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GateStatistics {
    pub total: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub modified: u64,
    pub flagged: u64,
    pub overall_sum: f64,
}

impl GateStatistics {
    fn record(&mut self, decision: &PolicyDecision) {
        self.total += 1;
        self.overall_sum += decision.overall_score;
        match decision.action {
            PolicyAction::Allowed => self.allowed += 1,
            PolicyAction::Blocked => self.blocked += 1,
            PolicyAction::Modified => self.modified += 1,
            PolicyAction::Flagged => self.flagged += 1,
        }
    }

    /// Mean overall score, `None` before the first decision.
    #[must_use]
    pub fn mean_overall(&self) -> Option<f64> {
        (self.total > 0).then(|| self.overall_sum / self.total as f64)
    }

    /// Share of decisions that were allowed, `None` before the first one.
    #[must_use]
    pub fn allowed_ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| self.allowed as f64 / self.total as f64)
    }
}

/// Persisted gate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GateState {
    pub decisions: Vec<PolicyDecision>,
    pub statistics: GateStatistics,
}

// =============================================================================
// POLICY GATE
// =============================================================================

/// Evaluates artifacts and keeps a bounded decision history.
#[derive(Debug)]
pub struct PolicyGate {
    filters: BTreeMap<String, PolicyFilter>,
    active: Vec<String>,
    concern_scorer: Box<dyn ConcernScorer>,
    alignment_scorer: Box<dyn GoalAlignmentScorer>,
    decisions: BoundedHistory<PolicyDecision>,
    statistics: GateStatistics,
    /// Ids pushed out of `decisions` since the last [`PolicyGate::take_evicted`].
    evicted: Vec<String>,
}

impl PolicyGate {
    /// Gate with the default scorers.
    #[must_use]
    pub fn new(config: &PolicyConfig) -> Self {
        Self::with_scorers(
            config,
            Box::new(AttestationScorer),
            Box::new(GoalReferenceScorer {
                credit: config.goal_match_credit,
                aligned_above: config.aligned_above,
            }),
        )
    }

    /// Gate with custom scorers.
    #[must_use]
    pub fn with_scorers(
        config: &PolicyConfig,
        concern_scorer: Box<dyn ConcernScorer>,
        alignment_scorer: Box<dyn GoalAlignmentScorer>,
    ) -> Self {
        Self {
            filters: config
                .filters
                .iter()
                .map(|f| (f.id.clone(), f.clone()))
                .collect(),
            active: config.active.clone(),
            concern_scorer,
            alignment_scorer,
            decisions: BoundedHistory::new(config.decision_history),
            statistics: GateStatistics::default(),
            evicted: Vec::new(),
        }
    }

    /// Filter ids applied by default.
    #[must_use]
    pub fn default_filters(&self) -> &[String] {
        &self.active
    }

    /// Evaluate an artifact against `active_filters`.
    ///
    /// Unknown filter ids are skipped with a warning. With no scored
    /// filters the overall score is neutral.
    pub fn evaluate(
        &mut self,
        artifact: &Artifact,
        active_filters: &[String],
        context: &AlignmentContext,
        timestamp: Timestamp,
        id: String,
    ) -> PolicyDecision {
        let mut score_per_filter = BTreeMap::new();
        let mut reasoning = Vec::new();

        for filter_id in active_filters {
            let Some(filter) = self.filters.get(filter_id) else {
                tracing::warn!(
                    event = "configuration_error",
                    filter = %filter_id,
                    "Unknown policy filter; skipping"
                );
                continue;
            };
            let score = clamp_unit(
                self.concern_scorer.score(filter, artifact),
                &format!("policy.{}", filter.id),
            );
            if score < filter.threshold {
                reasoning.push(format!(
                    "{} score {:.2} below threshold {:.2}",
                    filter.id, score, filter.threshold
                ));
            }
            score_per_filter.insert(filter.id.clone(), score);
        }

        let overall_score = if score_per_filter.is_empty() {
            NEUTRAL_SCORE
        } else {
            score_per_filter.values().sum::<f64>() / score_per_filter.len() as f64
        };

        let goal_alignment = self.alignment_scorer.assess(artifact, context);
        let action = decide(overall_score, goal_alignment.aligned);

        reasoning.push(format!(
            "overall {:.2}, goal alignment {:.2} ({})",
            overall_score,
            goal_alignment.score,
            if goal_alignment.aligned {
                "aligned"
            } else {
                "not aligned"
            }
        ));
        reasoning.push(format!("action: {}", action.as_str()));

        let decision = PolicyDecision {
            id,
            timestamp,
            artifact_id: artifact.id.clone(),
            action,
            score_per_filter,
            overall_score,
            goal_alignment,
            reasoning,
        };

        tracing::info!(
            event = "policy_decision",
            decision = %decision.id,
            artifact = %decision.artifact_id,
            action = decision.action.as_str(),
            overall = decision.overall_score,
            "Artifact evaluated"
        );

        self.statistics.record(&decision);
        if let Some(old) = self.decisions.push(decision.clone()) {
            self.evicted.push(old.id);
        }
        decision
    }

    /// Up to `limit` decisions, newest first.
    #[must_use]
    pub fn recent_decisions(&self, limit: usize) -> Vec<PolicyDecision> {
        self.decisions.recent(limit)
    }

    #[must_use]
    pub fn decision(&self, id: &str) -> Option<&PolicyDecision> {
        self.decisions.iter().rev().find(|d| d.id == id)
    }

    /// Ids of decisions evicted from the history since the last call.
    pub fn take_evicted(&mut self) -> Vec<String> {
        std::mem::take(&mut self.evicted)
    }

    #[must_use]
    pub fn statistics(&self) -> &GateStatistics {
        &self.statistics
    }

    #[must_use]
    pub fn state(&self) -> GateState {
        GateState {
            decisions: self.decisions.to_vec(),
            statistics: self.statistics.clone(),
        }
    }

    pub fn restore(&mut self, state: GateState) {
        self.decisions = BoundedHistory::from_items(self.decisions.capacity(), state.decisions);
        self.statistics = state.statistics;
        self.evicted.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================
