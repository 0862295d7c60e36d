//! Two-party consent over policy decisions.
//!
//! Party A consents when the decision allowed the artifact (outright or
//! modified). Party B consents when the overall score clears its minimum and
//! the artifact is goal aligned. Consent is exchanged at most once per
//! decision: the outcome of every negotiated decision is kept until the gate
//! forgets the decision itself, independently of the bounded record history.

use crate::history::BoundedHistory;
use crate::types::{
    ConsentOutcome, ConsentRecord, ConsentState, HomeostatError, PolicyAction, PolicyDecision,
    Timestamp,
};
use std::collections::BTreeMap;
use std::fmt;

/// One side of the consent exchange.
pub trait ConsentParty: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Whether this party consents, with a short reason.
    fn consent(&self, decision: &PolicyDecision) -> (bool, String);
}

/// Consents when the gate allowed or modified the artifact.
#[derive(Debug, Clone)]
pub struct ActionConsentParty {
    pub name: String,
}

impl ConsentParty for ActionConsentParty {
    fn name(&self) -> &str {
        &self.name
    }

    fn consent(&self, decision: &PolicyDecision) -> (bool, String) {
        let given = matches!(
            decision.action,
            PolicyAction::Allowed | PolicyAction::Modified
        );
        (given, format!("action {}", decision.action.as_str()))
    }
}

/// Consents when the overall score clears `min_overall` and the artifact is
/// goal aligned.
#[derive(Debug, Clone)]
pub struct ScoreConsentParty {
    pub name: String,
    pub min_overall: f64,
}

impl ConsentParty for ScoreConsentParty {
    fn name(&self) -> &str {
        &self.name
    }

    fn consent(&self, decision: &PolicyDecision) -> (bool, String) {
        let given =
            decision.overall_score > self.min_overall && decision.goal_alignment.aligned;
        (
            given,
            format!(
                "overall {:.2} vs {:.2}, {}",
                decision.overall_score,
                self.min_overall,
                if decision.goal_alignment.aligned {
                    "aligned"
                } else {
                    "not aligned"
                }
            ),
        )
    }
}

/// Combine the two consents.
#[must_use]
pub fn outcome_for(party_a: bool, party_b: bool) -> ConsentOutcome {
    match (party_a, party_b) {
        (true, true) => ConsentOutcome::MutualAccept,
        (false, false) => ConsentOutcome::MutualReject,
        _ => ConsentOutcome::Partial,
    }
}

/// Runs the exchange and keeps a bounded record history.
#[derive(Debug)]
pub struct ConsentNegotiator {
    party_a: Box<dyn ConsentParty>,
    party_b: Box<dyn ConsentParty>,
    records: BoundedHistory<ConsentRecord>,
    /// Outcome per negotiated decision id, pruned by [`Self::forget`].
    outcomes: BTreeMap<String, ConsentOutcome>,
}

impl ConsentNegotiator {
    #[must_use]
    pub fn new(
        party_a: Box<dyn ConsentParty>,
        party_b: Box<dyn ConsentParty>,
        capacity: usize,
    ) -> Self {
        Self {
            party_a,
            party_b,
            records: BoundedHistory::new(capacity),
            outcomes: BTreeMap::new(),
        }
    }

    /// Negotiator with the default parties named after the two nodes.
    #[must_use]
    pub fn with_defaults(primary: &str, secondary: &str, min_overall: f64, capacity: usize) -> Self {
        Self::new(
            Box::new(ActionConsentParty {
                name: primary.to_string(),
            }),
            Box::new(ScoreConsentParty {
                name: secondary.to_string(),
                min_overall,
            }),
            capacity,
        )
    }

    /// Exchange consent for `decision`.
    ///
    /// # Errors
    ///
    /// Returns [`HomeostatError::ConsentAlreadyRecorded`] if this decision
    /// was negotiated before, even when its record has since been evicted.
    pub fn negotiate(
        &mut self,
        decision: &PolicyDecision,
        timestamp: Timestamp,
    ) -> Result<ConsentRecord, HomeostatError> {
        if self.outcomes.contains_key(&decision.id) {
            return Err(HomeostatError::ConsentAlreadyRecorded(decision.id.clone()));
        }

        let (party_a_consent, reason_a) = self.party_a.consent(decision);
        let (party_b_consent, reason_b) = self.party_b.consent(decision);
        let outcome = outcome_for(party_a_consent, party_b_consent);

        let record = ConsentRecord {
            decision_id: decision.id.clone(),
            party_a_consent,
            party_b_consent,
            outcome,
            timestamp,
            reasoning: format!(
                "{}: {} ({}); {}: {} ({})",
                self.party_a.name(),
                if party_a_consent { "consents" } else { "declines" },
                reason_a,
                self.party_b.name(),
                if party_b_consent { "consents" } else { "declines" },
                reason_b,
            ),
        };

        tracing::info!(
            event = "consent",
            decision = %record.decision_id,
            outcome = record.outcome.as_str(),
            "Consent negotiated"
        );

        self.outcomes.insert(record.decision_id.clone(), record.outcome);
        self.records.push(record.clone());
        Ok(record)
    }

    /// Drop the outcomes of decisions the gate no longer retains.
    pub fn forget<'a>(&mut self, decision_ids: impl IntoIterator<Item = &'a str>) {
        for id in decision_ids {
            self.outcomes.remove(id);
        }
    }

    #[must_use]
    pub fn record(&self, decision_id: &str) -> Option<&ConsentRecord> {
        self.records.iter().rev().find(|r| r.decision_id == decision_id)
    }

    /// Consent state of a decision; `Pending` until negotiated.
    #[must_use]
    pub fn state(&self, decision_id: &str) -> ConsentState {
        self.outcomes
            .get(decision_id)
            .map_or(ConsentState::Pending, |outcome| (*outcome).into())
    }

    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<ConsentRecord> {
        self.records.recent(limit)
    }

    #[must_use]
    pub fn records(&self) -> Vec<ConsentRecord> {
        self.records.to_vec()
    }

    #[must_use]
    pub fn outcomes(&self) -> BTreeMap<String, ConsentOutcome> {
        self.outcomes.clone()
    }

    /// Replace state. Every retained record counts as negotiated, on top of
    /// the persisted outcomes.
    pub fn restore(
        &mut self,
        records: Vec<ConsentRecord>,
        outcomes: BTreeMap<String, ConsentOutcome>,
    ) {
        self.outcomes = outcomes;
        for record in &records {
            self.outcomes
                .entry(record.decision_id.clone())
                .or_insert(record.outcome);
        }
        self.records = BoundedHistory::from_items(self.records.capacity(), records);
    }
}

#[allow(clippy::unwrap_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::DEFAULT_DECISION_HISTORY;
    use crate::types::GoalAlignment;

    fn negotiator(capacity: usize) -> ConsentNegotiator {
        ConsentNegotiator::with_defaults("individual", "collective", 0.7, capacity)
    }

    fn decision(id: &str, action: PolicyAction, overall: f64, aligned: bool) -> PolicyDecision {
        PolicyDecision {
            id: id.to_string(),
            timestamp: Timestamp(0),
            artifact_id: "art-1".to_string(),
            action,
            score_per_filter: BTreeMap::new(),
            overall_score: overall,
            goal_alignment: GoalAlignment {
                aligned,
                score: if aligned { 0.8 } else { 0.4 },
            },
            reasoning: Vec::new(),
        }
    }

    #[test]
    fn outcome_truth_table() {
        assert_eq!(outcome_for(true, true), ConsentOutcome::MutualAccept);
        assert_eq!(outcome_for(false, false), ConsentOutcome::MutualReject);
        assert_eq!(outcome_for(true, false), ConsentOutcome::Partial);
        assert_eq!(outcome_for(false, true), ConsentOutcome::Partial);
    }

    #[test]
    fn allowed_and_strong_is_mutual_accept() {
        let mut negotiator = negotiator(DEFAULT_DECISION_HISTORY);
        let record = negotiator
            .negotiate(&decision("d-1", PolicyAction::Allowed, 0.9, true), Timestamp(1))
            .unwrap();
        assert_eq!(record.outcome, ConsentOutcome::MutualAccept);
        assert!(record.reasoning.contains("individual: consents"));
    }

    #[test]
    fn modified_but_weak_is_partial() {
        let mut negotiator = negotiator(DEFAULT_DECISION_HISTORY);
        let record = negotiator
            .negotiate(&decision("d-1", PolicyAction::Modified, 0.7, true), Timestamp(1))
            .unwrap();
        assert!(record.party_a_consent);
        assert!(!record.party_b_consent);
        assert_eq!(record.outcome, ConsentOutcome::Partial);
    }

    #[test]
    fn blocked_is_mutual_reject() {
        let mut negotiator = negotiator(DEFAULT_DECISION_HISTORY);
        let record = negotiator
            .negotiate(&decision("d-1", PolicyAction::Blocked, 0.3, false), Timestamp(1))
            .unwrap();
        assert_eq!(record.outcome, ConsentOutcome::MutualReject);
    }

    #[test]
    fn second_negotiation_is_rejected() {
        let mut negotiator = negotiator(DEFAULT_DECISION_HISTORY);
        let d = decision("d-1", PolicyAction::Allowed, 0.9, true);
        negotiator.negotiate(&d, Timestamp(1)).unwrap();
        let err = negotiator.negotiate(&d, Timestamp(2)).unwrap_err();
        assert!(matches!(err, HomeostatError::ConsentAlreadyRecorded(id) if id == "d-1"));
        assert_eq!(negotiator.records().len(), 1);
    }

    #[test]
    fn state_is_pending_until_negotiated() {
        let mut negotiator = negotiator(DEFAULT_DECISION_HISTORY);
        assert_eq!(negotiator.state("d-1"), ConsentState::Pending);
        negotiator
            .negotiate(&decision("d-1", PolicyAction::Flagged, 0.9, true), Timestamp(1))
            .unwrap();
        assert_eq!(negotiator.state("d-1"), ConsentState::Partial);
    }

    #[test]
    fn evicted_record_still_blocks_renegotiation() {
        let mut negotiator = negotiator(2);
        let d1 = decision("d-1", PolicyAction::Allowed, 0.9, true);
        let d2 = decision("d-2", PolicyAction::Allowed, 0.9, true);
        let d3 = decision("d-3", PolicyAction::Allowed, 0.9, true);
        negotiator.negotiate(&d2, Timestamp(1)).unwrap();
        negotiator.negotiate(&d1, Timestamp(2)).unwrap();
        negotiator.negotiate(&d3, Timestamp(3)).unwrap();
        assert!(negotiator.record("d-2").is_none());

        let err = negotiator.negotiate(&d2, Timestamp(4)).unwrap_err();
        assert!(matches!(err, HomeostatError::ConsentAlreadyRecorded(id) if id == "d-2"));
        assert_eq!(negotiator.state("d-2"), ConsentState::MutualAccept);
        assert_eq!(negotiator.records().len(), 2);
    }

    #[test]
    fn forgotten_decisions_become_pending() {
        let mut negotiator = negotiator(2);
        negotiator
            .negotiate(&decision("d-1", PolicyAction::Blocked, 0.3, false), Timestamp(1))
            .unwrap();
        negotiator.forget(["d-1"]);
        assert_eq!(negotiator.state("d-1"), ConsentState::Pending);
        assert!(negotiator.outcomes().is_empty());
    }

    #[test]
    fn restore_keeps_outcomes_of_evicted_records() {
        let mut source = negotiator(1);
        source
            .negotiate(&decision("d-1", PolicyAction::Allowed, 0.9, true), Timestamp(1))
            .unwrap();
        source
            .negotiate(&decision("d-2", PolicyAction::Blocked, 0.3, false), Timestamp(2))
            .unwrap();

        let mut restored = negotiator(1);
        restored.restore(source.records(), source.outcomes());
        let err = restored
            .negotiate(&decision("d-1", PolicyAction::Allowed, 0.9, true), Timestamp(3))
            .unwrap_err();
        assert!(matches!(err, HomeostatError::ConsentAlreadyRecorded(_)));
        assert_eq!(restored.state("d-2"), ConsentState::MutualReject);
    }
}
