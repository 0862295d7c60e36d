//! # Homeostat
//!
//! The orchestrator. Owns every component, each behind its own lock, and
//! exposes the operations the scheduler, CLI and API drive.
//!
//! ## Locking
//!
//! No method holds two locks at once. Values crossing components (latest
//! metrics into the aggregator, the latest index into the tuner, gate
//! statistics into the next sampling cycle) are copied out under one lock
//! and handed over under the next. Poisoned locks are recovered: every
//! component's state is valid between method calls.
//!
//! ## Side effects
//!
//! Tuning events, index alerts, drift reports, policy decisions, consent
//! records and consolidation reports go to the [`AuditSink`]. Tuning,
//! drift, decision and consent outcomes are also stored as memory
//! fragments.

use crate::autotune::{AutoTuneController, TuningState};
use crate::clock::{Clock, IdSource};
use crate::composite::CompositeIndexAggregator;
use crate::config::HomeostatConfig;
use crate::drift::{DriftMonitor, PriorityShift, TrackedEntity};
use crate::formats::{AuditRecord, AuditSink, MonitorSnapshot};
use crate::ingest::parse_node_states;
use crate::memory::{AnchorFilter, FragmentFilter, MemoryGrid, MemoryStatistics};
use crate::metrics::builtin::{ALLOWED_RATIO, COUPLING_STRENGTH, GOAL_ALIGNMENT};
use crate::metrics::{MetricRegistry, ParameterSnapshot};
use crate::policy::{AlignmentContext, ConsentNegotiator, GateStatistics, PolicyGate};
use crate::types::{
    Artifact, CompositeIndexRecord, ConsentRecord, ConsentState, ConsolidationReport,
    DriftReport, FragmentPayload, HomeostatError, MemoryAnchor, MemoryFragment, MetricId,
    MetricSample, NodeId, NodeState, PolicyAction, PolicyDecision, TuningEvent,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Node id recorded on fragments the monitor writes about itself.
pub const MONITOR_NODE: &str = "homeostat";

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of submitting an artifact: the gate's decision plus consent.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub decision: PolicyDecision,
    pub consent: ConsentRecord,
}

/// Process-wide monitor. Share it behind an `Arc`.
#[derive(Debug)]
pub struct Homeostat {
    config: HomeostatConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
    audit: Arc<dyn AuditSink>,
    cycle: AtomicU64,
    nodes: RwLock<BTreeMap<NodeId, NodeState>>,
    metrics: RwLock<MetricRegistry>,
    indices: RwLock<CompositeIndexAggregator>,
    tuner: RwLock<AutoTuneController>,
    drift: RwLock<DriftMonitor>,
    gate: RwLock<PolicyGate>,
    consent: RwLock<ConsentNegotiator>,
    memory: RwLock<MemoryGrid>,
}

impl Homeostat {
    /// Build a monitor from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HomeostatError::ConfigurationError`] for inconsistent
    /// configuration (bad bands, duplicate ids, engine dependency cycles).
    pub fn new(
        config: HomeostatConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, HomeostatError> {
        config.validate()?;

        let metrics = MetricRegistry::from_config(&config.metrics)?;
        let indices = CompositeIndexAggregator::new(config.indices.clone(), config.index_history)?;
        let tuner = AutoTuneController::new(config.autotune.clone());
        let drift = DriftMonitor::new(config.drift.clone());
        let gate = PolicyGate::new(&config.policy);
        let consent = ConsentNegotiator::with_defaults(
            config.nodes.primary.as_str(),
            config.nodes.secondary.as_str(),
            config.policy.consent_min_overall,
            config.policy.decision_history,
        );
        let memory = MemoryGrid::new(config.memory.clone());

        tracing::info!(
            engines = metrics.order().len(),
            indices = indices.definitions().len(),
            primary = %config.nodes.primary,
            secondary = %config.nodes.secondary,
            "Homeostat initialized"
        );

        Ok(Self {
            config,
            clock,
            ids,
            audit,
            cycle: AtomicU64::new(0),
            nodes: RwLock::new(BTreeMap::new()),
            metrics: RwLock::new(metrics),
            indices: RwLock::new(indices),
            tuner: RwLock::new(tuner),
            drift: RwLock::new(drift),
            gate: RwLock::new(gate),
            consent: RwLock::new(consent),
            memory: RwLock::new(memory),
        })
    }

    #[must_use]
    pub fn config(&self) -> &HomeostatConfig {
        &self.config
    }

    /// Last completed sampling cycle (0 before the first).
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    // =========================================================================
    // INGESTION
    // =========================================================================

    /// Accept a node's latest state and resync drift entities.
    pub fn ingest_node_state(&self, state: NodeState) {
        let node = state.node_id.clone();
        if node != self.config.nodes.primary && node != self.config.nodes.secondary {
            tracing::warn!(
                event = "unknown_node",
                node = %node,
                "State from a node outside the monitored pair; stored but not scored"
            );
        }

        let (primary, secondary) = {
            let mut nodes = write(&self.nodes);
            nodes.insert(node.clone(), state);
            (
                nodes.get(&self.config.nodes.primary).cloned(),
                nodes.get(&self.config.nodes.secondary).cloned(),
            )
        };

        write(&self.drift).sync(primary.as_ref(), secondary.as_ref());
        tracing::debug!(node = %node, "Node state ingested");
    }

    /// Parse and ingest raw JSON (one state or an array).
    ///
    /// Returns the number of states ingested.
    pub fn ingest_json(&self, raw: &[u8]) -> Result<usize, HomeostatError> {
        let states = parse_node_states(raw, self.clock.now())?;
        let count = states.len();
        for state in states {
            self.ingest_node_state(state);
        }
        Ok(count)
    }

    #[must_use]
    pub fn node_state(&self, node: &str) -> Option<NodeState> {
        read(&self.nodes).get(&NodeId::from(node)).cloned()
    }

    #[must_use]
    pub fn node_states(&self) -> Vec<NodeState> {
        read(&self.nodes).values().cloned().collect()
    }

    fn pair(&self) -> (Option<NodeState>, Option<NodeState>) {
        let nodes = read(&self.nodes);
        (
            nodes.get(&self.config.nodes.primary).cloned(),
            nodes.get(&self.config.nodes.secondary).cloned(),
        )
    }

    // =========================================================================
    // CONTROL LOOP
    // =========================================================================

    /// Run every metric engine once.
    pub fn sample_cycle(&self) -> Vec<MetricSample> {
        let mut parameters =
            ParameterSnapshot::new().with(COUPLING_STRENGTH, read(&self.tuner).current());
        if let Some(ratio) = read(&self.gate).statistics().allowed_ratio() {
            parameters.set(ALLOWED_RATIO, ratio);
        }
        let (primary, secondary) = self.pair();
        let timestamp = self.clock.now();

        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        write(&self.metrics).run_cycle(
            cycle,
            timestamp,
            primary.as_ref(),
            secondary.as_ref(),
            &parameters,
        )
    }

    /// Aggregate every composite index from the latest samples.
    pub fn aggregate_cycle(&self) -> Vec<CompositeIndexRecord> {
        let samples = read(&self.metrics).latest_values();
        let timestamp = self.clock.now();
        let outcomes = write(&self.indices).run(&samples, self.cycle(), timestamp);

        let mut records = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            if let Some(alert) = outcome.alert {
                self.audit.record(AuditRecord::Alert(alert));
            }
            records.push(outcome.record);
        }
        records
    }

    /// One auto-tune step against the configured index.
    pub fn autotune_tick(&self) -> TuningEvent {
        let latest = read(&self.indices)
            .latest(&self.config.autotune.index_id)
            .cloned();
        let id = self.ids.next_id("tune");
        let event = write(&self.tuner).tick(latest.as_ref(), self.clock.now(), id);

        self.audit.record(AuditRecord::Tuning(event.clone()));
        let direction = if event.delta > 0.0 {
            "increase"
        } else if event.delta < 0.0 {
            "decrease"
        } else {
            "hold"
        };
        self.remember(
            "tuning",
            FragmentPayload::new("tuning", direction)
                .with_context("parameter", event.parameter_id.clone())
                .with_context("next", format!("{:.3}", event.next)),
            if event.delta == 0.0 { 0.3 } else { 0.6 },
            &["tuning", direction],
        );
        event
    }

    /// Evaluate drift and recalibrate if needed.
    pub fn drift_tick(&self) -> DriftReport {
        let id = self.ids.next_id("drift");
        let report = write(&self.drift).tick(self.clock.now(), id);

        self.audit.record(AuditRecord::Drift(report.clone()));
        let outcome = if report.recalibrated {
            "recalibrated"
        } else {
            "stable"
        };
        self.remember(
            "drift",
            FragmentPayload::new("drift_check", outcome)
                .with_context("drift", format!("{:.3}", report.drift))
                .with_context("adjusted", report.adjustments.len().to_string()),
            report.drift,
            &["drift", outcome],
        );
        report
    }

    /// One memory consolidation sweep.
    pub fn consolidate(&self) -> ConsolidationReport {
        let report = write(&self.memory).consolidate(self.clock.now(), self.ids.as_ref());
        self.audit.record(AuditRecord::Consolidation(report.clone()));
        report
    }

    // =========================================================================
    // POLICY
    // =========================================================================

    /// Gate an artifact. `filters` defaults to the configured active set.
    pub fn evaluate_artifact(
        &self,
        artifact: &Artifact,
        filters: Option<&[String]>,
    ) -> PolicyDecision {
        let active_goals: BTreeSet<String> = {
            let nodes = read(&self.nodes);
            [&self.config.nodes.primary, &self.config.nodes.secondary]
                .into_iter()
                .filter_map(|id| nodes.get(id))
                .flat_map(|state| state.goals.iter().map(|g| g.name.clone()))
                .collect()
        };
        let context = AlignmentContext {
            active_goals,
            fallback: read(&self.metrics).latest(GOAL_ALIGNMENT).map(|s| s.value),
        };

        let id = self.ids.next_id("decision");
        let timestamp = self.clock.now();
        let (decision, evicted) = {
            let mut gate = write(&self.gate);
            let filters = filters.map_or_else(|| gate.default_filters().to_vec(), <[String]>::to_vec);
            let decision = gate.evaluate(artifact, &filters, &context, timestamp, id);
            (decision, gate.take_evicted())
        };
        if !evicted.is_empty() {
            write(&self.consent).forget(evicted.iter().map(String::as_str));
        }

        self.audit.record(AuditRecord::Decision(decision.clone()));
        self.remember(
            "decision",
            FragmentPayload::new("policy_decision", decision.action.as_str())
                .with_context("artifact", decision.artifact_id.clone())
                .with_context("overall", format!("{:.3}", decision.overall_score)),
            match decision.action {
                PolicyAction::Allowed => 0.3,
                PolicyAction::Modified => 0.5,
                PolicyAction::Flagged => 0.7,
                PolicyAction::Blocked => 0.9,
            },
            &["policy", decision.action.as_str()],
        );
        decision
    }

    /// Exchange consent for a retained decision.
    ///
    /// # Errors
    ///
    /// [`HomeostatError::DecisionNotFound`] if the gate no longer holds the
    /// decision; [`HomeostatError::ConsentAlreadyRecorded`] on a second
    /// negotiation.
    pub fn negotiate(&self, decision_id: &str) -> Result<ConsentRecord, HomeostatError> {
        let decision = read(&self.gate)
            .decision(decision_id)
            .cloned()
            .ok_or_else(|| HomeostatError::DecisionNotFound(decision_id.to_string()))?;

        let record = write(&self.consent).negotiate(&decision, self.clock.now())?;

        self.audit.record(AuditRecord::Consent(record.clone()));
        self.remember(
            "consent",
            FragmentPayload::new("consent", record.outcome.as_str())
                .with_context("decision", record.decision_id.clone()),
            if record.party_a_consent && record.party_b_consent {
                0.4
            } else {
                0.8
            },
            &["consent", record.outcome.as_str()],
        );
        Ok(record)
    }

    /// Evaluate an artifact and immediately negotiate consent.
    pub fn submit_artifact(
        &self,
        artifact: &Artifact,
        filters: Option<&[String]>,
    ) -> Result<Submission, HomeostatError> {
        let decision = self.evaluate_artifact(artifact, filters);
        let consent = self.negotiate(&decision.id)?;
        Ok(Submission { decision, consent })
    }

    // =========================================================================
    // MEMORY
    // =========================================================================

    /// Store a fragment reported by a node. Returns the fragment id.
    pub fn store_fragment(
        &self,
        node_id: NodeId,
        category: &str,
        payload: FragmentPayload,
        significance: f64,
        tags: BTreeSet<String>,
    ) -> String {
        let fragment = MemoryFragment {
            id: self.ids.next_id("frag"),
            timestamp: self.clock.now(),
            node_id,
            category: category.to_string(),
            payload,
            significance,
            tags,
        };
        let id = fragment.id.clone();
        write(&self.memory).store_fragment(fragment);
        id
    }

    fn remember(&self, category: &str, payload: FragmentPayload, significance: f64, tags: &[&str]) {
        self.store_fragment(
            NodeId::from(MONITOR_NODE),
            category,
            payload,
            significance,
            tags.iter().map(|t| (*t).to_string()).collect(),
        );
    }

    #[must_use]
    pub fn retrieve_fragments(&self, filter: &FragmentFilter, limit: usize) -> Vec<MemoryFragment> {
        read(&self.memory).retrieve_fragments(filter, limit)
    }

    #[must_use]
    pub fn retrieve_anchors(&self, filter: &AnchorFilter, limit: usize) -> Vec<MemoryAnchor> {
        read(&self.memory).retrieve_anchors(filter, limit)
    }

    #[must_use]
    pub fn memory_statistics(&self) -> MemoryStatistics {
        read(&self.memory).statistics()
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    #[must_use]
    pub fn latest_metrics(&self) -> BTreeMap<MetricId, f64> {
        read(&self.metrics).latest_values()
    }

    #[must_use]
    pub fn metric_history(&self, id: &str, limit: usize) -> Vec<MetricSample> {
        read(&self.metrics).history(id, limit)
    }

    #[must_use]
    pub fn latest_index(&self, index_id: &str) -> Option<CompositeIndexRecord> {
        read(&self.indices).latest(index_id).cloned()
    }

    #[must_use]
    pub fn index_history(&self, index_id: &str, limit: usize) -> Vec<CompositeIndexRecord> {
        read(&self.indices).history(index_id, limit)
    }

    #[must_use]
    pub fn index_ids(&self) -> Vec<String> {
        read(&self.indices)
            .definitions()
            .iter()
            .map(|d| d.id.clone())
            .collect()
    }

    #[must_use]
    pub fn tuning_state(&self, limit: usize) -> TuningState {
        read(&self.tuner).state(limit)
    }

    #[must_use]
    pub fn drift_entities(&self) -> Vec<TrackedEntity> {
        read(&self.drift).entities()
    }

    /// Reported priority shifts, newest first.
    #[must_use]
    pub fn drift_shifts(&self, limit: usize) -> Vec<PriorityShift> {
        read(&self.drift).shifts(limit)
    }

    #[must_use]
    pub fn last_drift_report(&self) -> Option<DriftReport> {
        read(&self.drift).last_report().cloned()
    }

    #[must_use]
    pub fn recent_decisions(&self, limit: usize) -> Vec<PolicyDecision> {
        read(&self.gate).recent_decisions(limit)
    }

    #[must_use]
    pub fn gate_statistics(&self) -> GateStatistics {
        read(&self.gate).statistics().clone()
    }

    #[must_use]
    pub fn consent_state(&self, decision_id: &str) -> ConsentState {
        read(&self.consent).state(decision_id)
    }

    #[must_use]
    pub fn consent_record(&self, decision_id: &str) -> Option<ConsentRecord> {
        read(&self.consent).record(decision_id).cloned()
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Copy out the whole state.
    #[must_use]
    pub fn snapshot(&self) -> MonitorSnapshot {
        let (coupling_strength, tuning_events) = {
            let tuner = read(&self.tuner);
            (tuner.current(), tuner.all_events())
        };
        MonitorSnapshot {
            taken_at: self.clock.now(),
            cycle: self.cycle(),
            id_position: self.ids.position(),
            coupling_strength,
            tuning_events,
            metric_histories: read(&self.metrics).histories(),
            index_histories: read(&self.indices).histories(),
            drift: read(&self.drift).state(),
            gate: read(&self.gate).state(),
            consents: read(&self.consent).records(),
            consent_outcomes: read(&self.consent).outcomes(),
            memory: read(&self.memory).state(),
            node_states: self.node_states(),
        }
    }

    /// Replace state with a snapshot's. Histories are trimmed to the
    /// configured capacities.
    pub fn restore(&self, snapshot: MonitorSnapshot) {
        self.cycle.store(snapshot.cycle, Ordering::SeqCst);
        self.ids.restore(snapshot.id_position);

        *write(&self.nodes) = snapshot
            .node_states
            .into_iter()
            .map(|s| (s.node_id.clone(), s))
            .collect();
        write(&self.tuner).restore(snapshot.coupling_strength, snapshot.tuning_events);
        write(&self.metrics).restore(snapshot.metric_histories);
        write(&self.indices).restore(snapshot.index_histories);
        write(&self.drift).restore(snapshot.drift);
        write(&self.gate).restore(snapshot.gate);
        let mut outcomes = snapshot.consent_outcomes;
        {
            let gate = read(&self.gate);
            outcomes.retain(|id, _| gate.decision(id).is_some());
        }
        write(&self.consent).restore(snapshot.consents, outcomes);
        *write(&self.memory) = MemoryGrid::from_state(self.config.memory.clone(), snapshot.memory);

        tracing::info!(
            cycle = snapshot.cycle,
            taken_at = snapshot.taken_at.as_millis(),
            "State restored from snapshot"
        );
    }
}
