//! # Auto-Tune Controller
//!
//! Nudges one tunable parameter (coupling strength) so that a chosen
//! composite index stays inside its target band.
//!
//! Each tick moves the parameter by at most one step:
//! - index below `target - tolerance` → `+step` (clamped to 1.0)
//! - index above `target + tolerance` → `-step` (clamped to 0.0)
//! - otherwise → no change
//!
//! Every tick emits a [`TuningEvent`], including no-ops and ticks that find
//! no index record yet.

use crate::history::BoundedHistory;
use crate::metrics::builtin::COUPLING_STRENGTH;
use crate::primitives::DEFAULT_TUNING_HISTORY;
use crate::types::{CompositeIndexRecord, TuningEvent, Timestamp};
use serde::{Deserialize, Serialize};

/// Auto-tune settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTuneConfig {
    pub parameter_id: String,
    /// Composite index the controller reads.
    pub index_id: String,
    pub initial: f64,
    pub target: f64,
    pub tolerance: f64,
    pub step: f64,
    pub history_capacity: usize,
}

impl Default for AutoTuneConfig {
    fn default() -> Self {
        Self {
            parameter_id: COUPLING_STRENGTH.to_string(),
            index_id: "equilibrium".to_string(),
            initial: 0.5,
            target: 0.88,
            tolerance: 0.04,
            step: 0.05,
            history_capacity: DEFAULT_TUNING_HISTORY,
        }
    }
}

/// Read-only view of the controller for queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningState {
    pub parameter_id: String,
    pub value: f64,
    pub index_id: String,
    pub target: f64,
    pub tolerance: f64,
    pub step: f64,
    pub recent_events: Vec<TuningEvent>,
}

/// Owns the tunable parameter and its event history.
#[derive(Debug)]
pub struct AutoTuneController {
    config: AutoTuneConfig,
    value: f64,
    events: BoundedHistory<TuningEvent>,
}

impl AutoTuneController {
    #[must_use]
    pub fn new(config: AutoTuneConfig) -> Self {
        let value = config.initial.clamp(0.0, 1.0);
        let events = BoundedHistory::new(config.history_capacity);
        Self {
            config,
            value,
            events,
        }
    }

    /// Current parameter value.
    #[must_use]
    pub fn current(&self) -> f64 {
        self.value
    }

    #[must_use]
    pub fn config(&self) -> &AutoTuneConfig {
        &self.config
    }

    /// Evaluate the latest index record and adjust the parameter.
    pub fn tick(
        &mut self,
        latest: Option<&CompositeIndexRecord>,
        timestamp: Timestamp,
        id: String,
    ) -> TuningEvent {
        let previous = self.value;
        let low = self.config.target - self.config.tolerance;
        let high = self.config.target + self.config.tolerance;

        let (next, reason) = match latest {
            None => (
                previous,
                format!("no '{}' index record yet; holding", self.config.index_id),
            ),
            Some(record) if record.value < low => {
                let next = (previous + self.config.step).min(1.0);
                let reason = if next > previous {
                    format!(
                        "{} {:.3} below target band [{:.3}, {:.3}]; increasing",
                        record.index_id, record.value, low, high
                    )
                } else {
                    format!(
                        "{} {:.3} below target band but parameter already at 1.0",
                        record.index_id, record.value
                    )
                };
                (next, reason)
            }
            Some(record) if record.value > high => {
                let next = (previous - self.config.step).max(0.0);
                let reason = if next < previous {
                    format!(
                        "{} {:.3} above target band [{:.3}, {:.3}]; decreasing",
                        record.index_id, record.value, low, high
                    )
                } else {
                    format!(
                        "{} {:.3} above target band but parameter already at 0.0",
                        record.index_id, record.value
                    )
                };
                (next, reason)
            }
            Some(record) => (
                previous,
                format!(
                    "{} {:.3} within target band; maintaining",
                    record.index_id, record.value
                ),
            ),
        };

        self.value = next;
        let event = TuningEvent {
            id,
            timestamp,
            parameter_id: self.config.parameter_id.clone(),
            previous,
            next,
            delta: next - previous,
            reason,
        };
        tracing::info!(
            event = "tuning",
            parameter = %event.parameter_id,
            previous = event.previous,
            next = event.next,
            reason = %event.reason,
            "Auto-tune tick"
        );
        self.events.push(event.clone());
        event
    }

    /// Up to `limit` events, newest first.
    #[must_use]
    pub fn events(&self, limit: usize) -> Vec<TuningEvent> {
        self.events.recent(limit)
    }

    #[must_use]
    pub fn state(&self, limit: usize) -> TuningState {
        TuningState {
            parameter_id: self.config.parameter_id.clone(),
            value: self.value,
            index_id: self.config.index_id.clone(),
            target: self.config.target,
            tolerance: self.config.tolerance,
            step: self.config.step,
            recent_events: self.events(limit),
        }
    }

    /// Restore value and events from a snapshot.
    pub fn restore(&mut self, value: f64, events: Vec<TuningEvent>) {
        self.value = value.clamp(0.0, 1.0);
        self.events = BoundedHistory::from_items(self.config.history_capacity, events);
    }

    /// All retained events, oldest first.
    #[must_use]
    pub fn all_events(&self) -> Vec<TuningEvent> {
        self.events.to_vec()
    }
}
