//! # Drift Monitor
//!
//! Tracks how far the primary node's goal priorities have wandered from the
//! targets set by the secondary node, and corrects strongly held goals when
//! the drift passes a threshold.
//!
//! - `alignment` = strength-weighted mean of `1 - |priority - target|` over
//!   the entities both nodes hold a priority for
//! - `drift` = `1 - alignment`, always exactly
//! - no matched entities → alignment 1, drift 0, nothing to correct
//!
//! Goals only the primary node reports are tracked without a target. They
//! take no part in alignment and are never corrected.
//!
//! Corrections move `priority += (target - priority) * gain` for every
//! matched entity whose strength exceeds the strength threshold.

use crate::history::BoundedHistory;
use crate::invariant::clamp_unit;
use crate::primitives::DEFAULT_SHIFT_HISTORY;
use crate::types::{DriftReport, NodeState, PriorityAdjustment, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reported priority changes smaller than this are not treated as shifts.
const SHIFT_EPSILON: f64 = 0.05;

/// Drift settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub drift_threshold: f64,
    pub strength_threshold: f64,
    pub gain: f64,
    pub shift_history: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 0.2,
            strength_threshold: 0.7,
            gain: 0.3,
            shift_history: DEFAULT_SHIFT_HISTORY,
        }
    }
}

/// A goal being tracked for drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub name: String,
    /// Corrected priority (starts at what the primary node reported).
    pub priority: f64,
    /// Priority the secondary node holds for the same goal, `None` while it
    /// holds none.
    pub target: Option<f64>,
    pub strength: f64,
    /// Last priority the primary node actually reported.
    pub reported: f64,
}

/// A reported priority change large enough to replace the corrected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityShift {
    pub entity: String,
    pub from: f64,
    pub to: f64,
    pub timestamp: Timestamp,
}

/// Persisted drift monitor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DriftState {
    pub entities: Vec<TrackedEntity>,
    pub shifts: Vec<PriorityShift>,
    pub last_report: Option<DriftReport>,
}

/// Owns tracked entities and applies corrections.
#[derive(Debug)]
pub struct DriftMonitor {
    config: DriftConfig,
    entities: BTreeMap<String, TrackedEntity>,
    shifts: BoundedHistory<PriorityShift>,
    last_report: Option<DriftReport>,
}

impl DriftMonitor {
    #[must_use]
    pub fn new(config: DriftConfig) -> Self {
        let shifts = BoundedHistory::new(config.shift_history);
        Self {
            config,
            entities: BTreeMap::new(),
            shifts,
            last_report: None,
        }
    }

    /// Track or update an entity matched on both nodes.
    pub fn track(&mut self, name: impl Into<String>, priority: f64, target: f64, strength: f64) {
        let name = name.into();
        self.entities.insert(
            name.clone(),
            TrackedEntity {
                name,
                priority: priority.clamp(0.0, 1.0),
                target: Some(target.clamp(0.0, 1.0)),
                strength: strength.clamp(0.0, 1.0),
                reported: priority.clamp(0.0, 1.0),
            },
        );
    }

    /// Sync entities from the latest node states.
    ///
    /// The primary node's goals create entities and supply priority and
    /// strength. A corrected priority is only overwritten when the primary
    /// reports a shift larger than 0.05. The secondary node's goals supply
    /// targets; a goal the secondary node no longer reports loses its target.
    pub fn sync(&mut self, primary: Option<&NodeState>, secondary: Option<&NodeState>) {
        if let Some(primary) = primary {
            for goal in &primary.goals {
                match self.entities.get_mut(&goal.name) {
                    Some(entity) => {
                        if (goal.priority - entity.reported).abs() > SHIFT_EPSILON {
                            self.shifts.push(PriorityShift {
                                entity: goal.name.clone(),
                                from: entity.priority,
                                to: goal.priority,
                                timestamp: primary.timestamp,
                            });
                            entity.priority = goal.priority;
                        }
                        entity.reported = goal.priority;
                        entity.strength = goal.strength;
                    }
                    None => {
                        self.entities.insert(
                            goal.name.clone(),
                            TrackedEntity {
                                name: goal.name.clone(),
                                priority: goal.priority,
                                target: None,
                                strength: goal.strength,
                                reported: goal.priority,
                            },
                        );
                    }
                }
            }
        }

        if let Some(secondary) = secondary {
            let targets: BTreeMap<&str, f64> = secondary
                .goals
                .iter()
                .map(|g| (g.name.as_str(), g.priority))
                .collect();
            for entity in self.entities.values_mut() {
                entity.target = targets.get(entity.name.as_str()).copied();
            }
        }
    }

    /// Current alignment and drift without applying corrections.
    #[must_use]
    pub fn evaluate(&self) -> (f64, f64) {
        let matched: Vec<(f64, f64)> = self
            .entities
            .values()
            .filter_map(|e| {
                e.target
                    .map(|target| (e.strength, 1.0 - (e.priority - target).abs()))
            })
            .collect();
        if matched.is_empty() {
            return (1.0, 0.0);
        }

        let total_strength: f64 = matched.iter().map(|(strength, _)| strength).sum();
        let alignment = if total_strength > 0.0 {
            matched
                .iter()
                .map(|(strength, agreement)| strength * agreement)
                .sum::<f64>()
                / total_strength
        } else {
            matched.iter().map(|(_, agreement)| agreement).sum::<f64>() / matched.len() as f64
        };

        let alignment = clamp_unit(alignment, "drift.alignment");
        (alignment, 1.0 - alignment)
    }

    /// Evaluate drift and correct strongly held entities if needed.
    pub fn tick(&mut self, timestamp: Timestamp, id: String) -> DriftReport {
        let (alignment, drift) = self.evaluate();
        let mut adjustments = Vec::new();

        if drift > self.config.drift_threshold {
            for entity in self.entities.values_mut() {
                let Some(target) = entity.target else {
                    continue;
                };
                if entity.strength <= self.config.strength_threshold {
                    continue;
                }
                let previous = entity.priority;
                let next = (previous + (target - previous) * self.config.gain).clamp(0.0, 1.0);
                if next != previous {
                    entity.priority = next;
                    adjustments.push(PriorityAdjustment {
                        entity: entity.name.clone(),
                        previous,
                        next,
                        target,
                    });
                }
            }
        }

        let report = DriftReport {
            id,
            timestamp,
            alignment,
            drift,
            tracked: self.entities.len(),
            recalibrated: !adjustments.is_empty(),
            adjustments,
        };

        if report.recalibrated {
            tracing::info!(
                event = "drift_recalibration",
                drift = report.drift,
                adjusted = report.adjustments.len(),
                "Drift above threshold; priorities recalibrated"
            );
        } else {
            tracing::debug!(drift = report.drift, "Drift evaluated");
        }

        self.last_report = Some(report.clone());
        report
    }

    #[must_use]
    pub fn entities(&self) -> Vec<TrackedEntity> {
        self.entities.values().cloned().collect()
    }

    #[must_use]
    pub fn shifts(&self, limit: usize) -> Vec<PriorityShift> {
        self.shifts.recent(limit)
    }

    #[must_use]
    pub fn last_report(&self) -> Option<&DriftReport> {
        self.last_report.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> DriftState {
        DriftState {
            entities: self.entities(),
            shifts: self.shifts.to_vec(),
            last_report: self.last_report.clone(),
        }
    }

    pub fn restore(&mut self, state: DriftState) {
        self.entities = state
            .entities
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();
        self.shifts = BoundedHistory::from_items(self.config.shift_history, state.shifts);
        self.last_report = state.last_report;
    }
}
