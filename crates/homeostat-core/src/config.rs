//! # Monitor Configuration
//!
//! Everything that shapes the control loop, in one serde-friendly struct.
//! Every section defaults, so an empty TOML table is a valid configuration.

use crate::autotune::AutoTuneConfig;
use crate::composite::IndexConfig;
use crate::drift::DriftConfig;
use crate::memory::MemoryConfig;
use crate::metrics::MetricsConfig;
use crate::policy::PolicyConfig;
use crate::primitives::DEFAULT_INDEX_HISTORY;
use crate::types::{HomeostatError, NodeId};
use serde::{Deserialize, Serialize};

/// Which node ids play the primary (individual) and secondary (collective)
/// roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePairConfig {
    pub primary: NodeId,
    pub secondary: NodeId,
}

impl Default for NodePairConfig {
    fn default() -> Self {
        Self {
            primary: NodeId::from("individual"),
            secondary: NodeId::from("collective"),
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeostatConfig {
    pub nodes: NodePairConfig,
    pub metrics: MetricsConfig,
    pub indices: Vec<IndexConfig>,
    pub index_history: usize,
    pub autotune: AutoTuneConfig,
    pub drift: DriftConfig,
    pub policy: PolicyConfig,
    pub memory: MemoryConfig,
}

impl Default for HomeostatConfig {
    fn default() -> Self {
        Self {
            nodes: NodePairConfig::default(),
            metrics: MetricsConfig::default(),
            indices: IndexConfig::defaults(),
            index_history: DEFAULT_INDEX_HISTORY,
            autotune: AutoTuneConfig::default(),
            drift: DriftConfig::default(),
            policy: PolicyConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl HomeostatConfig {
    /// Cross-section checks that no single section can make on its own.
    ///
    /// Index weights and bands are validated when the aggregator is built.
    pub fn validate(&self) -> Result<(), HomeostatError> {
        if self.nodes.primary == self.nodes.secondary {
            return Err(HomeostatError::ConfigurationError(format!(
                "primary and secondary node are both '{}'",
                self.nodes.primary
            )));
        }
        if !self.indices.iter().any(|i| i.id == self.autotune.index_id) {
            return Err(HomeostatError::ConfigurationError(format!(
                "auto-tune reads index '{}' which is not defined",
                self.autotune.index_id
            )));
        }
        for (name, value) in [
            ("autotune.target", self.autotune.target),
            ("autotune.tolerance", self.autotune.tolerance),
            ("autotune.step", self.autotune.step),
            ("drift.drift_threshold", self.drift.drift_threshold),
            ("drift.strength_threshold", self.drift.strength_threshold),
            ("drift.gain", self.drift.gain),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(HomeostatError::ConfigurationError(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        for filter in &self.policy.filters {
            if !(0.0..=1.0).contains(&filter.threshold) {
                return Err(HomeostatError::ConfigurationError(format!(
                    "policy filter '{}' threshold must be within [0, 1]",
                    filter.id
                )));
            }
        }
        Ok(())
    }
}
