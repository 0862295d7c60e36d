//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API. Domain records
//! (decisions, fragments, index records) are serialized as the core defines
//! them; only envelopes and query strings live here.

use crate::scheduler::JobHealth;
use homeostat_core::{
    AnchorFilter, Artifact, CompositeIndexRecord, ConsentRecord, ConsentState, FragmentFilter,
    GateStatistics, HomeostatError, MemoryAnchor, MemoryFragment, MemoryStatistics, NodeId,
    PolicyDecision, PriorityShift, primitives::MAX_NAME_LENGTH,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default number of items returned by list endpoints.
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Upper bound on `limit` for list endpoints.
pub const MAX_LIST_LIMIT: usize = 500;

/// Upper bound on attestations or filters in one artifact request.
pub const MAX_ARTIFACT_ENTRIES: usize = 64;

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

fn parse_tags(tags: Option<&str>) -> BTreeSet<String> {
    tags.map(|t| {
        t.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Body of every non-2xx JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Latest value and band of one composite index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    pub value: f64,
    pub status: String,
    pub cycle: u64,
}

impl From<&CompositeIndexRecord> for IndexSummary {
    fn from(record: &CompositeIndexRecord) -> Self {
        Self {
            value: record.value,
            status: record.status.clone(),
            cycle: record.cycle,
        }
    }
}

/// Monitor status, including per-job staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub cycle: u64,
    pub nodes: Vec<NodeId>,
    pub coupling_strength: f64,
    pub indices: BTreeMap<String, Option<IndexSummary>>,
    pub memory: MemoryStatistics,
    pub gate: GateStatistics,
    pub jobs: BTreeMap<String, JobHealth>,
    /// Most recent goal priority shifts reported by the primary node.
    pub priority_shifts: Vec<PriorityShift>,
    /// True when any job has gone two periods without a success.
    pub stale: bool,
}

// =============================================================================
// NODE STATE INGESTION
// =============================================================================

/// Node state ingest response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub ingested: usize,
    pub error: Option<String>,
}

impl IngestResponse {
    pub fn success(ingested: usize) -> Self {
        Self {
            success: true,
            ingested,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            ingested: 0,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// ARTIFACT SUBMISSION
// =============================================================================

/// An artifact to gate, optionally restricted to a subset of filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRequest {
    #[serde(flatten)]
    pub artifact: Artifact,
    #[serde(default)]
    pub filters: Option<Vec<String>>,
}

impl ArtifactRequest {
    /// Validate sizes at the boundary before the gate sees the artifact.
    pub fn validate(&self) -> Result<(), HomeostatError> {
        if self.artifact.id.trim().is_empty() {
            return Err(HomeostatError::InputError(
                "artifact id must not be empty".to_string(),
            ));
        }
        if self.artifact.id.len() > MAX_NAME_LENGTH {
            return Err(HomeostatError::InputError(format!(
                "artifact id length {} exceeds maximum {} bytes",
                self.artifact.id.len(),
                MAX_NAME_LENGTH
            )));
        }
        let filters = self.filters.as_ref().map_or(0, Vec::len);
        if self.artifact.attestations.len() > MAX_ARTIFACT_ENTRIES
            || self.artifact.goal_refs.len() > MAX_ARTIFACT_ENTRIES
            || filters > MAX_ARTIFACT_ENTRIES
        {
            return Err(HomeostatError::InputError(format!(
                "artifact exceeds {} attestations, goal refs or filters",
                MAX_ARTIFACT_ENTRIES
            )));
        }
        Ok(())
    }
}

/// Decision and consent for a submitted artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub decision: PolicyDecision,
    pub consent: ConsentRecord,
}

// =============================================================================
// DECISIONS
// =============================================================================

/// Query string for `GET /decisions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    #[must_use]
    pub fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

/// A retained decision with its consent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionView {
    #[serde(flatten)]
    pub decision: PolicyDecision,
    pub consent: ConsentState,
}

/// Recent decisions, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionsResponse {
    pub decisions: Vec<DecisionView>,
}

// =============================================================================
// MEMORY
// =============================================================================

/// Query string for `GET /memory/fragments`. `tags` is comma-separated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FragmentQuery {
    pub node_id: Option<String>,
    pub category: Option<String>,
    pub tags: Option<String>,
    pub min_significance: Option<f64>,
    pub limit: Option<usize>,
}

impl FragmentQuery {
    #[must_use]
    pub fn filter(&self) -> FragmentFilter {
        FragmentFilter {
            node_id: self.node_id.as_deref().map(NodeId::from),
            category: self.category.clone(),
            tags: parse_tags(self.tags.as_deref()),
            min_significance: self.min_significance,
        }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

/// Query string for `GET /memory/anchors`. `tags` is comma-separated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnchorQuery {
    pub category: Option<String>,
    pub tags: Option<String>,
    pub min_reliability: Option<f64>,
    pub limit: Option<usize>,
}

impl AnchorQuery {
    #[must_use]
    pub fn filter(&self) -> AnchorFilter {
        AnchorFilter {
            category: self.category.clone(),
            tags: parse_tags(self.tags.as_deref()),
            min_reliability: self.min_reliability,
        }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

/// Fragments matching a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentsResponse {
    pub fragments: Vec<MemoryFragment>,
}

/// Anchors matching a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorsResponse {
    pub anchors: Vec<MemoryAnchor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(LimitQuery { limit: None }.limit(), DEFAULT_LIST_LIMIT);
        assert_eq!(LimitQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(LimitQuery { limit: Some(100_000) }.limit(), MAX_LIST_LIMIT);
    }

    #[test]
    fn tags_split_on_commas() {
        let query = FragmentQuery {
            tags: Some("rhythm, weekly,,".to_string()),
            ..FragmentQuery::default()
        };
        let filter = query.filter();
        assert_eq!(filter.tags.len(), 2);
        assert!(filter.tags.contains("weekly"));
    }

    #[test]
    fn artifact_request_is_flat() {
        let request: ArtifactRequest = serde_json::from_str(
            r#"{"id":"art-1","attestations":{"privacy":0.9},"filters":["privacy"]}"#,
        )
        .expect("parse");
        assert_eq!(request.artifact.id, "art-1");
        assert_eq!(request.filters.as_deref(), Some(&["privacy".to_string()][..]));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn empty_artifact_id_rejected() {
        let request = ArtifactRequest {
            artifact: Artifact::new("  "),
            filters: None,
        };
        assert!(request.validate().is_err());
    }
}
