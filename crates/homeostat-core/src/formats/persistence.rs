//! # Snapshot Format
//!
//! Binary serialization of the whole monitor state.
//!
//! Format: Header (5 bytes) + postcard-serialized [`MonitorSnapshot`].
//! - 4 bytes: Magic ("HMST")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is deserialized.
//! File and database I/O live in [`crate::storage`].

use crate::drift::DriftState;
use crate::memory::MemoryGridState;
use crate::policy::GateState;
use crate::primitives::{self, MAX_SNAPSHOT_PAYLOAD_SIZE};
use crate::types::{
    CompositeIndexRecord, ConsentOutcome, ConsentRecord, HomeostatError, MetricId, MetricSample, NodeState,
    Timestamp, TuningEvent,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header length in bytes.
const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header precedes every snapshot payload.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), HomeostatError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(HomeostatError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(HomeostatError::SerializationError(format!(
                "Unsupported snapshot version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HomeostatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(HomeostatError::SerializationError(
                "Header too short".to_string(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Everything needed to resume monitoring after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MonitorSnapshot {
    pub taken_at: Timestamp,
    /// Last completed sampling cycle.
    pub cycle: u64,
    /// Id generator position, so restored ids never repeat.
    pub id_position: u64,
    pub coupling_strength: f64,
    pub tuning_events: Vec<TuningEvent>,
    pub metric_histories: BTreeMap<MetricId, Vec<MetricSample>>,
    pub index_histories: BTreeMap<String, Vec<CompositeIndexRecord>>,
    pub drift: DriftState,
    pub gate: GateState,
    pub consents: Vec<ConsentRecord>,
    /// Consent outcome of every retained decision, including those whose
    /// record was evicted.
    pub consent_outcomes: BTreeMap<String, ConsentOutcome>,
    pub memory: MemoryGridState,
    /// Latest state reported by each node.
    pub node_states: Vec<NodeState>,
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a snapshot to bytes (header + payload).
pub fn snapshot_to_bytes(snapshot: &MonitorSnapshot) -> Result<Vec<u8>, HomeostatError> {
    let header = PersistenceHeader::new();
    let payload = postcard::to_stdvec(snapshot)
        .map_err(|e| HomeostatError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&header.to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a snapshot from bytes.
///
/// Validates minimum size, maximum size and header before touching the
/// payload.
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<MonitorSnapshot, HomeostatError> {
    if bytes.len() < HEADER_SIZE {
        return Err(HomeostatError::SerializationError(format!(
            "Data too short: minimum {} bytes required",
            HEADER_SIZE
        )));
    }

    if bytes.len() > MAX_SNAPSHOT_PAYLOAD_SIZE {
        return Err(HomeostatError::SerializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_PAYLOAD_SIZE
        )));
    }

    let header = PersistenceHeader::from_bytes(bytes)?;
    header.validate()?;

    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        HomeostatError::SerializationError(format!("Failed to deserialize snapshot: {}", e))
    })
}

// =============================================================================
// TESTS
// =============================================================================
