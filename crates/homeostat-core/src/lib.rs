//! # homeostat-core
//!
//! The control loop for a two-node homeostasis monitor - THE LOGIC.
//!
//! Two nodes (an individual and a collective) report dimension scores and
//! goal priorities. This crate turns those reports into bounded metrics,
//! composite health indices, a self-tuning coupling parameter, drift
//! corrections, gated artifacts with two-party consent, and a consolidating
//! memory grid.
//!
//! ## Architectural Constraints
//!
//! - Synchronous and in-memory. No async, no network.
//! - Every score is in [0, 1]. Bad input degrades to neutral, never fails a
//!   cycle.
//! - Every history is bounded.
//! - Time and ids are injected ([`Clock`], [`IdSource`]); nothing reads the
//!   wall clock directly.
//! - The only I/O is the redb snapshot store in [`storage`].

// =============================================================================
// MODULES
// =============================================================================

pub mod autotune;
pub mod clock;
pub mod composite;
pub mod config;
pub mod drift;
pub mod formats;
pub mod history;
pub mod homeostat;
pub mod ingest;
pub mod invariant;
pub mod memory;
pub mod metrics;
pub mod policy;
pub mod primitives;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Artifact, CompositeIndexRecord, ConsentOutcome, ConsentRecord, ConsentState,
    ConsolidationReport, DriftReport, FragmentPayload, Goal, GoalAlignment, HomeostatError,
    IndexAlert, InputRef, MemoryAnchor, MemoryFragment, MetricId, MetricSample, NodeId,
    NodeState, PolicyAction, PolicyDecision, PriorityAdjustment, Timestamp, TuningEvent,
};

// =============================================================================
// RE-EXPORTS: Components
// =============================================================================

pub use autotune::{AutoTuneConfig, AutoTuneController, TuningState};
pub use clock::{Clock, IdSource, ManualClock, SequentialIds, SystemClock};
pub use composite::{CompositeIndexAggregator, IndexConfig, StatusBand, StatusBands};
pub use config::{HomeostatConfig, NodePairConfig};
pub use drift::{DriftConfig, DriftMonitor, PriorityShift, TrackedEntity};
pub use history::{BoundedHistory, EvictionPolicy};
pub use homeostat::{Homeostat, Submission};
pub use memory::{AnchorFilter, FragmentFilter, MemoryConfig, MemoryGrid, MemoryStatistics};
pub use metrics::{Metric, MetricEngine, MetricRegistry, MetricsConfig, ParameterSnapshot};
pub use policy::{
    ConsentNegotiator, GateStatistics, PolicyConfig, PolicyFilter, PolicyGate, decide,
};
pub use storage::{SnapshotStore, StoreInfo};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{
    AuditReadout, AuditRecord, AuditSink, MemoryAuditSink, MonitorSnapshot, NullAuditSink,
    decode_lines, encode_line, snapshot_from_bytes, snapshot_to_bytes,
};
