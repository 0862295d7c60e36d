//! # Innate Primitives
//!
//! Compiled-in constants for the Homeostat core.
//!
//! Every value here is a default or a hard limit. Tunable behaviour lives in
//! [`crate::config`]; these constants are what the config falls back to.

/// The neutral score substituted for any missing or invalid input.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Magic bytes for the snapshot binary format header.
///
/// - Snapshot Header = Magic Bytes ("HMST") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"HMST";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot layout.
/// A snapshot with any other version is discarded at startup.
pub const FORMAT_VERSION: u8 = 1;

/// Tolerance used when checking that composite weights sum to 1.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// =============================================================================
// HISTORY CAPACITIES
// =============================================================================

/// Samples retained per metric engine (one day at a five minute cadence).
pub const DEFAULT_METRIC_HISTORY: usize = 288;

/// Composite index records retained per index.
pub const DEFAULT_INDEX_HISTORY: usize = 1000;

/// Tuning events retained by the auto-tune controller.
pub const DEFAULT_TUNING_HISTORY: usize = 100;

/// Policy decisions (and their consent records) retained by the gate.
pub const DEFAULT_DECISION_HISTORY: usize = 1000;

/// Priority shifts retained by the drift monitor.
pub const DEFAULT_SHIFT_HISTORY: usize = 100;

/// Memory fragments retained before significance-based eviction.
pub const DEFAULT_FRAGMENT_CAPACITY: usize = 10_000;

/// Memory anchors retained before reliability-based eviction.
pub const DEFAULT_ANCHOR_CAPACITY: usize = 1000;

// =============================================================================
// MEMORY CONSOLIDATION
// =============================================================================

/// Fragments in one group needed before consolidation creates an anchor.
pub const DEFAULT_CONSOLIDATION_THRESHOLD: usize = 10;

/// Number of fragment events copied into an anchor as key points.
pub const KEY_POINT_LIMIT: usize = 5;

/// Multiplier applied to mean significance to obtain anchor reliability.
pub const RELIABILITY_BOOST: f64 = 1.2;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of dimension scores accepted per node state.
pub const MAX_DIMENSIONS: usize = 256;

/// Maximum number of goals accepted per node state.
pub const MAX_GOALS: usize = 256;

/// Maximum length of node ids, dimension names and goal names.
pub const MAX_NAME_LENGTH: usize = 256;

/// Maximum snapshot size accepted before deserialization (64 MB).
pub const MAX_SNAPSHOT_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;
