//! # Clock and Id Sources
//!
//! Time and identifiers are injected so every component is deterministic
//! under test. Production wiring uses [`SystemClock`] and [`SequentialIds`];
//! tests use [`ManualClock`].

use crate::types::Timestamp;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// =============================================================================
// CLOCK
// =============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(start.0),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: Timestamp) {
        self.millis.store(to.0, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.millis.load(Ordering::SeqCst))
    }
}

// =============================================================================
// ID SOURCE
// =============================================================================

/// Source of unique record identifiers.
///
/// `position` / `restore` let a snapshot carry the counter across restarts
/// so restored ids never collide with new ones.
pub trait IdSource: Send + Sync + Debug {
    /// Produce the next id, e.g. `dec-000042`.
    fn next_id(&self, prefix: &str) -> String;

    /// Current counter position.
    fn position(&self) -> u64;

    /// Advance the counter to at least `position`. Never moves backwards.
    fn restore(&self, position: u64);
}

/// Monotonic counter shared by every record kind.
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl SequentialIds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        format!("{}-{:06}", prefix, n)
    }

    fn position(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    fn restore(&self, position: u64) {
        self.counter.fetch_max(position, Ordering::SeqCst);
    }
}
