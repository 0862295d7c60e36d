//! # Audit Log Format
//!
//! Append-only, one JSON record per line, tagged by `kind`:
//!
//! ```text
//! {"kind":"tuning","id":"tune-000004","parameter_id":"coupling_strength",...}
//! {"kind":"decision","id":"decision-000005","action":"flagged",...}
//! ```
//!
//! A process killed mid-write can leave a torn final line. Readers skip a
//! malformed trailing line silently and warn on malformed interior lines.
//! Writing the lines to disk is the app layer's job; this module only
//! defines records, the sink seam, and line encoding/decoding.

use crate::types::{
    ConsentRecord, ConsolidationReport, DriftReport, HomeostatError, IndexAlert, PolicyDecision,
    TuningEvent,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    Tuning(TuningEvent),
    Decision(PolicyDecision),
    Consent(ConsentRecord),
    Consolidation(ConsolidationReport),
    Drift(DriftReport),
    Alert(IndexAlert),
}

impl AuditRecord {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tuning(_) => "tuning",
            Self::Decision(_) => "decision",
            Self::Consent(_) => "consent",
            Self::Consolidation(_) => "consolidation",
            Self::Drift(_) => "drift",
            Self::Alert(_) => "alert",
        }
    }
}

// =============================================================================
// SINKS
// =============================================================================

/// Where audit records go.
///
/// `record` must not block the caller; implementations that write to slow
/// media queue and drop with a warning when full.
pub trait AuditSink: Send + Sync + fmt::Debug {
    fn record(&self, record: AuditRecord);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _record: AuditRecord) {}
}

/// Keeps records in memory. Used by tests and the one-shot CLI commands.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<AuditRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

// =============================================================================
// LINE CODEC
// =============================================================================

/// Encode a record as one newline-terminated line.
pub fn encode_line(record: &AuditRecord) -> Result<String, HomeostatError> {
    let mut line = serde_json::to_string(record)
        .map_err(|e| HomeostatError::SerializationError(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Result of reading an audit log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditReadout {
    pub records: Vec<AuditRecord>,
    /// Malformed lines that were followed by more data.
    pub malformed_lines: usize,
    /// Whether the final line was torn and skipped.
    pub torn_tail: bool,
}

/// Decode an audit log, tolerating damage.
#[must_use]
pub fn decode_lines(text: &str) -> AuditReadout {
    let mut readout = AuditReadout::default();
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len().saturating_sub(1);

    for (index, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditRecord>(line) {
            Ok(record) => readout.records.push(record),
            Err(e) if index == last => {
                tracing::debug!(error = %e, "Skipping torn trailing audit line");
                readout.torn_tail = true;
            }
            Err(e) => {
                tracing::warn!(
                    event = "audit_malformed_line",
                    line = index + 1,
                    error = %e,
                    "Skipping malformed audit line"
                );
                readout.malformed_lines += 1;
            }
        }
    }

    readout
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn tuning(id: &str) -> AuditRecord {
        AuditRecord::Tuning(TuningEvent {
            id: id.to_string(),
            timestamp: Timestamp(5),
            parameter_id: "coupling_strength".to_string(),
            previous: 0.5,
            next: 0.55,
            delta: 0.05,
            reason: "below band".to_string(),
        })
    }

    #[test]
    fn lines_are_kind_tagged() {
        let line = encode_line(&tuning("tune-1")).expect("encode");
        assert!(line.starts_with(r#"{"kind":"tuning""#));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn torn_trailing_line_is_skipped_quietly() {
        let mut text = String::new();
        text.push_str(&encode_line(&tuning("tune-1")).expect("encode"));
        text.push_str(&encode_line(&tuning("tune-2")).expect("encode"));
        text.push_str(r#"{"kind":"tuning","id":"tu"#);

        let readout = decode_lines(&text);
        assert_eq!(readout.records.len(), 2);
        assert!(readout.torn_tail);
        assert_eq!(readout.malformed_lines, 0);
    }

    #[test]
    fn interior_garbage_is_counted() {
        let mut text = String::new();
        text.push_str(&encode_line(&tuning("tune-1")).expect("encode"));
        text.push_str("not json\n");
        text.push_str(&encode_line(&tuning("tune-2")).expect("encode"));

        let readout = decode_lines(&text);
        assert_eq!(readout.records.len(), 2);
        assert_eq!(readout.malformed_lines, 1);
        assert!(!readout.torn_tail);
    }

    #[test]
    fn memory_sink_collects_records() {
        let sink = MemoryAuditSink::new();
        sink.record(tuning("tune-1"));
        sink.record(tuning("tune-2"));
        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.records().is_empty());
    }
}
