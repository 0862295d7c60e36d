//! On-disk formats: the binary snapshot and the JSON-lines audit log.

pub mod audit;
pub mod persistence;

pub use audit::{
    AuditReadout, AuditRecord, AuditSink, MemoryAuditSink, NullAuditSink, decode_lines,
    encode_line,
};
pub use persistence::{MonitorSnapshot, PersistenceHeader, snapshot_from_bytes, snapshot_to_bytes};
