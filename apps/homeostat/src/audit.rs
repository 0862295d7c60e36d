//! # Audit Log Writer
//!
//! The monitor hands audit records to a [`ChannelAuditSink`], which only
//! ever calls `try_send` on a bounded queue. A single writer task drains the
//! queue into the append-only JSONL file. A full queue, a failed write or a
//! write slower than the configured timeout loses that record with a
//! warning; none of them block a compute cycle.

use homeostat_core::{
    AuditReadout, AuditRecord, AuditSink, HomeostatError, decode_lines, encode_line,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};

/// Maximum audit file size the CLI will read (256 MB).
const MAX_AUDIT_READ_SIZE: u64 = 256 * 1024 * 1024;

// =============================================================================
// CHANNEL SINK
// =============================================================================

/// Non-blocking sink in front of the writer task.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, record: AuditRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                tracing::warn!(
                    event = "audit_dropped",
                    reason = "queue_full",
                    kind = record.kind(),
                    "Audit queue full, record dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                tracing::warn!(
                    event = "audit_dropped",
                    reason = "writer_closed",
                    kind = record.kind(),
                    "Audit writer stopped, record dropped"
                );
            }
        }
    }
}

/// Create the sink and the receiving end for [`run_writer`].
#[must_use]
pub fn audit_channel(capacity: usize) -> (ChannelAuditSink, mpsc::Receiver<AuditRecord>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelAuditSink { tx }, rx)
}

// =============================================================================
// WRITER TASK
// =============================================================================

/// Drain the queue into `path` until shutdown is signalled or every sink is
/// dropped. On shutdown the queue is closed and whatever is already in it is
/// still written. Returns the number of records written.
pub async fn run_writer(
    path: PathBuf,
    mut rx: mpsc::Receiver<AuditRecord>,
    write_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64, HomeostatError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| {
            HomeostatError::IoError(format!("Cannot open audit log '{}': {}", path.display(), e))
        })?;
    tracing::info!(path = %path.display(), "Audit writer started");

    let mut written = 0u64;
    loop {
        let record = tokio::select! {
            record = rx.recv() => match record {
                Some(record) => record,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    rx.close();
                }
                continue;
            }
        };
        if append_one(&mut file, &record, write_timeout).await {
            written += 1;
        }
    }

    tracing::info!(written, "Audit writer stopped");
    Ok(written)
}

async fn append_one(file: &mut tokio::fs::File, record: &AuditRecord, timeout: Duration) -> bool {
    let line = match encode_line(record) {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(event = "audit_dropped", reason = "encode", error = %e, "Audit record not encodable");
            return false;
        }
    };

    let write = async {
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(event = "audit_dropped", reason = "io", kind = record.kind(), error = %e, "Audit write failed");
            false
        }
        Err(_) => {
            tracing::warn!(event = "audit_dropped", reason = "timeout", kind = record.kind(), "Audit write timed out");
            false
        }
    }
}

// =============================================================================
// SYNCHRONOUS HELPERS (CLI)
// =============================================================================

/// Append records to the log from a synchronous context.
pub fn append_records(path: &Path, records: &[AuditRecord]) -> Result<(), HomeostatError> {
    if records.is_empty() {
        return Ok(());
    }
    let mut text = String::new();
    for record in records {
        text.push_str(&encode_line(record)?);
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            HomeostatError::IoError(format!("Cannot open audit log '{}': {}", path.display(), e))
        })?;
    file.write_all(text.as_bytes())
        .map_err(|e| HomeostatError::IoError(format!("Audit append failed: {}", e)))
}

/// Read and decode the whole log. A missing file reads as empty.
pub fn read_log(path: &Path) -> Result<AuditReadout, HomeostatError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AuditReadout::default()),
        Err(e) => {
            return Err(HomeostatError::IoError(format!(
                "Cannot read audit log '{}': {}",
                path.display(),
                e
            )));
        }
    };
    if metadata.len() > MAX_AUDIT_READ_SIZE {
        return Err(HomeostatError::IoError(format!(
            "Audit log size {} bytes exceeds maximum {} bytes",
            metadata.len(),
            MAX_AUDIT_READ_SIZE
        )));
    }
    let bytes = std::fs::read(path)
        .map_err(|e| HomeostatError::IoError(format!("Cannot read audit log: {}", e)))?;
    Ok(decode_lines(&String::from_utf8_lossy(&bytes)))
}
