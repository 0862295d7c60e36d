//! # CLI Command Implementations
//!
//! `run` owns the live monitor. Every other command works offline: it
//! restores the last snapshot, does its work, then saves a new snapshot and
//! appends whatever it audited to the log.

use crate::api::{self, AppState, ArtifactRequest};
use crate::audit;
use crate::config::AppConfig;
use crate::scheduler::{JobRunner, Scheduler, TaskHealth, persist_snapshot};
use homeostat_core::{
    AuditRecord, Clock, Homeostat, HomeostatError, MemoryAuditSink, SequentialIds, SnapshotStore,
    SystemClock,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

// =============================================================================
// FILE VALIDATION
// =============================================================================

/// Maximum input file size for `ingest` and `evaluate` (16 MB).
const MAX_INPUT_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Canonicalize an input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, HomeostatError> {
    let canonical = path.canonicalize().map_err(|e| {
        HomeostatError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(HomeostatError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

fn read_input_file(path: &Path) -> Result<Vec<u8>, HomeostatError> {
    let path = validate_file_path(path)?;
    let metadata = std::fs::metadata(&path)
        .map_err(|e| HomeostatError::IoError(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > MAX_INPUT_FILE_SIZE {
        return Err(HomeostatError::InputError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_INPUT_FILE_SIZE
        )));
    }
    std::fs::read(&path).map_err(|e| HomeostatError::IoError(format!("Cannot read file: {}", e)))
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// OFFLINE MONITOR
// =============================================================================

/// Load the last snapshot into `homeostat`. A missing or unreadable
/// snapshot leaves it in its default state.
fn restore_latest(homeostat: &Homeostat, store: &SnapshotStore) {
    match store.load() {
        Ok(Some(snapshot)) => {
            tracing::info!(cycle = snapshot.cycle, "Restored snapshot");
            homeostat.restore(snapshot);
        }
        Ok(None) => tracing::info!("No snapshot found, starting fresh"),
        Err(e) => {
            tracing::warn!(event = "snapshot_rejected", error = %e, "Snapshot unreadable, starting fresh");
        }
    }
}

/// A monitor restored from disk for a single command.
struct OfflineMonitor {
    homeostat: Homeostat,
    audit: Arc<MemoryAuditSink>,
    store: SnapshotStore,
    audit_path: PathBuf,
}

impl OfflineMonitor {
    fn open(config: &AppConfig) -> Result<Self, HomeostatError> {
        let data_dir = &config.persistence.data_dir;
        if !data_dir.is_dir() {
            return Err(HomeostatError::IoError(format!(
                "Data directory '{}' does not exist (run `homeostat init`)",
                data_dir.display()
            )));
        }

        let store = SnapshotStore::open(config.persistence.snapshot_path())?;
        let audit = Arc::new(MemoryAuditSink::new());
        let homeostat = Homeostat::new(
            config.monitor.clone(),
            Arc::new(SystemClock),
            Arc::new(SequentialIds::new()),
            audit.clone(),
        )?;
        restore_latest(&homeostat, &store);

        Ok(Self {
            homeostat,
            audit,
            store,
            audit_path: config.persistence.audit_path(),
        })
    }

    /// Save the new state, then append what this command audited.
    fn commit(&self) -> Result<(), HomeostatError> {
        self.store.save(&self.homeostat.snapshot())?;
        audit::append_records(&self.audit_path, &self.audit.drain())
    }
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Run the scheduler and HTTP server until Ctrl-C, then take a final
/// snapshot and drain the audit queue.
pub async fn cmd_run(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), HomeostatError> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let persistence = &config.persistence;
    std::fs::create_dir_all(&persistence.data_dir).map_err(|e| {
        HomeostatError::IoError(format!(
            "Cannot create data directory '{}': {}",
            persistence.data_dir.display(),
            e
        ))
    })?;
    let store = SnapshotStore::open(persistence.snapshot_path())?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (sink, audit_rx) = audit::audit_channel(persistence.audit_queue_capacity);
    let homeostat = Arc::new(Homeostat::new(
        config.monitor.clone(),
        clock.clone(),
        Arc::new(SequentialIds::new()),
        Arc::new(sink),
    )?);
    restore_latest(&homeostat, &store);

    let (writer_stop_tx, writer_stop_rx) = watch::channel(false);
    let writer = tokio::spawn(audit::run_writer(
        persistence.audit_path(),
        audit_rx,
        persistence.write_timeout(),
        writer_stop_rx,
    ));

    let store = Arc::new(Mutex::new(store));
    let health = Arc::new(TaskHealth::new(clock, &config.scheduler));
    let runner = Arc::new(JobRunner::new(
        homeostat.clone(),
        store.clone(),
        config.scheduler.compact_every,
    ));
    let mut scheduler = Scheduler::new(runner, health.clone(), config.scheduler.clone());
    scheduler.start();

    let addr = config.server.addr();
    println!("Homeostat Starting...");
    println!();
    println!("Configuration:");
    println!("  Listen:    {}", addr);
    println!("  Data dir:  {:?}", persistence.data_dir);
    println!("  Jobs:      {}", scheduler.running());
    println!("  Cycle:     {}", homeostat.cycle());
    println!();
    println!("Endpoints:");
    println!("  GET  /health              - Health check");
    println!("  GET  /status              - Monitor and job status");
    println!("  GET  /indices/{{id}}/latest - Latest composite index");
    println!("  GET  /tuning              - Tuning state");
    println!("  GET  /decisions           - Recent policy decisions");
    println!("  GET  /memory/fragments    - Memory fragments");
    println!("  GET  /memory/anchors      - Memory anchors");
    println!("  POST /nodes/state         - Ingest node state");
    println!("  POST /artifacts           - Gate an artifact");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, shutting down");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                tracing::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });
    let shutdown = async move {
        let _ = stop_rx.wait_for(|stop| *stop).await;
    };

    let served = api::run_server(&addr, AppState::new(homeostat.clone(), health), shutdown).await;

    scheduler.shutdown().await;
    match persist_snapshot(homeostat.clone(), store, false).await {
        Ok(()) => tracing::info!(cycle = homeostat.cycle(), "Final snapshot saved"),
        Err(e) => tracing::warn!(event = "final_snapshot_failed", error = %e, "Final snapshot failed"),
    }

    let _ = writer_stop_tx.send(true);
    match writer.await {
        Ok(Ok(written)) => tracing::info!(written, "Audit log closed"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Audit writer failed"),
        Err(e) => tracing::warn!(error = %e, "Audit writer task failed"),
    }

    served
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show monitor status from the last snapshot.
pub fn cmd_status(config: &AppConfig, json_mode: bool) -> Result<(), HomeostatError> {
    let monitor = OfflineMonitor::open(config)?;
    let homeostat = &monitor.homeostat;
    let info = monitor.store.info()?;
    let coupling = homeostat.tuning_state(0).value;
    let memory = homeostat.memory_statistics();
    let gate = homeostat.gate_statistics();
    let nodes: Vec<String> = homeostat
        .node_states()
        .into_iter()
        .map(|s| s.node_id.to_string())
        .collect();
    let indices: Vec<(String, Option<(f64, String)>)> = homeostat
        .index_ids()
        .into_iter()
        .map(|id| {
            let latest = homeostat.latest_index(&id).map(|r| (r.value, r.status));
            (id, latest)
        })
        .collect();

    if json_mode {
        let index_json: serde_json::Map<String, serde_json::Value> = indices
            .iter()
            .map(|(id, latest)| {
                let value = match latest {
                    Some((value, status)) => serde_json::json!({"value": value, "status": status}),
                    None => serde_json::Value::Null,
                };
                (id.clone(), value)
            })
            .collect();
        print_json(&serde_json::json!({
            "data_dir": config.persistence.data_dir.to_string_lossy(),
            "cycle": homeostat.cycle(),
            "coupling_strength": coupling,
            "nodes": nodes,
            "indices": index_json,
            "memory": memory,
            "gate": gate,
            "snapshot": {
                "saves": info.saves,
                "last_saved_at": info.last_saved_at.map(|t| t.as_millis()),
            }
        }));
        return Ok(());
    }

    println!("Homeostat Status");
    println!("================");
    println!("Data dir:  {:?}", config.persistence.data_dir);
    println!("Snapshots: {} saved", info.saves);
    println!();
    println!("Cycle:     {}", homeostat.cycle());
    println!("Coupling:  {:.3}", coupling);
    println!(
        "Nodes:     {}",
        if nodes.is_empty() {
            "(none)".to_string()
        } else {
            nodes.join(", ")
        }
    );
    println!();
    println!("Indices:");
    for (id, latest) in &indices {
        match latest {
            Some((value, status)) => println!("  {:<20} {:.3} ({})", id, value, status),
            None => println!("  {:<20} -", id),
        }
    }
    println!();
    println!(
        "Memory:    {} fragments, {} anchors",
        memory.fragments, memory.anchors
    );
    println!(
        "Gate:      {} decisions ({} allowed, {} blocked, {} modified, {} flagged)",
        gate.total, gate.allowed, gate.blocked, gate.modified, gate.flagged
    );

    Ok(())
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// Ingest node states from a JSON file.
pub fn cmd_ingest(config: &AppConfig, json_mode: bool, file: &Path) -> Result<(), HomeostatError> {
    let bytes = read_input_file(file)?;
    let monitor = OfflineMonitor::open(config)?;
    let count = monitor.homeostat.ingest_json(&bytes)?;
    monitor.commit()?;

    if json_mode {
        print_json(&serde_json::json!({
            "success": true,
            "ingested": count,
        }));
    } else {
        println!("Ingested {} node state(s) from {:?}", count, file);
    }
    Ok(())
}

// =============================================================================
// EVALUATE COMMAND
// =============================================================================

/// Gate an artifact read from a JSON file and negotiate consent.
pub fn cmd_evaluate(
    config: &AppConfig,
    json_mode: bool,
    file: &Path,
    filters: Option<&str>,
) -> Result<(), HomeostatError> {
    let bytes = read_input_file(file)?;
    let mut request: ArtifactRequest = serde_json::from_slice(&bytes)
        .map_err(|e| HomeostatError::SerializationError(format!("Invalid artifact: {}", e)))?;
    if let Some(list) = filters {
        request.filters = Some(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        );
    }
    request.validate()?;

    let monitor = OfflineMonitor::open(config)?;
    let submission = monitor
        .homeostat
        .submit_artifact(&request.artifact, request.filters.as_deref())?;
    monitor.commit()?;

    let decision = &submission.decision;
    let consent = &submission.consent;
    if json_mode {
        print_json(&serde_json::json!({
            "decision": decision,
            "consent": consent,
        }));
        return Ok(());
    }

    println!("Artifact {}", decision.artifact_id);
    println!("  Decision: {} ({})", decision.action.as_str(), decision.id);
    println!("  Overall:  {:.3}", decision.overall_score);
    for (filter, score) in &decision.score_per_filter {
        println!("    {:<14} {:.3}", filter, score);
    }
    println!(
        "  Goals:    {} ({:.3})",
        if decision.goal_alignment.aligned {
            "aligned"
        } else {
            "not aligned"
        },
        decision.goal_alignment.score
    );
    for line in &decision.reasoning {
        println!("  - {}", line);
    }
    println!("  Consent:  {} ({})", consent.outcome.as_str(), consent.reasoning);
    Ok(())
}

// =============================================================================
// AUDIT COMMAND
// =============================================================================

fn describe(record: &AuditRecord) -> String {
    match record {
        AuditRecord::Tuning(e) => format!(
            "{} {} {:.3} -> {:.3} ({})",
            e.id, e.parameter_id, e.previous, e.next, e.reason
        ),
        AuditRecord::Decision(d) => format!(
            "{} artifact {} {} (overall {:.3})",
            d.id,
            d.artifact_id,
            d.action.as_str(),
            d.overall_score
        ),
        AuditRecord::Consent(c) => format!("decision {} {}", c.decision_id, c.outcome.as_str()),
        AuditRecord::Consolidation(r) => format!(
            "{} group(s) examined, {} anchor(s) created",
            r.groups_examined,
            r.anchors_created.len()
        ),
        AuditRecord::Drift(r) => format!(
            "{} drift {:.3} alignment {:.3}{}",
            r.id,
            r.drift,
            r.alignment,
            if r.recalibrated { " (recalibrated)" } else { "" }
        ),
        AuditRecord::Alert(a) => format!(
            "{} {:.3} below {:.3} ({})",
            a.index_id, a.value, a.threshold, a.status
        ),
    }
}

/// Show the tail of the audit log. A torn final line is skipped.
pub fn cmd_audit(
    config: &AppConfig,
    json_mode: bool,
    limit: usize,
    kind: Option<&str>,
) -> Result<(), HomeostatError> {
    let path = config.persistence.audit_path();
    let readout = audit::read_log(&path)?;

    let matching: Vec<&AuditRecord> = readout
        .records
        .iter()
        .filter(|r| kind.is_none_or(|k| r.kind() == k))
        .collect();
    let tail = &matching[matching.len().saturating_sub(limit)..];

    if json_mode {
        print_json(&serde_json::json!({
            "records": tail,
            "malformed_lines": readout.malformed_lines,
            "torn_tail": readout.torn_tail,
        }));
        return Ok(());
    }

    println!("Audit log {:?} ({} record(s))", path, readout.records.len());
    for record in tail {
        println!("[{:<13}] {}", record.kind(), describe(record));
    }
    if readout.malformed_lines > 0 {
        println!("Skipped {} malformed line(s)", readout.malformed_lines);
    }
    if readout.torn_tail {
        println!("Skipped a truncated final line");
    }
    Ok(())
}

// =============================================================================
// CONSOLIDATE COMMAND
// =============================================================================

/// Run one consolidation sweep against the snapshot.
pub fn cmd_consolidate(config: &AppConfig, json_mode: bool) -> Result<(), HomeostatError> {
    let monitor = OfflineMonitor::open(config)?;
    let report = monitor.homeostat.consolidate();
    monitor.commit()?;

    if json_mode {
        print_json(&serde_json::json!(report));
    } else {
        println!(
            "Examined {} group(s), created {} anchor(s)",
            report.groups_examined,
            report.anchors_created.len()
        );
        for id in &report.anchors_created {
            println!("  {}", id);
        }
    }
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create the data directory with a fresh snapshot and an empty audit log.
pub fn cmd_init(config: &AppConfig, force: bool) -> Result<(), HomeostatError> {
    let persistence = &config.persistence;
    let snapshot_path = persistence.snapshot_path();

    if snapshot_path.exists() {
        if !force {
            return Err(HomeostatError::IoError(format!(
                "Snapshot {:?} already exists. Use --force to replace it.",
                snapshot_path
            )));
        }
        std::fs::remove_file(&snapshot_path)
            .map_err(|e| HomeostatError::IoError(format!("Cannot remove snapshot: {}", e)))?;
    }

    std::fs::create_dir_all(&persistence.data_dir).map_err(|e| {
        HomeostatError::IoError(format!("Cannot create data directory: {}", e))
    })?;

    let homeostat = Homeostat::new(
        config.monitor.clone(),
        Arc::new(SystemClock),
        Arc::new(SequentialIds::new()),
        Arc::new(homeostat_core::NullAuditSink),
    )?;
    let store = SnapshotStore::open(&snapshot_path)?;
    store.save(&homeostat.snapshot())?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(persistence.audit_path())
        .map_err(|e| HomeostatError::IoError(format!("Cannot create audit log: {}", e)))?;

    println!("Initialized data directory {:?}", persistence.data_dir);
    println!("  Snapshot:  {:?}", snapshot_path);
    println!("  Audit log: {:?}", persistence.audit_path());
    Ok(())
}
