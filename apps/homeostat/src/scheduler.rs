//! # Scheduler
//!
//! One tokio task per job, each driven by its own `interval` with missed
//! ticks skipped. Every tick runs in a freshly spawned task, so a panicking
//! job is reported and its timer keeps going.
//!
//! Shutdown flips a `watch` channel every job loop listens on, waits up to
//! the grace period for loops to finish their current tick, then aborts
//! whatever is left.

use crate::config::SchedulerConfig;
use homeostat_core::{Clock, Homeostat, HomeostatError, SnapshotStore, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

// =============================================================================
// JOBS
// =============================================================================

/// A periodic control-loop job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    Sample,
    Aggregate,
    Autotune,
    Drift,
    Consolidate,
    Snapshot,
}

impl Job {
    pub const ALL: [Job; 6] = [
        Job::Sample,
        Job::Aggregate,
        Job::Autotune,
        Job::Drift,
        Job::Consolidate,
        Job::Snapshot,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::Aggregate => "aggregate",
            Self::Autotune => "autotune",
            Self::Drift => "drift",
            Self::Consolidate => "consolidate",
            Self::Snapshot => "snapshot",
        }
    }

    /// Configured period, `None` when the job is disabled.
    #[must_use]
    pub fn period(self, config: &SchedulerConfig) -> Option<Duration> {
        let secs = match self {
            Self::Sample => config.sample_secs,
            Self::Aggregate => config.aggregate_secs,
            Self::Autotune => config.autotune_secs,
            Self::Drift => config.drift_secs,
            Self::Consolidate => config.consolidate_secs,
            Self::Snapshot => config.snapshot_secs,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

// =============================================================================
// TASK HEALTH
// =============================================================================

/// Run bookkeeping for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHealth {
    pub period_secs: u64,
    pub runs: u64,
    pub failures: u64,
    pub last_success: Option<Timestamp>,
    pub last_failure: Option<Timestamp>,
    pub last_error: Option<String>,
    /// No success within two periods (counted from start before the first
    /// success).
    pub stale: bool,
}

/// Per-job run history shared between the scheduler and the status API.
#[derive(Debug)]
pub struct TaskHealth {
    clock: Arc<dyn Clock>,
    started: Timestamp,
    jobs: RwLock<BTreeMap<Job, JobHealth>>,
}

impl TaskHealth {
    /// Staleness of jobs that never succeeded counts from this call.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, config: &SchedulerConfig) -> Self {
        let jobs = Job::ALL
            .iter()
            .filter_map(|job| {
                job.period(config).map(|period| {
                    (
                        *job,
                        JobHealth {
                            period_secs: period.as_secs(),
                            ..JobHealth::default()
                        },
                    )
                })
            })
            .collect();
        Self {
            started: clock.now(),
            clock,
            jobs: RwLock::new(jobs),
        }
    }

    pub fn record_success(&self, job: Job) {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs.entry(job).or_default();
        entry.runs += 1;
        entry.last_success = Some(now);
    }

    pub fn record_failure(&self, job: Job, error: impl Into<String>) {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs.entry(job).or_default();
        entry.runs += 1;
        entry.failures += 1;
        entry.last_failure = Some(now);
        entry.last_error = Some(error.into());
    }

    /// Current view with staleness evaluated against the clock.
    #[must_use]
    pub fn report(&self) -> BTreeMap<Job, JobHealth> {
        let now = self.clock.now();
        let mut jobs = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for health in jobs.values_mut() {
            let window_ms = health.period_secs.saturating_mul(2_000);
            let since = health.last_success.unwrap_or(self.started);
            health.stale = now.millis_since(since) > window_ms;
        }
        jobs
    }
}

// =============================================================================
// JOB RUNNER
// =============================================================================

/// What a tick actually does.
#[derive(Debug)]
pub struct JobRunner {
    homeostat: Arc<Homeostat>,
    store: Arc<Mutex<SnapshotStore>>,
    compact_every: u64,
    snapshots: AtomicU64,
}

impl JobRunner {
    #[must_use]
    pub fn new(
        homeostat: Arc<Homeostat>,
        store: Arc<Mutex<SnapshotStore>>,
        compact_every: u64,
    ) -> Self {
        Self {
            homeostat,
            store,
            compact_every,
            snapshots: AtomicU64::new(0),
        }
    }

    pub async fn run(&self, job: Job) -> Result<(), HomeostatError> {
        match job {
            Job::Sample => {
                let samples = self.homeostat.sample_cycle();
                tracing::debug!(job = job.as_str(), samples = samples.len(), "Sampled");
            }
            Job::Aggregate => {
                let records = self.homeostat.aggregate_cycle();
                tracing::debug!(job = job.as_str(), indices = records.len(), "Aggregated");
            }
            Job::Autotune => {
                let event = self.homeostat.autotune_tick();
                tracing::info!(job = job.as_str(), next = event.next, reason = %event.reason, "Auto-tune tick");
            }
            Job::Drift => {
                let report = self.homeostat.drift_tick();
                tracing::info!(
                    job = job.as_str(),
                    drift = report.drift,
                    recalibrated = report.recalibrated,
                    "Drift tick"
                );
            }
            Job::Consolidate => {
                let report = self.homeostat.consolidate();
                tracing::info!(
                    job = job.as_str(),
                    anchors = report.anchors_created.len(),
                    "Consolidated"
                );
            }
            Job::Snapshot => {
                let count = self.snapshots.fetch_add(1, Ordering::SeqCst) + 1;
                let compact = self.compact_every > 0 && count % self.compact_every == 0;
                persist_snapshot(self.homeostat.clone(), self.store.clone(), compact).await?;
            }
        }
        Ok(())
    }
}

/// Save a snapshot on the blocking pool, optionally compacting afterwards.
pub async fn persist_snapshot(
    homeostat: Arc<Homeostat>,
    store: Arc<Mutex<SnapshotStore>>,
    compact: bool,
) -> Result<(), HomeostatError> {
    tokio::task::spawn_blocking(move || {
        let snapshot = homeostat.snapshot();
        let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
        store.save(&snapshot)?;
        if compact {
            store.compact()?;
            tracing::info!("Snapshot store compacted");
        }
        tracing::debug!(cycle = snapshot.cycle, "Snapshot saved");
        Ok(())
    })
    .await
    .map_err(|e| HomeostatError::PersistenceError(format!("Snapshot task failed: {}", e)))?
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Owns every job loop and their cancellation.
#[derive(Debug)]
pub struct Scheduler {
    runner: Arc<JobRunner>,
    health: Arc<TaskHealth>,
    config: SchedulerConfig,
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Scheduler {
    #[must_use]
    pub fn new(runner: Arc<JobRunner>, health: Arc<TaskHealth>, config: SchedulerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            runner,
            health,
            config,
            shutdown_tx,
            tasks: JoinSet::new(),
        }
    }

    /// Spawn a loop for every enabled job.
    pub fn start(&mut self) {
        for job in Job::ALL {
            let Some(period) = job.period(&self.config) else {
                tracing::info!(job = job.as_str(), "Job disabled");
                continue;
            };
            tracing::info!(job = job.as_str(), period_secs = period.as_secs(), "Job scheduled");
            self.tasks.spawn(job_loop(
                job,
                period,
                self.runner.clone(),
                self.health.clone(),
                self.shutdown_tx.subscribe(),
            ));
        }
    }

    /// Number of live job loops.
    #[must_use]
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every timer. Loops get the grace period to finish their tick.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);

        let grace = self.config.shutdown_grace();
        let drain = async { while self.tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                "Jobs still running after grace period, aborting"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn job_loop(
    job: Job,
    period: Duration,
    runner: Arc<JobRunner>,
    health: Arc<TaskHealth>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick completes immediately; jobs first run one period in
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let tick_runner = runner.clone();
                let outcome = tokio::spawn(async move { tick_runner.run(job).await }).await;
                match outcome {
                    Ok(Ok(())) => health.record_success(job),
                    Ok(Err(e)) => {
                        tracing::warn!(event = "job_failed", job = job.as_str(), error = %e, "Job tick failed");
                        health.record_failure(job, e.to_string());
                    }
                    Err(e) if e.is_panic() => {
                        tracing::error!(event = "job_panicked", job = job.as_str(), "Job tick panicked");
                        health.record_failure(job, "panicked");
                    }
                    Err(e) => {
                        tracing::warn!(event = "job_cancelled", job = job.as_str(), error = %e, "Job tick cancelled");
                        health.record_failure(job, e.to_string());
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!(job = job.as_str(), "Job loop stopped");
}
