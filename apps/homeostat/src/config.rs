//! # Application Configuration
//!
//! One TOML file configures the daemon: HTTP bind address, scheduler
//! periods, persistence paths and the monitor itself. Every section
//! defaults, so a missing file or an empty one both work.
//!
//! ```toml
//! [server]
//! port = 9090
//!
//! [scheduler]
//! sample_secs = 60
//!
//! [monitor.autotune]
//! target = 0.8
//! ```
//!
//! HTTP security settings are not in the file; they come from
//! `HOMEOSTAT_API_KEY`, `HOMEOSTAT_RATE_LIMIT` and `HOMEOSTAT_CORS_ORIGINS`.

use homeostat_core::{HomeostatConfig, HomeostatError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up inside the data directory when `--config` is absent.
pub const CONFIG_FILE_NAME: &str = "homeostat.toml";

/// Maximum configuration file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// SECTIONS
// =============================================================================

/// HTTP server bind address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Timer periods in seconds. A period of 0 disables the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sample_secs: u64,
    pub aggregate_secs: u64,
    pub autotune_secs: u64,
    pub drift_secs: u64,
    pub consolidate_secs: u64,
    pub snapshot_secs: u64,
    /// Compact the snapshot database after this many snapshots (0 = never).
    pub compact_every: u64,
    /// How long shutdown waits for running ticks before aborting them.
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sample_secs: 5 * 60,
            aggregate_secs: 15 * 60,
            autotune_secs: 12 * 60 * 60,
            drift_secs: 24 * 60 * 60,
            consolidate_secs: 6 * 60 * 60,
            snapshot_secs: 10 * 60,
            compact_every: 144,
            shutdown_grace_secs: 10,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Where state lives on disk and how hard the writers try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
    pub snapshot_file: String,
    pub audit_file: String,
    /// Bounded audit queue; records beyond it are dropped with a warning.
    pub audit_queue_capacity: usize,
    pub write_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("homeostat-data"),
            snapshot_file: "snapshot.redb".to_string(),
            audit_file: "audit.jsonl".to_string(),
            audit_queue_capacity: 1024,
            write_timeout_ms: 2000,
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    #[must_use]
    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join(&self.audit_file)
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub persistence: PersistenceConfig,
    pub monitor: HomeostatConfig,
}

impl AppConfig {
    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml(text: &str) -> Result<Self, HomeostatError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| HomeostatError::ConfigurationError(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration for a CLI invocation.
    ///
    /// An explicit `--config` path must exist. Without one, the data
    /// directory's `homeostat.toml` is used when present, otherwise
    /// defaults. `--data-dir` overrides the file's `persistence.data_dir`.
    pub fn load(path: Option<&Path>, data_dir: Option<&Path>) -> Result<Self, HomeostatError> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let dir = data_dir
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PersistenceConfig::default().data_dir);
                let implicit = dir.join(CONFIG_FILE_NAME);
                implicit.is_file().then_some(implicit)
            }
        };

        let mut config = match candidate {
            Some(file) => {
                let metadata = std::fs::metadata(&file).map_err(|e| {
                    HomeostatError::IoError(format!(
                        "Cannot read config '{}': {}",
                        file.display(),
                        e
                    ))
                })?;
                if metadata.len() > MAX_CONFIG_FILE_SIZE {
                    return Err(HomeostatError::ConfigurationError(format!(
                        "Config file size {} bytes exceeds maximum {} bytes",
                        metadata.len(),
                        MAX_CONFIG_FILE_SIZE
                    )));
                }
                let text = std::fs::read_to_string(&file).map_err(|e| {
                    HomeostatError::IoError(format!(
                        "Cannot read config '{}': {}",
                        file.display(),
                        e
                    ))
                })?;
                tracing::info!(path = %file.display(), "Loaded configuration");
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };

        if let Some(dir) = data_dir {
            config.persistence.data_dir = dir.to_path_buf();
        }
        Ok(config)
    }

    /// Checks on the daemon sections plus the monitor's own validation.
    pub fn validate(&self) -> Result<(), HomeostatError> {
        if self.persistence.audit_queue_capacity == 0 {
            return Err(HomeostatError::ConfigurationError(
                "persistence.audit_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.persistence.write_timeout_ms == 0 {
            return Err(HomeostatError::ConfigurationError(
                "persistence.write_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.persistence.snapshot_file == self.persistence.audit_file {
            return Err(HomeostatError::ConfigurationError(
                "snapshot and audit files must differ".to_string(),
            ));
        }
        self.monitor.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let config = AppConfig::from_toml("").expect("empty config");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            port = 9090

            [scheduler]
            sample_secs = 60

            [monitor.autotune]
            target = 0.8
            "#,
        )
        .expect("partial config");

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.scheduler.sample_secs, 60);
        assert_eq!(config.scheduler.aggregate_secs, 15 * 60);
        assert!((config.monitor.autotune.target - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_monitor_section_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [monitor.drift]
            gain = 3.0
            "#,
        );
        assert!(matches!(
            result,
            Err(HomeostatError::ConfigurationError(_))
        ));
    }

    #[test]
    fn zero_queue_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [persistence]
            audit_queue_capacity = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn data_dir_flag_overrides_file() {
        let temp = tempfile::tempdir().expect("temp dir");
        let file = temp.path().join("custom.toml");
        std::fs::write(&file, "[persistence]\ndata_dir = \"elsewhere\"\n").expect("write");

        let config = AppConfig::load(Some(&file), Some(temp.path())).expect("load");
        assert_eq!(config.persistence.data_dir, temp.path());
        assert_eq!(
            config.persistence.snapshot_path(),
            temp.path().join("snapshot.redb")
        );
    }

    #[test]
    fn implicit_file_in_data_dir_is_used() {
        let temp = tempfile::tempdir().expect("temp dir");
        std::fs::write(temp.path().join(CONFIG_FILE_NAME), "[server]\nport = 7000\n")
            .expect("write");

        let config = AppConfig::load(None, Some(temp.path())).expect("load");
        assert_eq!(config.server.port, 7000);
    }

    #[test]
    fn explicit_missing_file_is_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/homeostat.toml")), None);
        assert!(matches!(result, Err(HomeostatError::IoError(_))));
    }
}
