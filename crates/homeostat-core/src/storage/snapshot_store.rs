//! # redb-backed Snapshot Store
//!
//! Keeps the latest monitor snapshot, plus the one before it, in a redb
//! database. Each save is a single ACID transaction, so a crash mid-save
//! leaves the previous generation intact.
//!
//! A snapshot that fails validation on load falls back to the previous
//! generation. If neither is usable the error is returned and the caller
//! starts from defaults.
//!
//! A database file redb cannot open at all is renamed to
//! `<file>.corrupt-<millis>` and replaced with an empty store.

use crate::formats::{MonitorSnapshot, snapshot_from_bytes, snapshot_to_bytes};
use crate::types::{HomeostatError, Timestamp};
use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};

/// Snapshot payloads, keyed by generation.
const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Counters: `saves`, `saved_at`.
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const LATEST: &str = "latest";
const PREVIOUS: &str = "previous";

/// Disk-backed snapshot store.
pub struct SnapshotStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Store bookkeeping for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreInfo {
    pub saves: u64,
    pub last_saved_at: Option<Timestamp>,
}

enum OpenFailure {
    /// Another handle holds the database.
    Busy(HomeostatError),
    /// The file is not a usable redb database.
    Unreadable(HomeostatError),
}

impl OpenFailure {
    fn into_error(self) -> HomeostatError {
        match self {
            Self::Busy(e) | Self::Unreadable(e) => e,
        }
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".corrupt-{}", millis));
    path.with_file_name(name)
}

impl SnapshotStore {
    /// Open or create a snapshot database at the given path.
    ///
    /// An unreadable existing file is moved aside (see module docs) and a
    /// fresh database is created in its place. A database locked by another
    /// process is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HomeostatError> {
        let path = path.as_ref().to_path_buf();
        match Self::open_db(&path) {
            Ok(store) => Ok(store),
            Err(OpenFailure::Unreadable(e)) if path.is_file() => {
                let aside = quarantine_path(&path);
                tracing::warn!(
                    event = "snapshot_corrupt",
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "Snapshot database unreadable, starting from an empty store"
                );
                std::fs::rename(&path, &aside).map_err(|rename| {
                    HomeostatError::IoError(format!(
                        "Cannot move corrupt snapshot '{}' aside: {} (open failed: {})",
                        path.display(),
                        rename,
                        e
                    ))
                })?;
                Self::open_db(&path).map_err(OpenFailure::into_error)
            }
            Err(failure) => Err(failure.into_error()),
        }
    }

    fn open_db(path: &Path) -> Result<Self, OpenFailure> {
        let db = Database::create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen | DatabaseError::TransactionInProgress => {
                OpenFailure::Busy(HomeostatError::IoError(e.to_string()))
            }
            other => OpenFailure::Unreadable(HomeostatError::IoError(other.to_string())),
        })?;

        let unreadable = |e: String| OpenFailure::Unreadable(HomeostatError::IoError(e));
        {
            let write_txn = db.begin_write().map_err(|e| unreadable(e.to_string()))?;
            let _ = write_txn
                .open_table(SNAPSHOTS)
                .map_err(|e| unreadable(e.to_string()))?;
            let _ = write_txn
                .open_table(METADATA)
                .map_err(|e| unreadable(e.to_string()))?;
            write_txn.commit().map_err(|e| unreadable(e.to_string()))?;
        }

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a snapshot, demoting the current one to the previous
    /// generation.
    pub fn save(&self, snapshot: &MonitorSnapshot) -> Result<(), HomeostatError> {
        let bytes = snapshot_to_bytes(snapshot)?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(SNAPSHOTS)
                .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
            let current = table
                .get(LATEST)
                .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?
                .map(|v| v.value().to_vec());
            if let Some(current) = current {
                table
                    .insert(PREVIOUS, current.as_slice())
                    .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
            }
            table
                .insert(LATEST, bytes.as_slice())
                .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;

            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
            let saves = meta
                .get("saves")
                .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?
                .map(|v| v.value())
                .unwrap_or(0);
            meta.insert("saves", saves + 1)
                .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
            meta.insert("saved_at", snapshot.taken_at.as_millis())
                .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;

        tracing::debug!(
            bytes = bytes.len(),
            cycle = snapshot.cycle,
            "Snapshot saved"
        );
        Ok(())
    }

    /// Load the newest usable snapshot.
    ///
    /// Returns `Ok(None)` for an empty store.
    pub fn load(&self) -> Result<Option<MonitorSnapshot>, HomeostatError> {
        let latest = self.read_raw(LATEST)?;
        let Some(latest) = latest else {
            return Ok(None);
        };

        match snapshot_from_bytes(&latest) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(latest_err) => {
                tracing::warn!(
                    event = "snapshot_corrupt",
                    error = %latest_err,
                    "Latest snapshot unreadable; trying previous generation"
                );
                match self.read_raw(PREVIOUS)? {
                    Some(previous) => snapshot_from_bytes(&previous).map(Some),
                    None => Err(latest_err),
                }
            }
        }
    }

    fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>, HomeostatError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
        let table = read_txn
            .open_table(SNAPSHOTS)
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
        Ok(table
            .get(key)
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?
            .map(|v| v.value().to_vec()))
    }

    pub fn info(&self) -> Result<StoreInfo, HomeostatError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
        let table = read_txn
            .open_table(METADATA)
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
        let saves = table
            .get("saves")
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?
            .map(|v| v.value())
            .unwrap_or(0);
        let last_saved_at = table
            .get("saved_at")
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?
            .map(|v| Timestamp(v.value()));
        Ok(StoreInfo {
            saves,
            last_saved_at,
        })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), HomeostatError> {
        self.db
            .compact()
            .map_err(|e| HomeostatError::IoError(e.to_string()))?;
        Ok(())
    }

    #[cfg(test)]
    fn put_raw(&self, key: &str, bytes: &[u8]) -> Result<(), HomeostatError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(SNAPSHOTS)
                .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
            table
                .insert(key, bytes)
                .map_err(|e| HomeostatError::PersistenceError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| HomeostatError::PersistenceError(e.to_string()))
    }
}
