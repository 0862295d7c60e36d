//! Durable storage backends.

pub mod snapshot_store;

pub use snapshot_store::{SnapshotStore, StoreInfo};
