//! sled-backed storage for epochs, snapshots and distributions
//!
//! All three stores share one ordered keyspace; [`keys`] defines the layout.
//!
//! ## Consistency
//!
//! - Primary record writes are single sled operations.
//! - Latest/current pointers are advanced after the primary write, in a
//!   separate step. A pointer failure is logged and never fails the save.
//!   Readers fall back to a reverse prefix scan when the pointer is missing
//!   or stale.
//! - Status updates run read-modify-write inside one sled transaction.
//! - A distribution and its two index entries are written in one sled
//!   transaction, so the indexes never diverge from the primary records.

pub mod distributions;
pub mod epochs;
pub mod keys;
pub mod snapshots;
mod vault_records;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::EpochError;

pub use distributions::{DistributionStore, SubsidyDistribution};
pub use epochs::{EpochRecord, EpochStore};
pub use snapshots::{MerkleEntry, MerkleSnapshot, SnapshotStore};
pub use vault_records::PointerRepair;

/// Configuration for the sled database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to sled database
    pub path: PathBuf,
    /// Cache size in bytes
    pub cache_capacity: u64,
    /// Background flush interval, `None` to flush only on demand
    pub flush_every_ms: Option<u64>,
    /// Delete the database when the last handle is dropped
    pub temporary: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("epoch-ledger.sled"),
            cache_capacity: 64 * 1024 * 1024, // 64MB
            flush_every_ms: Some(500),
            temporary: false,
        }
    }
}

/// Shared handle to the ledger keyspace. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    db: sled::Db,
}

impl Database {
    /// Open or create the database
    pub fn open(config: &DatabaseConfig) -> Result<Self, EpochError> {
        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .flush_every_ms(config.flush_every_ms)
            .temporary(config.temporary)
            .open()
            .map_err(|e| EpochError::database(format!("opening {}", config.path.display()), e))?;

        info!(path = %config.path.display(), "Opened epoch ledger database");
        Ok(Self { db })
    }

    /// Open or create the database at a path with default settings
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, EpochError> {
        Self::open(&DatabaseConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    /// Throwaway database, removed on drop (for testing)
    pub fn temporary() -> Result<Self, EpochError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| EpochError::database("opening temporary database", e))?;
        Ok(Self { db })
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.db
    }

    pub(crate) fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
        context: &str,
    ) -> Result<Option<T>, EpochError> {
        let Some(bytes) = self
            .db
            .get(key.as_bytes())
            .map_err(|e| EpochError::database(context, e))?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| EpochError::serialization(context, e))
    }

    pub(crate) fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        context: &str,
    ) -> Result<(), EpochError> {
        let bytes = serde_json::to_vec(value).map_err(|e| EpochError::serialization(context, e))?;
        self.db
            .insert(key.as_bytes(), bytes)
            .map_err(|e| EpochError::database(context, e))?;
        Ok(())
    }

    /// Number of keys across all record families
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Flush changes to disk
    pub async fn flush(&self) -> Result<(), EpochError> {
        self.db
            .flush_async()
            .await
            .map_err(|e| EpochError::database("flushing database", e))?;
        Ok(())
    }
}
