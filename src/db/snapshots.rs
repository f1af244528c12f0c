//! Merkle snapshot store
//!
//! One snapshot per (vault, epoch), plus a `latest:vault:<vault>` pointer.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::keys::RecordKind;
use super::vault_records::{PointerRepair, VaultRecords};
use super::Database;
use crate::error::EpochError;
use crate::types::{decimal, normalize_address, EpochNumber, VaultId};

/// A leaf of the merkle tree: one address and its accrued total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleEntry {
    pub address: String,
    #[serde(with = "decimal")]
    pub total_earned: BigUint,
}

impl MerkleEntry {
    pub fn new(address: &str, total_earned: BigUint) -> Self {
        Self {
            address: normalize_address(address),
            total_earned,
        }
    }
}

/// Point-in-time per-address totals and root for one vault/epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleSnapshot {
    pub epoch_number: EpochNumber,
    pub vault_id: VaultId,
    pub entries: Vec<MerkleEntry>,
    /// Hex-encoded root
    pub merkle_root: String,
    pub block_number: u64,
    /// Unix seconds the totals were computed for
    pub timestamp: i64,
    pub created_at: DateTime<Utc>,
}

impl MerkleSnapshot {
    pub fn new(vault_id: VaultId, epoch_number: EpochNumber, entries: Vec<MerkleEntry>, merkle_root: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            epoch_number,
            vault_id,
            entries,
            merkle_root: merkle_root.into(),
            block_number: 0,
            timestamp: now.timestamp(),
            created_at: now,
        }
    }

    pub fn with_block(mut self, block_number: u64, timestamp: i64) -> Self {
        self.block_number = block_number;
        self.timestamp = timestamp;
        self
    }

    /// Sum of every entry's total
    pub fn total_earned(&self) -> BigUint {
        self.entries.iter().map(|e| &e.total_earned).sum()
    }

    /// Entry for an address, compared case-insensitively
    pub fn entry_for(&self, address: &str) -> Option<&MerkleEntry> {
        let address = normalize_address(address);
        self.entries
            .iter()
            .find(|e| normalize_address(&e.address) == address)
    }
}

/// Snapshot store backed by sled
#[derive(Clone)]
pub struct SnapshotStore {
    records: VaultRecords<MerkleSnapshot>,
}

impl SnapshotStore {
    pub fn new(db: Database) -> Self {
        Self {
            records: VaultRecords::new(db, RecordKind::Snapshot),
        }
    }

    pub fn database(&self) -> &Database {
        self.records.database()
    }

    /// Save a snapshot, replacing any previous one for the same vault/epoch.
    ///
    /// The record's vault and epoch are forced to the key's and `createdAt` is
    /// stamped. The latest pointer is advanced afterwards on a best-effort basis.
    pub async fn save_snapshot(
        &self,
        vault: &VaultId,
        epoch: &EpochNumber,
        mut snapshot: MerkleSnapshot,
    ) -> Result<MerkleSnapshot, EpochError> {
        snapshot.vault_id = vault.clone();
        snapshot.epoch_number = epoch.clone();
        snapshot.created_at = Utc::now();

        self.records.put(vault, epoch, &snapshot)?;
        self.records.advance_pointer(vault, epoch);

        info!(
            vault = %vault,
            epoch = %epoch,
            entries = snapshot.entries.len(),
            "Saved merkle snapshot"
        );
        Ok(snapshot)
    }

    pub async fn get_snapshot(&self, vault: &VaultId, epoch: &EpochNumber) -> Result<MerkleSnapshot, EpochError> {
        self.records.get(vault, epoch)?.ok_or_else(|| {
            EpochError::NotFound(format!("snapshot not found for vault {}, epoch {}", vault, epoch))
        })
    }

    pub async fn get_latest_snapshot(&self, vault: &VaultId) -> Result<MerkleSnapshot, EpochError> {
        self.records
            .latest(vault)?
            .map(|(_, snapshot)| snapshot)
            .ok_or_else(|| EpochError::NotFound(format!("no snapshots found for vault {}", vault)))
    }

    /// Snapshots for a vault, newest epoch first. `limit == 0` returns all.
    pub async fn list_snapshots(&self, vault: &VaultId, limit: usize) -> Result<Vec<MerkleSnapshot>, EpochError> {
        Ok(self
            .records
            .list_desc(vault, limit)?
            .into_iter()
            .map(|(_, snapshot)| snapshot)
            .collect())
    }

    /// Epoch the latest pointer currently names, if any
    pub async fn latest_pointer(&self, vault: &VaultId) -> Result<Option<EpochNumber>, EpochError> {
        self.records.pointer(vault)
    }

    pub async fn repair_latest_pointer(&self, vault: &VaultId) -> Result<PointerRepair, EpochError> {
        let repair = self.records.repair_pointer(vault)?;
        if repair.changed() {
            info!(vault = %vault, previous = ?repair.previous, repaired = ?repair.repaired, "Repaired latest snapshot pointer");
        }
        Ok(repair)
    }
}
