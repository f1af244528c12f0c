//! Epoch lifecycle store
//!
//! Per-vault epoch status records plus an `epoch:current:vault:<vault>`
//! pointer. Status is an open string; the store never validates transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use tracing::{debug, info};

use super::keys::RecordKind;
use super::vault_records::{PointerRepair, VaultRecords};
use super::Database;
use crate::error::EpochError;
use crate::types::{EpochNumber, VaultId};

/// Well-known status values
pub mod status {
    pub const PENDING: &str = "pending";
    pub const ACTIVE: &str = "active";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// Lifecycle state of one epoch in one vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochRecord {
    pub number: EpochNumber,
    pub vault_id: VaultId,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub block_number: u64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EpochRecord {
    pub fn new(vault_id: VaultId, number: EpochNumber, status: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            number,
            vault_id,
            start_time: now,
            end_time: None,
            block_number: 0,
            status: status.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == status::COMPLETED
    }
}

/// Epoch lifecycle store backed by sled
#[derive(Clone)]
pub struct EpochStore {
    records: VaultRecords<EpochRecord>,
}

impl EpochStore {
    pub fn new(db: Database) -> Self {
        Self {
            records: VaultRecords::new(db, RecordKind::Epoch),
        }
    }

    /// Save an epoch record in full, replacing any previous one.
    ///
    /// Stamps `updatedAt`, keeps the caller's `createdAt`, then advances the
    /// current pointer on a best-effort basis.
    pub async fn save_epoch(&self, mut record: EpochRecord) -> Result<EpochRecord, EpochError> {
        record.updated_at = Utc::now();

        let vault = record.vault_id.clone();
        let number = record.number.clone();
        self.records.put(&vault, &number, &record)?;
        self.records.advance_pointer(&vault, &number);

        info!(vault = %vault, epoch = %number, status = %record.status, "Saved epoch");
        Ok(record)
    }

    pub async fn get_epoch(&self, vault: &VaultId, epoch: &EpochNumber) -> Result<EpochRecord, EpochError> {
        self.records.get(vault, epoch)?.ok_or_else(|| {
            EpochError::NotFound(format!("epoch not found for vault {}, epoch {}", vault, epoch))
        })
    }

    pub async fn get_current_epoch(&self, vault: &VaultId) -> Result<EpochRecord, EpochError> {
        self.records
            .latest(vault)?
            .map(|(_, record)| record)
            .ok_or_else(|| EpochError::NotFound(format!("no current epoch found for vault {}", vault)))
    }

    /// Epoch records for a vault, newest first. `limit == 0` returns all.
    pub async fn list_epochs(&self, vault: &VaultId, limit: usize) -> Result<Vec<EpochRecord>, EpochError> {
        Ok(self
            .records
            .list_desc(vault, limit)?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Set the status of an existing record and touch `updatedAt`.
    ///
    /// The read and the rewrite run in one sled transaction, so concurrent
    /// updates on the same key are serialized rather than lost.
    pub async fn update_status(
        &self,
        vault: &VaultId,
        epoch: &EpochNumber,
        new_status: &str,
    ) -> Result<EpochRecord, EpochError> {
        let updated = self.apply_status(vault, epoch, new_status, false)?;
        debug!(vault = %vault, epoch = %epoch, status = %new_status, "Updated epoch status");
        Ok(updated)
    }

    /// Set the status, creating the record when it does not exist yet.
    ///
    /// Moving to `completed` stamps `endTime` the first time only.
    pub async fn upsert_status(
        &self,
        vault: &VaultId,
        epoch: &EpochNumber,
        new_status: &str,
    ) -> Result<EpochRecord, EpochError> {
        let record = self.apply_status(vault, epoch, new_status, true)?;
        debug!(vault = %vault, epoch = %epoch, status = %new_status, "Upserted epoch status");
        Ok(record)
    }

    fn apply_status(
        &self,
        vault: &VaultId,
        epoch: &EpochNumber,
        new_status: &str,
        upsert: bool,
    ) -> Result<EpochRecord, EpochError> {
        let key = RecordKind::Epoch.record_key(vault, epoch)?;
        let context = format!("updating status of epoch {} for vault {}", epoch, vault);

        let updated = self
            .records
            .database()
            .tree()
            .transaction(|tx| -> ConflictableTransactionResult<EpochRecord, EpochError> {
                let mut record = match tx.get(key.as_bytes())? {
                    Some(bytes) => serde_json::from_slice::<EpochRecord>(&bytes).map_err(|e| {
                        ConflictableTransactionError::Abort(EpochError::serialization(&context, e))
                    })?,
                    None if upsert => EpochRecord::new(vault.clone(), epoch.clone(), new_status),
                    None => {
                        return Err(ConflictableTransactionError::Abort(EpochError::NotFound(format!(
                            "epoch not found for vault {}, epoch {}",
                            vault, epoch
                        ))))
                    }
                };

                let now = Utc::now();
                record.status = new_status.to_string();
                record.updated_at = now;
                if upsert && record.is_completed() && record.end_time.is_none() {
                    record.end_time = Some(now);
                }

                let encoded = serde_json::to_vec(&record).map_err(|e| {
                    ConflictableTransactionError::Abort(EpochError::serialization(&context, e))
                })?;
                tx.insert(key.as_bytes(), encoded)?;
                Ok(record)
            })
            .map_err(|e| EpochError::from_transaction(&context, e))?;

        self.records.advance_pointer(vault, epoch);
        Ok(updated)
    }

    /// Epoch the current pointer names, if any
    pub async fn current_pointer(&self, vault: &VaultId) -> Result<Option<EpochNumber>, EpochError> {
        self.records.pointer(vault)
    }

    pub async fn repair_current_pointer(&self, vault: &VaultId) -> Result<PointerRepair, EpochError> {
        let repair = self.records.repair_pointer(vault)?;
        if repair.changed() {
            info!(vault = %vault, previous = ?repair.previous, repaired = ?repair.repaired, "Repaired current epoch pointer");
        }
        Ok(repair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn vault(raw: &str) -> VaultId {
        VaultId::parse(raw).unwrap()
    }

    fn store() -> EpochStore {
        EpochStore::new(Database::temporary().unwrap())
    }

    #[tokio::test]
    async fn test_lifecycle_pending_active_completed() {
        let store = store();
        let v = vault("0xABC");
        let epoch = EpochNumber::from(1);

        store
            .save_epoch(EpochRecord::new(v.clone(), epoch.clone(), status::PENDING))
            .await
            .unwrap();
        let original = store.get_epoch(&v, &epoch).await.unwrap();

        for next in [status::ACTIVE, status::COMPLETED] {
            let updated = store.update_status(&v, &epoch, next).await.unwrap();
            assert_eq!(updated.status, next);
        }

        let done = store.get_epoch(&vault("0xabc"), &epoch).await.unwrap();
        assert!(done.is_completed());
        assert_eq!(done.created_at, original.created_at);
        assert_eq!(done.start_time, original.start_time);
        assert!(done.updated_at >= original.updated_at);
    }

    #[tokio::test]
    async fn test_status_is_open_string() {
        let store = store();
        let v = vault("0xabc");
        let epoch = EpochNumber::from(4);
        store
            .save_epoch(EpochRecord::new(v.clone(), epoch.clone(), status::ACTIVE))
            .await
            .unwrap();

        let updated = store.update_status(&v, &epoch, "awaiting-audit").await.unwrap();
        assert_eq!(updated.status, "awaiting-audit");
        // Any transition is accepted, including backwards
        store.update_status(&v, &epoch, status::PENDING).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_status_on_missing_epoch() {
        let store = store();
        let err = store
            .update_status(&vault("0xabc"), &EpochNumber::from(9), status::ACTIVE)
            .await
            .unwrap_err();
        assert!(matches!(err, EpochError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upsert_creates_and_stamps_end_time_once() {
        let store = store();
        let v = vault("0xabc");
        let epoch = EpochNumber::from(3);

        let created = store.upsert_status(&v, &epoch, status::ACTIVE).await.unwrap();
        assert_eq!(created.status, status::ACTIVE);
        assert!(created.end_time.is_none());

        let completed = store.upsert_status(&v, &epoch, status::COMPLETED).await.unwrap();
        let ended_at = completed.end_time.unwrap();
        assert_eq!(completed.created_at, created.created_at);

        let again = store.upsert_status(&v, &epoch, status::COMPLETED).await.unwrap();
        assert_eq!(again.end_time, Some(ended_at));
        assert_eq!(store.current_pointer(&v).await.unwrap(), Some(epoch));
    }

    #[tokio::test]
    async fn test_update_status_leaves_end_time_alone() {
        let store = store();
        let v = vault("0xabc");
        let epoch = EpochNumber::from(1);
        store
            .save_epoch(EpochRecord::new(v.clone(), epoch.clone(), status::ACTIVE))
            .await
            .unwrap();
        let updated = store.update_status(&v, &epoch, status::COMPLETED).await.unwrap();
        assert!(updated.end_time.is_none());
    }

    #[tokio::test]
    async fn test_current_follows_highest_epoch() {
        let store = store();
        let v = vault("0xabc");
        for n in [2u64, 8, 5] {
            store
                .save_epoch(EpochRecord::new(v.clone(), EpochNumber::from(n), status::ACTIVE))
                .await
                .unwrap();
        }
        assert_eq!(store.get_current_epoch(&v).await.unwrap().number, EpochNumber::from(8));

        // Updating an older epoch does not move the pointer back
        store
            .update_status(&v, &EpochNumber::from(2), status::COMPLETED)
            .await
            .unwrap();
        assert_eq!(store.current_pointer(&v).await.unwrap(), Some(EpochNumber::from(8)));
    }

    #[tokio::test]
    async fn test_repair_current_pointer_on_empty_vault_removes_pointer() {
        let store = store();
        let v = vault("0xabc");
        store
            .records
            .database()
            .tree()
            .insert(RecordKind::Epoch.pointer_key(&v).as_bytes(), &b"12"[..])
            .unwrap();

        let repair = store.repair_current_pointer(&v).await.unwrap();
        assert_eq!(repair.previous.as_deref(), Some("12"));
        assert_eq!(repair.repaired, None);
        assert_eq!(store.current_pointer(&v).await.unwrap(), None);
        assert!(matches!(
            store.get_current_epoch(&v).await.unwrap_err(),
            EpochError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_status_updates_all_apply() {
        let store = Arc::new(store());
        let v = vault("0xabc");
        let epoch = EpochNumber::from(1);
        store
            .save_epoch(EpochRecord::new(v.clone(), epoch.clone(), status::PENDING))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let v = v.clone();
            let epoch = epoch.clone();
            handles.push(tokio::spawn(async move {
                store.update_status(&v, &epoch, &format!("step-{}", i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let last = store.get_epoch(&v, &epoch).await.unwrap();
        assert!(last.status.starts_with("step-"));
        assert_eq!(store.list_epochs(&v, 0).await.unwrap().len(), 1);
    }
}
