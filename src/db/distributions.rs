//! Subsidy distribution store
//!
//! Distributions are keyed by a caller-chosen id and reachable through two
//! index families:
//!
//! - `epoch-index:<padded-epoch>:vault:<vault>:<id>` for (epoch, vault) scans
//! - `status-index:<status>:<id>` for status scans
//!
//! There is no full-table scan, so the primary record and both index entries
//! are always written in one sled transaction.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use tracing::{debug, info, warn};

use super::keys;
use super::Database;
use crate::error::EpochError;
use crate::types::{decimal, normalize_address, EpochNumber, VaultId};

/// Well-known distribution status values
pub mod status {
    pub const PENDING: &str = "pending";
    pub const DISTRIBUTED: &str = "distributed";
    pub const FAILED: &str = "failed";
}

/// One subsidy payout action for a vault and epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsidyDistribution {
    pub id: String,
    pub epoch_number: EpochNumber,
    pub vault_id: VaultId,
    pub collection_address: String,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubsidyDistribution {
    pub fn new(
        id: impl Into<String>,
        epoch_number: EpochNumber,
        vault_id: VaultId,
        collection_address: &str,
        amount: BigUint,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            epoch_number,
            vault_id,
            collection_address: normalize_address(collection_address),
            amount,
            status: status::PENDING.to_string(),
            tx_hash: None,
            block_number: None,
            created_at: now,
            updated_at: now,
        }
    }
}

fn validate_id(id: &str) -> Result<(), EpochError> {
    if id.is_empty() {
        return Err(EpochError::InvalidInput("distribution id cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_status(status: &str) -> Result<(), EpochError> {
    if status.is_empty() || status.contains(':') {
        return Err(EpochError::InvalidInput(format!(
            "distribution status {:?} must be non-empty and free of ':'",
            status
        )));
    }
    Ok(())
}

fn abort(err: EpochError) -> ConflictableTransactionError<EpochError> {
    ConflictableTransactionError::Abort(err)
}

/// Distribution store backed by sled
#[derive(Clone)]
pub struct DistributionStore {
    db: Database,
}

impl DistributionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn read_in_tx(
        tx: &TransactionalTree,
        key: &str,
        context: &str,
    ) -> ConflictableTransactionResult<Option<SubsidyDistribution>, EpochError> {
        match tx.get(key.as_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| abort(EpochError::serialization(context, e))),
            None => Ok(None),
        }
    }

    /// Write the primary record and its index entries, dropping the index
    /// entries of `previous` so the indexes stay exact.
    fn write_in_tx(
        tx: &TransactionalTree,
        previous: Option<&SubsidyDistribution>,
        record: &SubsidyDistribution,
        context: &str,
    ) -> ConflictableTransactionResult<(), EpochError> {
        if let Some(old) = previous {
            let old_epoch_key = keys::epoch_index_key(&old.epoch_number, &old.vault_id, &old.id).map_err(abort)?;
            tx.remove(old_epoch_key.as_bytes())?;
            tx.remove(keys::status_index_key(&old.status, &old.id).as_bytes())?;
        }

        let encoded = serde_json::to_vec(record).map_err(|e| abort(EpochError::serialization(context, e)))?;
        let epoch_key = keys::epoch_index_key(&record.epoch_number, &record.vault_id, &record.id).map_err(abort)?;

        tx.insert(keys::distribution_key(&record.id).as_bytes(), encoded)?;
        tx.insert(epoch_key.as_bytes(), &b""[..])?;
        tx.insert(keys::status_index_key(&record.status, &record.id).as_bytes(), &b""[..])?;
        Ok(())
    }

    /// Save a distribution, replacing any record with the same id in full.
    pub async fn save_distribution(&self, mut distribution: SubsidyDistribution) -> Result<SubsidyDistribution, EpochError> {
        validate_id(&distribution.id)?;
        validate_status(&distribution.status)?;
        // Surface an unencodable epoch before entering the transaction
        keys::pad_epoch(&distribution.epoch_number)?;

        distribution.updated_at = Utc::now();

        let key = keys::distribution_key(&distribution.id);
        let context = format!("saving distribution {}", distribution.id);

        let replaced = self
            .db
            .tree()
            .transaction(|tx| -> ConflictableTransactionResult<bool, EpochError> {
                let previous = Self::read_in_tx(tx, &key, &context)?;
                Self::write_in_tx(tx, previous.as_ref(), &distribution, &context)?;
                Ok(previous.is_some())
            })
            .map_err(|e| EpochError::from_transaction(&context, e))?;

        if replaced {
            warn!(id = %distribution.id, "Overwrote existing distribution with the same id");
        }
        info!(
            id = %distribution.id,
            epoch = %distribution.epoch_number,
            vault = %distribution.vault_id,
            amount = %distribution.amount,
            "Saved subsidy distribution"
        );
        Ok(distribution)
    }

    pub async fn get_distribution(&self, id: &str) -> Result<SubsidyDistribution, EpochError> {
        let context = format!("reading distribution {}", id);
        self.db
            .get_json(&keys::distribution_key(id), &context)?
            .ok_or_else(|| EpochError::NotFound(format!("distribution not found: {}", id)))
    }

    /// Resolve index entries under `prefix` to records. Entries whose primary
    /// record cannot be read are logged and skipped.
    ///
    /// The scan and the record reads are separate steps, so a record can
    /// move between them. `still_indexed` rechecks each record against the
    /// index it was found through and drops the ones that have left it.
    fn collect_indexed<F>(
        &self,
        prefix: &str,
        limit: usize,
        context: &str,
        still_indexed: F,
    ) -> Result<Vec<SubsidyDistribution>, EpochError>
    where
        F: Fn(&SubsidyDistribution) -> bool,
    {
        let mut distributions = Vec::new();

        for item in self.db.tree().scan_prefix(prefix.as_bytes()) {
            if limit != 0 && distributions.len() >= limit {
                break;
            }
            let (key, _) = item.map_err(|e| EpochError::database(context, e))?;
            let Some(id) = key.strip_prefix(prefix.as_bytes()) else {
                continue;
            };
            let id = String::from_utf8_lossy(id).into_owned();

            match self.db.get_json::<SubsidyDistribution>(&keys::distribution_key(&id), context) {
                Ok(Some(distribution)) if still_indexed(&distribution) => distributions.push(distribution),
                Ok(Some(distribution)) => debug!(
                    id = %id,
                    status = %distribution.status,
                    epoch = %distribution.epoch_number,
                    vault = %distribution.vault_id,
                    "Distribution moved during listing, skipping"
                ),
                Ok(None) => warn!(id = %id, "Index entry without distribution record"),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable distribution"),
            }
        }

        Ok(distributions)
    }

    /// All distributions for one (epoch, vault), ordered by id
    pub async fn list_distributions_by_epoch(
        &self,
        epoch: &EpochNumber,
        vault: &VaultId,
    ) -> Result<Vec<SubsidyDistribution>, EpochError> {
        let prefix = keys::epoch_index_prefix(epoch, vault)?;
        let context = format!("listing distributions for vault {}, epoch {}", vault, epoch);
        self.collect_indexed(&prefix, 0, &context, |d| {
            &d.epoch_number == epoch && &d.vault_id == vault
        })
    }

    /// Distributions with a given status, ordered by id. `limit == 0` returns all.
    pub async fn list_distributions_by_status(
        &self,
        status: &str,
        limit: usize,
    ) -> Result<Vec<SubsidyDistribution>, EpochError> {
        if validate_status(status).is_err() {
            return Ok(Vec::new());
        }
        let prefix = keys::status_index_prefix(status);
        let context = format!("listing distributions with status {}", status);
        self.collect_indexed(&prefix, limit, &context, |d| d.status == status)
    }

    /// Change a distribution's status and record its transaction.
    ///
    /// `tx_hash` and `block_number` only overwrite when non-empty, so a later
    /// failure does not erase a hash recorded earlier. The status index is
    /// moved in the same transaction as the primary rewrite.
    pub async fn update_status(
        &self,
        id: &str,
        new_status: &str,
        tx_hash: Option<&str>,
        block_number: Option<u64>,
    ) -> Result<SubsidyDistribution, EpochError> {
        validate_status(new_status)?;

        let key = keys::distribution_key(id);
        let context = format!("updating status of distribution {}", id);
        let tx_hash = tx_hash.filter(|h| !h.is_empty());
        let block_number = block_number.filter(|b| *b > 0);

        let updated = self
            .db
            .tree()
            .transaction(|tx| -> ConflictableTransactionResult<SubsidyDistribution, EpochError> {
                let Some(previous) = Self::read_in_tx(tx, &key, &context)? else {
                    return Err(abort(EpochError::NotFound(format!("distribution not found: {}", id))));
                };

                let mut record = previous.clone();
                record.status = new_status.to_string();
                if let Some(hash) = tx_hash {
                    record.tx_hash = Some(hash.to_string());
                }
                if let Some(block) = block_number {
                    record.block_number = Some(block);
                }
                record.updated_at = Utc::now();

                Self::write_in_tx(tx, Some(&previous), &record, &context)?;
                Ok(record)
            })
            .map_err(|e| EpochError::from_transaction(&context, e))?;

        debug!(id = %id, status = %new_status, tx_hash = ?updated.tx_hash, "Updated distribution status");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(raw: &str) -> VaultId {
        VaultId::parse(raw).unwrap()
    }

    fn store() -> DistributionStore {
        DistributionStore::new(Database::temporary().unwrap())
    }

    fn distribution(id: &str, epoch: u64, v: &str) -> SubsidyDistribution {
        SubsidyDistribution::new(
            id,
            EpochNumber::from(epoch),
            vault(v),
            "0xC011EC7100",
            BigUint::from(1_000u32),
        )
    }

    fn index_keys(store: &DistributionStore, prefix: &str) -> Vec<String> {
        store
            .db
            .tree()
            .scan_prefix(prefix.as_bytes())
            .map(|item| String::from_utf8(item.unwrap().0.to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_save_writes_primary_and_indexes() {
        let store = store();
        let saved = store.save_distribution(distribution("d1", 3, "0xABC")).await.unwrap();
        assert_eq!(saved.collection_address, "0xc011ec7100");

        assert_eq!(store.get_distribution("d1").await.unwrap(), saved);
        assert_eq!(
            index_keys(&store, "epoch-index:"),
            vec!["epoch-index:00000000000000000003:vault:0xabc:d1".to_string()]
        );
        assert_eq!(index_keys(&store, "status-index:"), vec!["status-index:pending:d1".to_string()]);
    }

    #[tokio::test]
    async fn test_tx_hash_survives_later_failure() {
        let store = store();
        store.save_distribution(distribution("d1", 1, "0xabc")).await.unwrap();

        store
            .update_status("d1", status::DISTRIBUTED, Some("0xhash"), Some(100))
            .await
            .unwrap();
        let failed = store.update_status("d1", status::FAILED, Some(""), None).await.unwrap();

        assert_eq!(failed.status, status::FAILED);
        assert_eq!(failed.tx_hash.as_deref(), Some("0xhash"));
        assert_eq!(failed.block_number, Some(100));
    }

    #[tokio::test]
    async fn test_status_index_moves_with_status() {
        let store = store();
        store.save_distribution(distribution("d1", 1, "0xabc")).await.unwrap();
        store
            .update_status("d1", status::DISTRIBUTED, Some("0xhash"), None)
            .await
            .unwrap();

        assert!(store.list_distributions_by_status(status::PENDING, 0).await.unwrap().is_empty());
        let distributed = store
            .list_distributions_by_status(status::DISTRIBUTED, 0)
            .await
            .unwrap();
        assert_eq!(distributed.len(), 1);
        assert_eq!(index_keys(&store, "status-index:").len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_overwrites_and_reindexes() {
        let store = store();
        store.save_distribution(distribution("dup", 1, "0xabc")).await.unwrap();

        let mut replacement = distribution("dup", 2, "0xdef");
        replacement.status = status::DISTRIBUTED.to_string();
        replacement.amount = BigUint::from(5u32);
        store.save_distribution(replacement).await.unwrap();

        let got = store.get_distribution("dup").await.unwrap();
        assert_eq!(got.amount, BigUint::from(5u32));
        assert_eq!(got.vault_id, vault("0xdef"));

        assert!(store
            .list_distributions_by_epoch(&EpochNumber::from(1), &vault("0xabc"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .list_distributions_by_epoch(&EpochNumber::from(2), &vault("0xdef"))
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(index_keys(&store, "epoch-index:").len(), 1);
        assert_eq!(
            index_keys(&store, "status-index:"),
            vec!["status-index:distributed:dup".to_string()]
        );
    }

    #[tokio::test]
    async fn test_listings_drop_records_that_left_the_index() {
        let store = store();
        let mut moved = distribution("d1", 2, "0xabc");
        moved.status = status::DISTRIBUTED.to_string();
        store.save_distribution(moved).await.unwrap();

        // Index entries left behind by a record that has since moved on
        let tree = store.db.tree();
        tree.insert(keys::status_index_key(status::PENDING, "d1").as_bytes(), &b""[..])
            .unwrap();
        tree.insert(
            keys::epoch_index_key(&EpochNumber::from(1), &vault("0xabc"), "d1")
                .unwrap()
                .as_bytes(),
            &b""[..],
        )
        .unwrap();

        assert!(store.list_distributions_by_status(status::PENDING, 0).await.unwrap().is_empty());
        assert!(store
            .list_distributions_by_epoch(&EpochNumber::from(1), &vault("0xabc"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .list_distributions_by_status(status::DISTRIBUTED, 0)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pending_listing_during_concurrent_updates() {
        let store = store();
        for i in 0..50 {
            store
                .save_distribution(distribution(&format!("d{:02}", i), 1, "0xabc"))
                .await
                .unwrap();
        }

        let updater = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    store
                        .update_status(&format!("d{:02}", i), status::DISTRIBUTED, Some("0xhash"), None)
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..200 {
            let pending = store.list_distributions_by_status(status::PENDING, 0).await.unwrap();
            assert!(pending.iter().all(|d| d.status == status::PENDING));
            tokio::task::yield_now().await;
        }

        updater.await.unwrap();
        assert!(store.list_distributions_by_status(status::PENDING, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = store();
        assert!(matches!(
            store.get_distribution("missing").await.unwrap_err(),
            EpochError::NotFound(_)
        ));
        assert!(matches!(
            store.update_status("missing", status::FAILED, None, None).await.unwrap_err(),
            EpochError::NotFound(_)
        ));
        // A failed update leaves nothing behind
        assert!(store.db.is_empty());
    }

    #[tokio::test]
    async fn test_listings_on_unknown_keys_are_empty() {
        let store = store();
        store.save_distribution(distribution("d1", 1, "0xabc")).await.unwrap();

        assert!(store
            .list_distributions_by_epoch(&EpochNumber::from(9), &vault("0xabc"))
            .await
            .unwrap()
            .is_empty());
        assert!(store.list_distributions_by_status("settled", 0).await.unwrap().is_empty());
        assert!(store.list_distributions_by_status("bad:status", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_listing_respects_limit() {
        let store = store();
        for i in 0..5 {
            store
                .save_distribution(distribution(&format!("d{}", i), 1, "0xabc"))
                .await
                .unwrap();
        }
        assert_eq!(store.list_distributions_by_status(status::PENDING, 3).await.unwrap().len(), 3);
        assert_eq!(store.list_distributions_by_status(status::PENDING, 0).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_rejects_invalid_ids_and_statuses() {
        let store = store();
        assert!(matches!(
            store.save_distribution(distribution("", 1, "0xabc")).await.unwrap_err(),
            EpochError::InvalidInput(_)
        ));

        let mut bad_status = distribution("d1", 1, "0xabc");
        bad_status.status = "a:b".to_string();
        assert!(matches!(
            store.save_distribution(bad_status).await.unwrap_err(),
            EpochError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_zero_and_max_amounts_roundtrip() {
        let store = store();
        let max_u256: BigUint = "115792089237316195423570985008687907853269984665640564039457584007913129639935"
            .parse()
            .unwrap();

        let mut zero = distribution("zero", 0, "0xabc");
        zero.amount = BigUint::default();
        store.save_distribution(zero).await.unwrap();

        let mut max = distribution("max", 0, "0xabc");
        max.amount = max_u256.clone();
        store.save_distribution(max).await.unwrap();

        assert_eq!(store.get_distribution("zero").await.unwrap().amount, BigUint::default());
        assert_eq!(store.get_distribution("max").await.unwrap().amount, max_u256);
    }
}
