//! Shared machinery for vault-scoped, epoch-keyed records
//!
//! Snapshots and epoch lifecycle records have the same shape: one primary
//! key per (vault, epoch) plus a pointer caching the highest epoch written.

use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::IVec;
use tracing::{debug, warn};

use super::keys::RecordKind;
use super::Database;
use crate::error::EpochError;
use crate::types::{EpochNumber, VaultId};

/// Outcome of rebuilding a pointer from the primary records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerRepair {
    pub vault_id: VaultId,
    /// Raw pointer value before the repair, if any
    pub previous: Option<String>,
    /// Highest epoch found by scanning, now stored in the pointer
    pub repaired: Option<EpochNumber>,
}

impl PointerRepair {
    pub fn changed(&self) -> bool {
        self.previous.as_deref() != self.repaired.as_ref().map(|e| e.to_string()).as_deref()
    }
}

pub(crate) struct VaultRecords<T> {
    db: Database,
    kind: RecordKind,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for VaultRecords<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            kind: self.kind,
            _record: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> VaultRecords<T> {
    pub(crate) fn new(db: Database, kind: RecordKind) -> Self {
        Self {
            db,
            kind,
            _record: PhantomData,
        }
    }

    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    fn context(&self, action: &str, vault: &VaultId, epoch: &EpochNumber) -> String {
        format!(
            "{} {} record for vault {}, epoch {}",
            action,
            self.kind.namespace(),
            vault,
            epoch
        )
    }

    pub(crate) fn put(&self, vault: &VaultId, epoch: &EpochNumber, record: &T) -> Result<(), EpochError> {
        let key = self.kind.record_key(vault, epoch)?;
        self.db.put_json(&key, record, &self.context("saving", vault, epoch))
    }

    pub(crate) fn get(&self, vault: &VaultId, epoch: &EpochNumber) -> Result<Option<T>, EpochError> {
        let key = self.kind.record_key(vault, epoch)?;
        self.db.get_json(&key, &self.context("reading", vault, epoch))
    }

    /// Move the pointer up to `epoch`. Never moves it down. Failures are
    /// logged, not returned: the pointer is a cache.
    pub(crate) fn advance_pointer(&self, vault: &VaultId, epoch: &EpochNumber) {
        let key = self.kind.pointer_key(vault);
        let candidate = epoch.to_string();
        let result = self.db.tree().fetch_and_update(key.as_bytes(), |current| {
            let keep_current = current
                .and_then(|bytes| std::str::from_utf8(bytes).ok())
                .and_then(|s| EpochNumber::from_str(s).ok())
                .map_or(false, |existing| existing >= *epoch);
            if keep_current {
                current.map(|bytes| bytes.to_vec())
            } else {
                Some(candidate.as_bytes().to_vec())
            }
        });

        if let Err(e) = result {
            warn!(
                kind = self.kind.namespace(),
                vault = %vault,
                epoch = %epoch,
                error = %e,
                "Failed to update pointer"
            );
        }
    }

    fn read_pointer_bytes(&self, vault: &VaultId) -> Result<Option<IVec>, EpochError> {
        let key = self.kind.pointer_key(vault);
        self.db.tree().get(key.as_bytes()).map_err(|e| {
            EpochError::database(
                format!("reading {} pointer for vault {}", self.kind.namespace(), vault),
                e,
            )
        })
    }

    fn read_pointer_raw(&self, vault: &VaultId) -> Result<Option<String>, EpochError> {
        Ok(self
            .read_pointer_bytes(vault)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Epoch currently cached in the pointer. A corrupt pointer reads as absent.
    pub(crate) fn pointer(&self, vault: &VaultId) -> Result<Option<EpochNumber>, EpochError> {
        let Some(raw) = self.read_pointer_raw(vault)? else {
            return Ok(None);
        };
        match EpochNumber::from_str(&raw) {
            Ok(epoch) => Ok(Some(epoch)),
            Err(_) => {
                warn!(kind = self.kind.namespace(), vault = %vault, pointer = %raw, "Ignoring unparseable pointer");
                Ok(None)
            }
        }
    }

    /// Reverse prefix scan over one vault's primary keys, newest first.
    /// `limit == 0` means unlimited. Undecodable records are skipped.
    pub(crate) fn list_desc(&self, vault: &VaultId, limit: usize) -> Result<Vec<(EpochNumber, T)>, EpochError> {
        let prefix = self.kind.vault_prefix(vault);
        let mut records = Vec::new();

        for item in self.db.tree().scan_prefix(prefix.as_bytes()).rev() {
            if limit != 0 && records.len() >= limit {
                break;
            }

            let (key, value) = item.map_err(|e| {
                EpochError::database(
                    format!("listing {} records for vault {}", self.kind.namespace(), vault),
                    e,
                )
            })?;

            let Some(epoch) = self.kind.epoch_from_key(vault, &key) else {
                debug!(key = %String::from_utf8_lossy(&key), "Skipping non-record key");
                continue;
            };

            match serde_json::from_slice::<T>(&value) {
                Ok(record) => records.push((epoch, record)),
                Err(e) => {
                    warn!(
                        kind = self.kind.namespace(),
                        vault = %vault,
                        epoch = %epoch,
                        error = %e,
                        "Skipping undecodable record"
                    );
                }
            }
        }

        Ok(records)
    }

    /// Pointer-then-resolve, with the scan as repair path when the pointer
    /// is absent, corrupt or names a record that does not exist.
    pub(crate) fn latest(&self, vault: &VaultId) -> Result<Option<(EpochNumber, T)>, EpochError> {
        if let Some(epoch) = self.pointer(vault)? {
            if let Some(record) = self.get(vault, &epoch)? {
                return Ok(Some((epoch, record)));
            }
            warn!(
                kind = self.kind.namespace(),
                vault = %vault,
                epoch = %epoch,
                "Pointer names a missing record, falling back to scan"
            );
        }
        Ok(self.list_desc(vault, 1)?.into_iter().next())
    }

    /// Rebuild the pointer from the primary records.
    ///
    /// The pointer is swapped only if it still holds the value read before
    /// the scan. A concurrent save that moves it in between forces a rescan.
    pub(crate) fn repair_pointer(&self, vault: &VaultId) -> Result<PointerRepair, EpochError> {
        let key = self.kind.pointer_key(vault);
        let context = format!("repairing {} pointer for vault {}", self.kind.namespace(), vault);

        loop {
            let previous = self.read_pointer_bytes(vault)?;
            let repaired = self.list_desc(vault, 1)?.into_iter().next().map(|(epoch, _)| epoch);
            let new = repaired.as_ref().map(|epoch| epoch.to_string().into_bytes());

            let swap = self
                .db
                .tree()
                .compare_and_swap(key.as_bytes(), previous.as_ref(), new)
                .map_err(|e| EpochError::database(&context, e))?;

            match swap {
                Ok(()) => {
                    return Ok(PointerRepair {
                        vault_id: vault.clone(),
                        previous: previous.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
                        repaired,
                    });
                }
                Err(conflict) => {
                    debug!(
                        kind = self.kind.namespace(),
                        vault = %vault,
                        current = ?conflict.current.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
                        "Pointer moved during repair, rescanning"
                    );
                }
            }
        }
    }
}
