//! Key codec
//!
//! Every record lives in one ordered keyspace. Epoch numbers are zero-padded
//! to [`EPOCH_WIDTH`] digits so byte order equals numeric order, and every
//! vault segment is followed by `:` so one vault never prefixes another.
//!
//! ```text
//! snapshot:vault:<vault>:epoch:<padded>          merkle snapshot
//! latest:vault:<vault>                           latest snapshot pointer
//! epoch:vault:<vault>:epoch:<padded>             epoch lifecycle record
//! epoch:current:vault:<vault>                    current epoch pointer
//! distribution:<id>                              distribution record
//! epoch-index:<padded>:vault:<vault>:<id>        distribution by epoch
//! status-index:<status>:<id>                     distribution by status
//! ```

use crate::error::EpochError;
use crate::types::{EpochNumber, VaultId};

/// Fixed decimal width of an encoded epoch number
pub const EPOCH_WIDTH: usize = 20;

const DISTRIBUTION_PREFIX: &str = "distribution:";
const EPOCH_INDEX_PREFIX: &str = "epoch-index:";
const STATUS_INDEX_PREFIX: &str = "status-index:";

/// Zero-pad an epoch number to [`EPOCH_WIDTH`] digits
pub fn pad_epoch(epoch: &EpochNumber) -> Result<String, EpochError> {
    let digits = epoch.to_string();
    if digits.len() > EPOCH_WIDTH {
        return Err(EpochError::InvalidInput(format!(
            "epoch {} exceeds the {}-digit key width",
            digits, EPOCH_WIDTH
        )));
    }
    Ok(format!("{:0>width$}", digits, width = EPOCH_WIDTH))
}

/// Vault-scoped, epoch-keyed record families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Snapshot,
    Epoch,
}

impl RecordKind {
    pub fn namespace(self) -> &'static str {
        match self {
            RecordKind::Snapshot => "snapshot",
            RecordKind::Epoch => "epoch",
        }
    }

    /// Primary key for one (vault, epoch) record
    pub fn record_key(self, vault: &VaultId, epoch: &EpochNumber) -> Result<String, EpochError> {
        Ok(format!("{}epoch:{}", self.vault_prefix(vault), pad_epoch(epoch)?))
    }

    /// Scan prefix covering every epoch of one vault
    pub fn vault_prefix(self, vault: &VaultId) -> String {
        format!("{}:vault:{}:", self.namespace(), vault)
    }

    /// Pointer key caching the highest epoch written for a vault
    pub fn pointer_key(self, vault: &VaultId) -> String {
        match self {
            RecordKind::Snapshot => format!("latest:vault:{}", vault),
            RecordKind::Epoch => format!("epoch:current:vault:{}", vault),
        }
    }

    /// Recover the epoch from a primary key of this vault, or `None` if the
    /// key has any other shape
    pub fn epoch_from_key(self, vault: &VaultId, key: &[u8]) -> Option<EpochNumber> {
        let key = std::str::from_utf8(key).ok()?;
        let rest = key.strip_prefix(self.vault_prefix(vault).as_str())?;
        let digits = rest.strip_prefix("epoch:")?;
        if digits.len() != EPOCH_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

pub fn distribution_key(id: &str) -> String {
    format!("{}{}", DISTRIBUTION_PREFIX, id)
}

/// Scan prefix for all distributions of one (epoch, vault)
pub fn epoch_index_prefix(epoch: &EpochNumber, vault: &VaultId) -> Result<String, EpochError> {
    Ok(format!("{}{}:vault:{}:", EPOCH_INDEX_PREFIX, pad_epoch(epoch)?, vault))
}

pub fn epoch_index_key(epoch: &EpochNumber, vault: &VaultId, id: &str) -> Result<String, EpochError> {
    Ok(format!("{}{}", epoch_index_prefix(epoch, vault)?, id))
}

/// Scan prefix for all distributions carrying one status
pub fn status_index_prefix(status: &str) -> String {
    format!("{}{}:", STATUS_INDEX_PREFIX, status)
}

pub fn status_index_key(status: &str, id: &str) -> String {
    format!("{}{}", status_index_prefix(status), id)
}
