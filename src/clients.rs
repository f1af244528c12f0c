//! Collaborators consumed by the epoch service
//!
//! The chain, the indexed data feed and the earnings math are all behind
//! traits so the service can be driven by mocks in tests and by real
//! adapters in deployment.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EpochNumber, VaultId};

// ============================================================================
// Contract client
// ============================================================================

/// Substrings an epoch manager revert carries when the current epoch has not ended
const STILL_ACTIVE_MARKERS: &[&str] = &[
    "EpochManager__EpochStillActive",
    "epoch still active",
    "EpochStillActive",
];

/// Substrings that identify a failed or rejected chain transaction
const TRANSACTION_MARKERS: &[&str] = &[
    "failed to call",
    "transaction failed",
    "gas",
    "revert",
    "nonce",
    "insufficient funds",
    "execution reverted",
    "failed to send transaction",
    "transaction timeout",
];

/// Failure reported by a contract client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    /// The contract refused because the current epoch is still running
    #[error("epoch still active: {0}")]
    EpochStillActive(String),

    /// The transaction was built, sent or mined and failed
    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Classify a raw client error message.
    ///
    /// Adapters over RPC libraries that only surface strings call this once,
    /// at the boundary, so the service can match on variants.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if STILL_ACTIVE_MARKERS.iter().any(|m| message.contains(m)) {
            ContractError::EpochStillActive(message)
        } else if TRANSACTION_MARKERS.iter().any(|m| message.contains(m)) {
            ContractError::Transaction(message)
        } else {
            ContractError::Other(message)
        }
    }

    /// Still-active refusals are transaction failures too
    pub fn is_transaction(&self) -> bool {
        matches!(self, ContractError::EpochStillActive(_) | ContractError::Transaction(_))
    }
}

/// Epoch manager contract operations
#[async_trait::async_trait]
pub trait ContractClient: Send + Sync {
    /// Begin a new epoch on chain
    async fn start_epoch(&self) -> Result<(), ContractError>;

    /// Epoch the contract considers current
    async fn get_current_epoch_id(&self) -> Result<EpochNumber, ContractError>;

    /// Close an epoch for a vault without distributing any yield
    async fn force_end_epoch_with_zero_yield(
        &self,
        epoch: &EpochNumber,
        vault: &VaultId,
    ) -> Result<(), ContractError>;

    /// Close an epoch for a vault, publishing its merkle root and subsidy total
    async fn end_epoch_with_subsidies(
        &self,
        epoch: &EpochNumber,
        vault: &VaultId,
        merkle_root: [u8; 32],
        total_subsidies: &BigUint,
    ) -> Result<(), ContractError>;
}

// ============================================================================
// Data feed client
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("data feed error: {0}")]
pub struct FeedError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
}

/// A participant's accumulated subsidy state in one collection.
///
/// Numeric fields are decimal strings exactly as the feed reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSubsidy {
    pub account: Account,
    pub seconds_accumulated: String,
    pub last_effective_value: String,
    pub updated_at_timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
}

impl GraphQlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: serde_json::Map::new(),
        }
    }
}

/// Indexed on-chain data (accounts, subsidies, epochs)
#[async_trait::async_trait]
pub trait DataFeedClient: Send + Sync {
    /// Every account known to the feed
    async fn query_accounts(&self) -> Result<Vec<Account>, FeedError>;

    /// Run a raw query and return its `data` object
    async fn execute_query(&self, request: &GraphQlRequest) -> Result<serde_json::Value, FeedError>;
}

// ============================================================================
// Calculator
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalculationError {
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Earnings math over a subsidy record
#[async_trait::async_trait]
pub trait Calculator: Send + Sync {
    /// Total earned by the record's account as of `end_timestamp` (unix seconds)
    async fn calculate_total_earned(
        &self,
        subsidy: &AccountSubsidy,
        end_timestamp: i64,
    ) -> Result<BigUint, CalculationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_still_active() {
        let err = ContractError::classify("execution reverted: EpochManager__EpochStillActive()");
        assert!(matches!(err, ContractError::EpochStillActive(_)));
        assert!(err.is_transaction());
    }

    #[test]
    fn test_classify_transaction_markers() {
        for msg in [
            "failed to call contract",
            "out of gas",
            "nonce too low",
            "insufficient funds for transfer",
            "failed to send transaction: connection reset",
        ] {
            assert!(
                matches!(ContractError::classify(msg), ContractError::Transaction(_)),
                "{} should classify as transaction",
                msg
            );
        }
    }

    #[test]
    fn test_classify_other_keeps_message() {
        let err = ContractError::classify("rpc endpoint unreachable");
        assert_eq!(err, ContractError::Other("rpc endpoint unreachable".to_string()));
        assert!(!err.is_transaction());
        assert_eq!(err.to_string(), "rpc endpoint unreachable");
    }

    #[test]
    fn test_account_subsidy_reads_feed_shape() {
        let json = serde_json::json!({
            "account": { "id": "0xuser" },
            "secondsAccumulated": "1000",
            "lastEffectiveValue": "5",
            "updatedAtTimestamp": "1700000000"
        });
        let subsidy: AccountSubsidy = serde_json::from_value(json).unwrap();
        assert_eq!(subsidy.account.id, "0xuser");
        assert_eq!(subsidy.updated_at_timestamp, "1700000000");
    }
}
