//! Typed results of epoch service operations
//!
//! Serialized camelCase so transports layered on top can return them as-is.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::types::{decimal, EpochNumber, VaultId};

/// Status reported when a call changed chain state
pub const STATUS_STARTED: &str = "started";
pub const STATUS_COMPLETED: &str = "completed";
/// Status reported when the epoch was already over and nothing was sent
pub const STATUS_ALREADY_COMPLETED: &str = "already_completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartEpochResponse {
    /// New on-chain epoch, zero if it could not be read back
    pub epoch_id: EpochNumber,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceEndEpochResponse {
    pub epoch_id: EpochNumber,
    pub vault_id: VaultId,
    pub status: String,
    pub contract_called: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteEpochResponse {
    pub epoch_id: EpochNumber,
    pub vault_id: VaultId,
    pub status: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEarningsResponse {
    pub user_address: String,
    pub vault_address: VaultId,
    #[serde(with = "decimal")]
    pub total_earned: BigUint,
    /// Unix seconds the figure was computed
    pub calculated_at: i64,
    /// Unix seconds the figure is valid for (latest epoch end)
    pub data_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earnings_response_wire_shape() {
        let response = UserEarningsResponse {
            user_address: "0xuser".to_string(),
            vault_address: VaultId::parse("0xVAULT").unwrap(),
            total_earned: BigUint::from(42u32),
            calculated_at: 10,
            data_timestamp: 5,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "userAddress": "0xuser",
                "vaultAddress": "0xvault",
                "totalEarned": "42",
                "calculatedAt": 10,
                "dataTimestamp": 5
            })
        );
    }

    #[test]
    fn test_force_end_response_wire_shape() {
        let response = ForceEndEpochResponse {
            epoch_id: EpochNumber::from(7),
            vault_id: VaultId::parse("0xabc").unwrap(),
            status: STATUS_ALREADY_COMPLETED.to_string(),
            contract_called: false,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["epochId"], "7");
        assert_eq!(json["contractCalled"], false);
    }
}
