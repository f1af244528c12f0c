//! Epoch lifecycle orchestration
//!
//! Drives the on-chain epoch manager (start, force-end, end with subsidies)
//! and answers earnings queries from the data feed. Local lifecycle records
//! are kept in step on a best-effort basis; the chain stays authoritative.
//!
//! Every collaborator call runs under [`ServiceConfig::call_timeout`]. There
//! are no retries: a timed-out call is reported as
//! [`EpochError::Timeout`] and the caller decides.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::response::{
    CompleteEpochResponse, ForceEndEpochResponse, StartEpochResponse, UserEarningsResponse,
    STATUS_ALREADY_COMPLETED, STATUS_COMPLETED, STATUS_STARTED,
};
use crate::clients::{AccountSubsidy, Calculator, ContractClient, ContractError, DataFeedClient, GraphQlRequest};
use crate::db::epochs::status;
use crate::db::{EpochRecord, EpochStore, SnapshotStore};
use crate::error::EpochError;
use crate::types::{normalize_address, EpochNumber, VaultId};

const USER_SUBSIDY_QUERY: &str = r#"
query UserSubsidies($account: String!) {
  accountSubsidies(where: { account: $account }) {
    account { id }
    secondsAccumulated
    lastEffectiveValue
    updatedAtTimestamp
    collectionParticipation { vault { id } }
  }
  epoches(orderBy: epochNumber, orderDirection: desc, first: 1) {
    endTimestamp
  }
}
"#;

/// Configuration for the epoch service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Deadline for each contract, data feed or calculator call
    pub call_timeout: Duration,
    /// Vaults that get an `active` lifecycle record when an epoch starts
    pub vaults: Vec<VaultId>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            vaults: Vec::new(),
        }
    }
}

// ============================================================================
// Data feed response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserSubsidyData {
    #[serde(default)]
    account_subsidies: Vec<VaultSubsidy>,
    #[serde(default)]
    epoches: Vec<FeedEpoch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultSubsidy {
    #[serde(flatten)]
    subsidy: AccountSubsidy,
    /// Null for subsidies not tied to a collection
    #[serde(default)]
    collection_participation: Option<CollectionParticipation>,
}

#[derive(Debug, Deserialize)]
struct CollectionParticipation {
    vault: EntityRef,
}

#[derive(Debug, Deserialize)]
struct EntityRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedEpoch {
    end_timestamp: String,
}

impl VaultSubsidy {
    fn is_for(&self, vault: &VaultId) -> bool {
        self.collection_participation
            .as_ref()
            .and_then(|p| VaultId::parse(&p.vault.id).ok())
            .map_or(false, |v| &v == vault)
    }
}

// ============================================================================
// Epoch Service
// ============================================================================

/// Where a requested epoch sits relative to the chain's current epoch
enum EpochPosition {
    Past(EpochNumber),
    Current,
    Future(EpochNumber),
    /// Current epoch could not be read
    Unknown,
}

pub struct EpochService {
    contract: Arc<dyn ContractClient>,
    feed: Arc<dyn DataFeedClient>,
    calculator: Arc<dyn Calculator>,
    snapshots: SnapshotStore,
    epochs: EpochStore,
    config: ServiceConfig,
}

impl EpochService {
    pub fn new(
        config: ServiceConfig,
        contract: Arc<dyn ContractClient>,
        feed: Arc<dyn DataFeedClient>,
        calculator: Arc<dyn Calculator>,
        snapshots: SnapshotStore,
        epochs: EpochStore,
    ) -> Self {
        Self {
            contract,
            feed,
            calculator,
            snapshots,
            epochs,
            config,
        }
    }

    /// Run a collaborator call under the configured deadline
    async fn bounded<T, F>(&self, operation: &str, call: F) -> Result<T, EpochError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.config.call_timeout, call)
            .await
            .map_err(|_| {
                error!(operation, timeout = ?self.config.call_timeout, "Collaborator call timed out");
                EpochError::Timeout(format!("{} did not finish within {:?}", operation, self.config.call_timeout))
            })
    }

    async fn read_current_epoch(&self) -> Result<EpochNumber, EpochError> {
        self.bounded("reading current epoch id", self.contract.get_current_epoch_id())
            .await?
            .map_err(|e| EpochError::Upstream(format!("failed to get current epoch id: {}", e)))
    }

    async fn position_of(&self, epoch: &EpochNumber) -> EpochPosition {
        match self.read_current_epoch().await {
            Ok(current) if *epoch < current => EpochPosition::Past(current),
            Ok(current) if *epoch > current => EpochPosition::Future(current),
            Ok(_) => EpochPosition::Current,
            Err(e) => {
                warn!(epoch = %epoch, error = %e, "Could not read current epoch, proceeding anyway");
                EpochPosition::Unknown
            }
        }
    }

    /// Record a status locally. Chain state already changed, so a store
    /// failure here is logged rather than returned.
    async fn record_status(&self, vault: &VaultId, epoch: &EpochNumber, new_status: &str) -> Option<EpochRecord> {
        match self.epochs.upsert_status(vault, epoch, new_status).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(vault = %vault, epoch = %epoch, status = new_status, error = %e, "Failed to record epoch status");
                None
            }
        }
    }

    /// Mark a past epoch completed only if this node already tracks it.
    /// Past epochs without a local record stay untracked.
    async fn complete_if_tracked(&self, vault: &VaultId, epoch: &EpochNumber) -> Option<EpochRecord> {
        match self.epochs.get_epoch(vault, epoch).await {
            Ok(_) => self.record_status(vault, epoch, status::COMPLETED).await,
            Err(EpochError::NotFound(_)) => {
                debug!(vault = %vault, epoch = %epoch, "No local record for past epoch, leaving untracked");
                None
            }
            Err(e) => {
                warn!(vault = %vault, epoch = %epoch, error = %e, "Failed to read local record for past epoch");
                None
            }
        }
    }

    fn classify_end_failure(action: &str, epoch: &EpochNumber, vault: &VaultId, err: ContractError) -> EpochError {
        error!(epoch = %epoch, vault = %vault, error = %err, "{} failed", action);
        let message = format!("failed to {} epoch {} for vault {}: {}", action, epoch, vault, err);
        if err.is_transaction() {
            EpochError::TransactionFailed(message)
        } else {
            EpochError::Upstream(message)
        }
    }

    /// Epoch the contract considers current
    pub async fn get_current_epoch_id(&self) -> Result<EpochNumber, EpochError> {
        self.read_current_epoch().await
    }

    /// Start a new epoch on chain.
    ///
    /// The pre-start epoch read and account enumeration are diagnostic only.
    pub async fn start_epoch(&self) -> Result<StartEpochResponse, EpochError> {
        let current = match self.read_current_epoch().await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "Could not read current epoch before start");
                EpochNumber::zero()
            }
        };
        if !current.is_zero() {
            info!(current = %current, "Attempting to start epoch after current");
        }

        match self.bounded("querying accounts", self.feed.query_accounts()).await {
            Ok(Ok(accounts)) => info!(accounts = accounts.len(), "Found accounts for new epoch"),
            Ok(Err(e)) => warn!(error = %e, "Failed to query accounts"),
            Err(e) => warn!(error = %e, "Failed to query accounts"),
        }

        if let Err(e) = self.bounded("starting epoch", self.contract.start_epoch()).await? {
            error!(error = %e, "startEpoch transaction failed");
            return Err(match e {
                ContractError::EpochStillActive(_) => EpochError::TransactionFailed(format!(
                    "cannot start new epoch: current epoch {} is still active and must be completed first",
                    current
                )),
                other => EpochError::TransactionFailed(format!("failed to start epoch: {}", other)),
            });
        }

        let epoch_id = match self.read_current_epoch().await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Epoch started but new id could not be read");
                EpochNumber::zero()
            }
        };

        if !epoch_id.is_zero() {
            for vault in &self.config.vaults {
                self.record_status(vault, &epoch_id, status::ACTIVE).await;
            }
        }

        info!(epoch = %epoch_id, "Started epoch");
        Ok(StartEpochResponse {
            epoch_id,
            status: STATUS_STARTED.to_string(),
        })
    }

    /// Force-end an epoch for a vault with zero yield.
    ///
    /// Ending an epoch the chain has already moved past succeeds without a
    /// contract call. Ending a future epoch is rejected.
    pub async fn force_end_epoch(&self, epoch: &EpochNumber, vault: &str) -> Result<ForceEndEpochResponse, EpochError> {
        let vault = VaultId::parse(vault)?;
        info!(epoch = %epoch, vault = %vault, "Force ending epoch");

        match self.position_of(epoch).await {
            EpochPosition::Past(current) => {
                info!(epoch = %epoch, current = %current, "Epoch already past, considering it completed");
                self.complete_if_tracked(&vault, epoch).await;
                return Ok(ForceEndEpochResponse {
                    epoch_id: epoch.clone(),
                    vault_id: vault,
                    status: STATUS_ALREADY_COMPLETED.to_string(),
                    contract_called: false,
                });
            }
            EpochPosition::Future(current) => {
                return Err(EpochError::InvalidInput(format!(
                    "cannot force end future epoch {} (current: {})",
                    epoch, current
                )));
            }
            EpochPosition::Current | EpochPosition::Unknown => {}
        }

        self.bounded(
            "force ending epoch",
            self.contract.force_end_epoch_with_zero_yield(epoch, &vault),
        )
        .await?
        .map_err(|e| Self::classify_end_failure("force end", epoch, &vault, e))?;

        self.record_status(&vault, epoch, status::COMPLETED).await;

        info!(epoch = %epoch, vault = %vault, "Force ended epoch with zero yield");
        Ok(ForceEndEpochResponse {
            epoch_id: epoch.clone(),
            vault_id: vault,
            status: STATUS_COMPLETED.to_string(),
            contract_called: true,
        })
    }

    /// End an epoch for a vault by publishing its saved merkle snapshot.
    ///
    /// Idempotent: an epoch already completed locally, or already past on
    /// chain, returns without a contract call.
    pub async fn complete_epoch_after_distribution(
        &self,
        epoch: &EpochNumber,
        vault: &str,
    ) -> Result<CompleteEpochResponse, EpochError> {
        let vault = VaultId::parse(vault)?;

        match self.epochs.get_epoch(&vault, epoch).await {
            Ok(record) if record.is_completed() => {
                debug!(epoch = %epoch, vault = %vault, "Epoch already completed locally");
                return Ok(CompleteEpochResponse {
                    epoch_id: epoch.clone(),
                    vault_id: vault,
                    status: STATUS_ALREADY_COMPLETED.to_string(),
                    completed_at: record.end_time.unwrap_or(record.updated_at),
                });
            }
            Ok(_) | Err(EpochError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        match self.position_of(epoch).await {
            EpochPosition::Past(current) => {
                info!(epoch = %epoch, current = %current, "Epoch already past on chain, marking completed");
                let record = self.complete_if_tracked(&vault, epoch).await;
                return Ok(CompleteEpochResponse {
                    epoch_id: epoch.clone(),
                    vault_id: vault,
                    status: STATUS_ALREADY_COMPLETED.to_string(),
                    completed_at: record.and_then(|r| r.end_time).unwrap_or_else(Utc::now),
                });
            }
            EpochPosition::Future(current) => {
                return Err(EpochError::InvalidInput(format!(
                    "cannot complete future epoch {} (current: {})",
                    epoch, current
                )));
            }
            EpochPosition::Current | EpochPosition::Unknown => {}
        }

        let snapshot = self.snapshots.get_snapshot(&vault, epoch).await?;
        let root = parse_merkle_root(&snapshot.merkle_root)?;
        let total = snapshot.total_earned();

        info!(epoch = %epoch, vault = %vault, total = %total, entries = snapshot.entries.len(), "Ending epoch with subsidies");
        self.bounded(
            "ending epoch with subsidies",
            self.contract.end_epoch_with_subsidies(epoch, &vault, root, &total),
        )
        .await?
        .map_err(|e| Self::classify_end_failure("end", epoch, &vault, e))?;

        let record = self.record_status(&vault, epoch, status::COMPLETED).await;

        Ok(CompleteEpochResponse {
            epoch_id: epoch.clone(),
            vault_id: vault,
            status: STATUS_COMPLETED.to_string(),
            completed_at: record.and_then(|r| r.end_time).unwrap_or_else(Utc::now),
        })
    }

    /// Total a user has earned in a vault up to the latest epoch end
    pub async fn get_user_total_earned(&self, user: &str, vault: &str) -> Result<UserEarningsResponse, EpochError> {
        let user = normalize_address(user);
        if user.is_empty() {
            return Err(EpochError::InvalidInput("userAddress cannot be empty".to_string()));
        }
        let vault = VaultId::parse(vault)?;

        info!(user = %user, vault = %vault, "Getting total earned");

        let mut request = GraphQlRequest::new(USER_SUBSIDY_QUERY);
        request
            .variables
            .insert("account".to_string(), serde_json::Value::String(user.clone()));

        let data = self
            .bounded("querying user subsidies", self.feed.execute_query(&request))
            .await?
            .map_err(|e| EpochError::Upstream(format!("failed to query user subsidy data: {}", e)))?;
        let data: UserSubsidyData = serde_json::from_value(data)
            .map_err(|e| EpochError::Upstream(format!("malformed user subsidy data: {}", e)))?;

        debug!(count = data.account_subsidies.len(), "Received account subsidies");

        let matching = data
            .account_subsidies
            .into_iter()
            .find(|s| s.is_for(&vault))
            .ok_or_else(|| {
                EpochError::NotFound(format!("no subsidy data found for user {} in vault {}", user, vault))
            })?;

        let end_timestamp = match data.epoches.first() {
            Some(latest) => latest
                .end_timestamp
                .trim()
                .parse::<i64>()
                .map_err(|_| EpochError::Upstream(format!("invalid epoch end timestamp: {}", latest.end_timestamp)))?,
            None => {
                let now = Utc::now().timestamp();
                warn!(now, "No epoch found, using current time");
                now
            }
        };

        let total_earned = self
            .bounded(
                "calculating total earned",
                self.calculator.calculate_total_earned(&matching.subsidy, end_timestamp),
            )
            .await?
            .map_err(|e| EpochError::Upstream(format!("failed to calculate total earned: {}", e)))?;

        info!(user = %user, total = %total_earned, data_timestamp = end_timestamp, "Calculated total earned");
        Ok(UserEarningsResponse {
            user_address: user,
            vault_address: vault,
            total_earned,
            calculated_at: Utc::now().timestamp(),
            data_timestamp: end_timestamp,
        })
    }
}

/// Decode a hex merkle root, with or without `0x`, into 32 bytes
pub fn parse_merkle_root(root: &str) -> Result<[u8; 32], EpochError> {
    let digits = root
        .strip_prefix("0x")
        .or_else(|| root.strip_prefix("0X"))
        .unwrap_or(root);
    let bytes = hex::decode(digits)
        .map_err(|e| EpochError::InvalidInput(format!("merkle root {:?} is not hex: {}", root, e)))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| EpochError::InvalidInput(format!("merkle root must be 32 bytes, got {}", len)))
}
