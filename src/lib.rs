//! Epoch Ledger - vault-scoped epoch bookkeeping for subsidy distribution
//!
//! Keeps the off-chain side of a vault subsidy system: which epochs exist
//! per vault and where they are in their lifecycle, the merkle snapshot of
//! per-address earnings computed for each epoch, and the payout actions
//! taken against each snapshot.
//!
//! ## Architecture
//!
//! - **Stores** ([`db`]): snapshot, epoch lifecycle and distribution records
//!   in one sled keyspace, addressed by the [`db::keys`] codec
//! - **Service** ([`services`]): drives the on-chain epoch manager and the
//!   indexed data feed through the [`clients`] traits
//! - **Calculator** ([`calculator`]): seconds-weighted earnings math
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/epoch-ledger/
//! ├── ledger.sled/           # Snapshots, epochs, distributions, indexes
//! └── config.toml            # Configuration
//! ```

pub mod calculator;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod types;

pub use calculator::SecondsWeightedCalculator;
pub use clients::{
    Account, AccountSubsidy, CalculationError, Calculator, ContractClient, ContractError, DataFeedClient, FeedError,
    GraphQlRequest,
};
pub use config::Config;
pub use db::{
    Database, DatabaseConfig, DistributionStore, EpochRecord, EpochStore, MerkleEntry, MerkleSnapshot, PointerRepair,
    SnapshotStore, SubsidyDistribution,
};
pub use error::{EpochError, ErrorKind};
pub use services::{EpochService, ServiceConfig};
pub use types::{EpochNumber, VaultId};
