//! Epoch Ledger CLI
//!
//! Inspects and maintains a ledger database.
//!
//! ## Usage
//!
//! ```bash
//! # Newest snapshots of a vault
//! epoch-ledger snapshots list 0xf82b93f3d6a703b8b5949809771b1e725708590a --limit 5
//!
//! # Lifecycle record of one epoch
//! epoch-ledger epochs get 0xf82b...590a 16
//!
//! # Distributions waiting to be paid
//! epoch-ledger distributions by-status pending
//!
//! # Rebuild the latest/current pointers of a vault
//! epoch-ledger --data-dir /data/ledger repair 0xf82b...590a
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use epoch_ledger::{Config, Database, DistributionStore, EpochNumber, EpochStore, SnapshotStore, VaultId};

#[derive(Parser, Debug)]
#[command(name = "epoch-ledger")]
#[command(about = "Vault epoch, snapshot and distribution ledger")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "EPOCH_LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (holds ledger.sled)
    #[arg(long, env = "EPOCH_LEDGER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level for epoch-ledger when RUST_LOG is not set
    #[arg(long, env = "EPOCH_LEDGER_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Merkle snapshots
    #[command(subcommand)]
    Snapshots(SnapshotCommands),

    /// Epoch lifecycle records
    #[command(subcommand)]
    Epochs(EpochCommands),

    /// Subsidy distributions
    #[command(subcommand)]
    Distributions(DistributionCommands),

    /// Rebuild a vault's latest-snapshot and current-epoch pointers
    Repair {
        vault: VaultId,
    },
}

#[derive(Debug, Subcommand)]
enum SnapshotCommands {
    /// List snapshots, newest epoch first
    List {
        vault: VaultId,
        /// Maximum number of snapshots (0 = all)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show the newest snapshot
    Latest { vault: VaultId },
    /// Show one snapshot
    Get { vault: VaultId, epoch: EpochNumber },
}

#[derive(Debug, Subcommand)]
enum EpochCommands {
    /// List epochs, newest first
    List {
        vault: VaultId,
        /// Maximum number of epochs (0 = all)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show the current epoch
    Current { vault: VaultId },
    /// Show one epoch
    Get { vault: VaultId, epoch: EpochNumber },
    /// Overwrite the status of an existing epoch
    SetStatus {
        vault: VaultId,
        epoch: EpochNumber,
        status: String,
    },
}

#[derive(Debug, Subcommand)]
enum DistributionCommands {
    /// Show one distribution
    Get { id: String },
    /// Distributions of one vault and epoch
    ByEpoch { vault: VaultId, epoch: EpochNumber },
    /// Distributions carrying a status
    ByStatus {
        status: String,
        /// Maximum number of distributions (0 = all)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize tracing
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(format!("epoch_ledger={}", config.log_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!(data_dir = %config.data_dir.display(), "Opening epoch ledger");

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating {}", config.data_dir.display()))?;

    let db = Database::open(&config.database_config())?;
    let snapshots = SnapshotStore::new(db.clone());
    let epochs = EpochStore::new(db.clone());
    let distributions = DistributionStore::new(db.clone());

    match args.command {
        Command::Snapshots(cmd) => match cmd {
            SnapshotCommands::List { vault, limit } => print_json(&snapshots.list_snapshots(&vault, limit).await?)?,
            SnapshotCommands::Latest { vault } => print_json(&snapshots.get_latest_snapshot(&vault).await?)?,
            SnapshotCommands::Get { vault, epoch } => print_json(&snapshots.get_snapshot(&vault, &epoch).await?)?,
        },
        Command::Epochs(cmd) => match cmd {
            EpochCommands::List { vault, limit } => print_json(&epochs.list_epochs(&vault, limit).await?)?,
            EpochCommands::Current { vault } => print_json(&epochs.get_current_epoch(&vault).await?)?,
            EpochCommands::Get { vault, epoch } => print_json(&epochs.get_epoch(&vault, &epoch).await?)?,
            EpochCommands::SetStatus { vault, epoch, status } => {
                print_json(&epochs.update_status(&vault, &epoch, &status).await?)?
            }
        },
        Command::Distributions(cmd) => match cmd {
            DistributionCommands::Get { id } => print_json(&distributions.get_distribution(&id).await?)?,
            DistributionCommands::ByEpoch { vault, epoch } => {
                print_json(&distributions.list_distributions_by_epoch(&epoch, &vault).await?)?
            }
            DistributionCommands::ByStatus { status, limit } => {
                print_json(&distributions.list_distributions_by_status(&status, limit).await?)?
            }
        },
        Command::Repair { vault } => {
            let latest = snapshots.repair_latest_pointer(&vault).await?;
            let current = epochs.repair_current_pointer(&vault).await?;
            print_json(&serde_json::json!({
                "latestSnapshot": latest,
                "currentEpoch": current,
            }))?;
        }
    }

    db.flush().await?;
    Ok(())
}
