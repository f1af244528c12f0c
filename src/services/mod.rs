//! Service layer for epoch-ledger
//!
//! Services sit between callers (CLI, schedulers, HTTP adapters) and the
//! stores in [`crate::db`], adding:
//! - Input validation
//! - Chain and data feed orchestration with deadlines
//! - Error classification into [`crate::error::EpochError`]
//!
//! ```text
//! Caller
//!     ↓
//! EpochService ──→ ContractClient / DataFeedClient / Calculator
//!     ↓
//! SnapshotStore, EpochStore (db/*.rs)
//!     ↓
//! sled
//! ```

pub mod epoch_service;
pub mod response;

pub use epoch_service::{EpochService, ServiceConfig};
pub use response::*;
