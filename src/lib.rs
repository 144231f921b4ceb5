//! epoch-sync
//!
//! Keeps an execution client informed of upcoming block proposers.
//!
//! ## Features
//!
//! - Polls the beacon node head and detects epoch transitions
//! - Caches proposer schedules for the current and next epoch
//! - Cross-checks fresh duties against the cached schedule to catch drift
//! - Publishes `eth_insertMinimalConsensusInfo` to the execution client
//! - Bounded retry with linear or exponential backoff on every outbound call
//!
//! ## Usage
//!
//! ```no_run
//! use epoch_sync::{BeaconClient, ExecutionClient, Retrying, SyncConfig, SyncLoop};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), epoch_sync::SyncError> {
//! let config = SyncConfig::default();
//! let beacon = Retrying::new(
//!     BeaconClient::new(
//!         &config.beacon_endpoint,
//!         config.slots_per_epoch,
//!         config.request_timeout,
//!         config.max_response_bytes,
//!     )?,
//!     config.retry_policy(),
//! );
//! let execution = Retrying::new(
//!     ExecutionClient::new(&config.execution_endpoint, config.request_timeout)?,
//!     config.retry_policy(),
//! );
//!
//! let mut sync = SyncLoop::new(beacon.clone(), beacon, execution, &config)?;
//! sync.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]

pub mod client;
pub mod config;
mod errors;
mod publisher;
pub mod retry;
mod sync_loop;
pub mod tracker;

// Re-export main types
pub use client::{
    AssignmentSource, BeaconClient, ChainHeadSource, ConsensusInfoSink, ExecutionClient, Retrying,
};
pub use config::{ConfigError, SyncConfig, ValidationPolicy};
pub use errors::{ErrorKind, Result, SyncError};
pub use publisher::{ConsensusInfoPayload, ConsensusInfoPublisher, PublishOutcome};
pub use retry::{Backoff, RetryPolicy};
pub use sync_loop::{SyncLoop, TickOutcome};
pub use tracker::{
    Assignment, CompatibilityChecker, Epoch, EpochSchedule, EpochTracker, PublicKey,
    ScheduleBuilder, ScheduleCache, ScheduleSnapshot, Slot, SyncState, ValidatorIndex,
};
