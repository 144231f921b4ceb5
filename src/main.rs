//! epoch-sync binary
//!
//! Runs the synchronizer against a beacon node and an execution client until
//! SIGINT or SIGTERM.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::info;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;

use epoch_sync::config::{
    DEFAULT_BEACON_ENDPOINT, DEFAULT_EXECUTION_ENDPOINT, DEFAULT_MAX_RESPONSE_BYTES,
};
use epoch_sync::{
    Backoff, BeaconClient, ExecutionClient, Retrying, SyncConfig, SyncLoop, ValidationPolicy,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackoffArg {
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ValidateArg {
    Always,
    FirstRun,
}

/// Keeps an execution client informed of upcoming block proposers.
#[derive(Debug, Parser)]
#[command(name = "epoch-sync", version, about)]
struct Cli {
    /// Beacon node HTTP endpoint
    #[arg(long, env = "EPOCH_SYNC_BEACON", default_value = DEFAULT_BEACON_ENDPOINT)]
    beacon: String,

    /// Execution client JSON-RPC endpoint
    #[arg(long, env = "EPOCH_SYNC_EXECUTION", default_value = DEFAULT_EXECUTION_ENDPOINT)]
    execution: String,

    /// Seconds between head polls
    #[arg(long, env = "EPOCH_SYNC_POLL_INTERVAL", default_value_t = 10)]
    poll_interval: u64,

    #[arg(long, env = "EPOCH_SYNC_SLOTS_PER_EPOCH", default_value_t = 32)]
    slots_per_epoch: u64,

    /// Slot length in seconds
    #[arg(long, env = "EPOCH_SYNC_SLOT_DURATION", default_value_t = 6)]
    slot_duration: u64,

    /// Unix time of slot 0 (defaults to now)
    #[arg(long, env = "EPOCH_SYNC_GENESIS_TIME")]
    genesis_time: Option<u64>,

    /// Attempts per outbound call, including the first
    #[arg(long, env = "EPOCH_SYNC_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Base delay between attempts, in seconds
    #[arg(long, env = "EPOCH_SYNC_RETRY_DELAY", default_value_t = 5)]
    retry_delay: u64,

    #[arg(long, value_enum, env = "EPOCH_SYNC_BACKOFF", default_value = "linear")]
    backoff: BackoffArg,

    /// When to re-fetch the current epoch for cross-checking
    #[arg(long, value_enum, env = "EPOCH_SYNC_VALIDATE", default_value = "always")]
    validate: ValidateArg,

    #[arg(long, env = "EPOCH_SYNC_MAX_RESPONSE_BYTES", default_value_t = DEFAULT_MAX_RESPONSE_BYTES)]
    max_response_bytes: usize,

    /// Per-request timeout in seconds
    #[arg(long, env = "EPOCH_SYNC_REQUEST_TIMEOUT", default_value_t = 30)]
    request_timeout: u64,
}

impl Cli {
    fn into_config(self) -> SyncConfig {
        let defaults = SyncConfig::default();
        SyncConfig {
            beacon_endpoint: self.beacon,
            execution_endpoint: self.execution,
            poll_interval: Duration::from_secs(self.poll_interval),
            slots_per_epoch: self.slots_per_epoch,
            slot_duration: Duration::from_secs(self.slot_duration),
            genesis_time: self.genesis_time.unwrap_or(defaults.genesis_time),
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay),
            backoff: match self.backoff {
                BackoffArg::Linear => Backoff::Linear,
                BackoffArg::Exponential => Backoff::Exponential,
            },
            max_response_bytes: self.max_response_bytes,
            request_timeout: Duration::from_secs(self.request_timeout),
            validation_policy: match self.validate {
                ValidateArg::Always => ValidationPolicy::Always,
                ValidateArg::FirstRun => ValidationPolicy::FirstRunOnly,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Cli::parse().into_config();
    config.validate().context("invalid configuration")?;

    info!(
        "Starting epoch-sync: beacon {}, execution {}, {} slots per epoch, genesis {}",
        config.beacon_endpoint, config.execution_endpoint, config.slots_per_epoch, config.genesis_time
    );

    let policy = config.retry_policy();
    let beacon = BeaconClient::new(
        &config.beacon_endpoint,
        config.slots_per_epoch,
        config.request_timeout,
        config.max_response_bytes,
    )
    .context("failed to create beacon client")?;
    let beacon = Retrying::new(beacon, policy);
    let execution = ExecutionClient::new(&config.execution_endpoint, config.request_timeout)
        .context("failed to create execution client")?;
    let execution = Retrying::new(execution, policy);

    let mut sync = SyncLoop::new(beacon.clone(), beacon, execution, &config)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
        signal_token.cancel();
    });

    sync.run(shutdown).await.context("sync loop failed")?;
    info!("epoch-sync stopped");
    Ok(())
}
