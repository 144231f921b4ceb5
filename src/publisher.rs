//! Publishes minimal consensus info to the execution client.
//!
//! The payload lists proposer public keys in slot order together with the
//! wall-clock start of the epoch, so the execution client can validate block
//! proposers without querying the beacon node.

use log::{info, warn};
use std::time::Duration;

use crate::client::ConsensusInfoSink;
use crate::errors::Result;
use crate::tracker::{Epoch, EpochSchedule};

/// Leading entry the execution client expects for the genesis epoch.
pub const GENESIS_SENTINEL: &str = "0x";

/// Payload of `eth_insertMinimalConsensusInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusInfoPayload {
    pub epoch: Epoch,
    /// `0x`-prefixed hex keys, one per assigned slot in slot order.
    pub proposer_pub_keys: Vec<String>,
    pub epoch_start_unix_time: u64,
}

/// Sink acknowledgement of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    Rejected,
}

/// Builds payloads and hands them to a [`ConsensusInfoSink`].
#[derive(Debug)]
pub struct ConsensusInfoPublisher<K> {
    sink: K,
    genesis_time: u64,
    slot_duration: Duration,
}

impl<K: ConsensusInfoSink> ConsensusInfoPublisher<K> {
    /// Creates a publisher.
    ///
    /// # Arguments
    ///
    /// * `sink` - Downstream execution client
    /// * `genesis_time` - Unix time of slot 0
    /// * `slot_duration` - Wall-clock length of a slot
    pub fn new(sink: K, genesis_time: u64, slot_duration: Duration) -> Self {
        Self {
            sink,
            genesis_time,
            slot_duration,
        }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Unix time at which `epoch` starts.
    pub fn epoch_start_time(&self, epoch: Epoch, slots_per_epoch: u64) -> u64 {
        let epoch_duration = self.slot_duration.as_secs().saturating_mul(slots_per_epoch);
        self.genesis_time
            .saturating_add(epoch.saturating_mul(epoch_duration))
    }

    /// Builds the payload for `schedule`.
    ///
    /// For epoch 0 a sentinel entry is prepended when more assignments than
    /// slots were supplied, matching the execution client's genesis indexing.
    /// The list never holds more than `slots_per_epoch + 1` entries.
    pub fn build_payload(&self, schedule: &EpochSchedule) -> ConsensusInfoPayload {
        let epoch = schedule.epoch();
        let slots_per_epoch = schedule.slots_per_epoch();
        let needs_sentinel = epoch == 0 && schedule.assignment_count() as u64 > slots_per_epoch;
        let max_len = slots_per_epoch as usize + 1;

        let mut proposer_pub_keys = Vec::with_capacity(max_len);
        if needs_sentinel {
            proposer_pub_keys.push(GENESIS_SENTINEL.to_string());
        }

        for (slot, validator) in schedule.proposers() {
            if proposer_pub_keys.len() >= max_len {
                warn!(
                    "Dropping proposer {} for slot {} in epoch {}: payload full",
                    validator, slot, epoch
                );
                break;
            }
            match schedule.pubkey(validator) {
                Some(key) => proposer_pub_keys.push(key.to_hex()),
                None => warn!(
                    "No public key for proposer {} of slot {} in epoch {}",
                    validator, slot, epoch
                ),
            }
        }

        ConsensusInfoPayload {
            epoch,
            proposer_pub_keys,
            epoch_start_unix_time: self.epoch_start_time(epoch, slots_per_epoch),
        }
    }

    /// Publishes `schedule` with a single sink call.
    ///
    /// A negative acknowledgement is logged and reported as
    /// [`PublishOutcome::Rejected`]; it is not retried here.
    ///
    /// # Errors
    ///
    /// Returns the sink's transport error.
    pub async fn publish(&self, schedule: &EpochSchedule) -> Result<PublishOutcome> {
        let payload = self.build_payload(schedule);

        info!(
            "Publishing minimal consensus info for epoch {} ({} proposers, start {})",
            payload.epoch,
            payload.proposer_pub_keys.len(),
            payload.epoch_start_unix_time
        );

        let accepted = self
            .sink
            .insert_minimal_consensus_info(
                payload.epoch,
                &payload.proposer_pub_keys,
                payload.epoch_start_unix_time,
            )
            .await?;

        if accepted {
            info!(
                "Minimal consensus info accepted for epoch {} ({} proposers)",
                payload.epoch,
                payload.proposer_pub_keys.len()
            );
            Ok(PublishOutcome::Accepted)
        } else {
            warn!(
                "Minimal consensus info rejected for epoch {} ({} proposers)",
                payload.epoch,
                payload.proposer_pub_keys.len()
            );
            Ok(PublishOutcome::Rejected)
        }
    }
}
