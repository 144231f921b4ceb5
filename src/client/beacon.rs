//! HTTP client for the beacon node API.
//!
//! Uses two standard endpoints:
//! - `GET /eth/v1/beacon/headers/head` for the canonical head slot
//! - `GET /eth/v1/validator/duties/proposer/{epoch}` for proposer duties
//!
//! Duties come back one entry per slot and are grouped per validator into
//! [`Assignment`]s.

use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::time::Duration;

use super::{AssignmentSource, ChainHeadSource};
use crate::errors::{Result, SyncError};
use crate::tracker::{epoch_of, Assignment, Epoch, PublicKey, Slot, ValidatorIndex};

/// Beacon API client implementing both assignment-side collaborators.
#[derive(Debug, Clone)]
pub struct BeaconClient {
    base_url: String,
    client: Client,
    slots_per_epoch: u64,
    max_response_bytes: usize,
}

impl BeaconClient {
    /// Creates a new beacon client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Beacon node HTTP endpoint
    /// * `slots_per_epoch` - Used to derive the epoch after the head
    /// * `request_timeout` - Per-request timeout
    /// * `max_response_bytes` - Responses larger than this are rejected
    pub fn new(
        base_url: impl Into<String>,
        slots_per_epoch: u64,
        request_timeout: Duration,
        max_response_bytes: usize,
    ) -> Result<Self> {
        if slots_per_epoch == 0 {
            return Err(SyncError::InvalidSlotsPerEpoch(slots_per_epoch));
        }
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            slots_per_epoch,
            max_response_bytes,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches proposer duties for `epoch`.
    pub async fn proposer_duties(&self, epoch: Epoch) -> Result<Vec<ProposerDuty>> {
        let response: ProposerDutiesResponse = self
            .get_json(&format!("/eth/v1/validator/duties/proposer/{}", epoch))
            .await?;
        Ok(response.data)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Unavailable(format!(
                "beacon node ({} returned {})",
                path, status
            )));
        }

        if let Some(size) = response.content_length() {
            check_size(size as usize, self.max_response_bytes)?;
        }
        // Chunked responses carry no length, so the limit is enforced while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            check_size(body.len() + chunk.len(), self.max_response_bytes)?;
            body.extend_from_slice(&chunk);
        }

        serde_json::from_slice(&body).map_err(|e| SyncError::Decode(format!("{}: {}", path, e)))
    }
}

impl ChainHeadSource for BeaconClient {
    async fn canonical_head_slot(&self) -> Result<Slot> {
        let response: HeaderResponse = self.get_json("/eth/v1/beacon/headers/head").await?;
        Ok(response.data.header.message.slot)
    }
}

impl AssignmentSource for BeaconClient {
    async fn validator_assignments(&self, epoch: Epoch) -> Result<Vec<Assignment>> {
        let duties = self.proposer_duties(epoch).await?;
        let assignments = group_duties(duties)?;
        debug!(
            "Fetched {} proposer assignments for epoch {}",
            assignments.len(),
            epoch
        );
        Ok(assignments)
    }

    async fn next_epoch_assignments(&self) -> Result<(Epoch, Vec<Assignment>)> {
        let head = self.canonical_head_slot().await?;
        let next = epoch_of(head, self.slots_per_epoch) + 1;
        let assignments = self.validator_assignments(next).await?;
        Ok((next, assignments))
    }
}

fn check_size(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(SyncError::ResponseTooLarge { size, limit });
    }
    Ok(())
}

/// Groups per-slot duties into per-validator assignments.
///
/// Validators keep the order in which they first appear; their slots are
/// sorted.
pub(crate) fn group_duties(duties: Vec<ProposerDuty>) -> Result<Vec<Assignment>> {
    let mut order: Vec<ValidatorIndex> = Vec::new();
    let mut by_validator: HashMap<ValidatorIndex, Assignment> = HashMap::new();

    for duty in duties {
        let public_key = PublicKey::from_hex(&duty.pubkey).map_err(|e| {
            SyncError::Decode(format!(
                "public key of validator {}: {}",
                duty.validator_index, e
            ))
        })?;

        let assignment = by_validator.entry(duty.validator_index).or_insert_with(|| {
            order.push(duty.validator_index);
            Assignment::new(duty.validator_index, public_key, Vec::new())
        });
        assignment.proposer_slots.push(duty.slot);
    }

    Ok(order
        .into_iter()
        .filter_map(|index| by_validator.remove(&index))
        .map(|mut assignment| {
            assignment.proposer_slots.sort_unstable();
            assignment
        })
        .collect())
}

/// Beacon API encodes integers as decimal strings.
fn quoted_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum QuotedOrNumber {
        Quoted(String),
        Number(u64),
    }

    match QuotedOrNumber::deserialize(deserializer)? {
        QuotedOrNumber::Quoted(s) => s.parse().map_err(serde::de::Error::custom),
        QuotedOrNumber::Number(n) => Ok(n),
    }
}

#[derive(Debug, Deserialize)]
struct HeaderResponse {
    data: HeaderData,
}

#[derive(Debug, Deserialize)]
struct HeaderData {
    header: SignedHeader,
}

#[derive(Debug, Deserialize)]
struct SignedHeader {
    message: HeaderMessage,
}

#[derive(Debug, Deserialize)]
struct HeaderMessage {
    #[serde(deserialize_with = "quoted_u64")]
    slot: Slot,
}

#[derive(Debug, Deserialize)]
struct ProposerDutiesResponse {
    data: Vec<ProposerDuty>,
}

/// One proposer duty as returned by the beacon node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProposerDuty {
    pub pubkey: String,
    #[serde(deserialize_with = "quoted_u64")]
    pub validator_index: ValidatorIndex,
    #[serde(deserialize_with = "quoted_u64")]
    pub slot: Slot,
}
