//! Collaborators the sync loop talks to.
//!
//! The loop is generic over three narrow traits so the beacon node and
//! execution client can be swapped for in-memory fakes:
//! - [`ChainHeadSource`] reports the canonical head slot
//! - [`AssignmentSource`] reports proposer duties per epoch
//! - [`ConsensusInfoSink`] receives the minimal consensus payload
//!
//! [`Retrying`] wraps any of them with a shared [`RetryPolicy`].

mod beacon;
mod execution;

use std::future::Future;
use std::sync::Arc;

pub use beacon::{BeaconClient, ProposerDuty};
pub use execution::{ExecutionClient, INSERT_MINIMAL_CONSENSUS_INFO};

use crate::errors::Result;
use crate::retry::RetryPolicy;
use crate::tracker::{Assignment, Epoch, Slot};

/// Supplies the current canonical head slot.
pub trait ChainHeadSource: Send + Sync {
    fn canonical_head_slot(&self) -> impl Future<Output = Result<Slot>> + Send;
}

/// Supplies proposer assignments.
pub trait AssignmentSource: Send + Sync {
    /// Assignments of every validator for `epoch`.
    fn validator_assignments(
        &self,
        epoch: Epoch,
    ) -> impl Future<Output = Result<Vec<Assignment>>> + Send;

    /// Assignments for the epoch after the current head, with that epoch.
    fn next_epoch_assignments(
        &self,
    ) -> impl Future<Output = Result<(Epoch, Vec<Assignment>)>> + Send;
}

/// Accepts minimal consensus info for an epoch.
pub trait ConsensusInfoSink: Send + Sync {
    /// Returns the sink's acknowledgement.
    fn insert_minimal_consensus_info(
        &self,
        epoch: Epoch,
        proposer_pub_keys: &[String],
        epoch_start_unix_time: u64,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// Applies a [`RetryPolicy`] to every call of the wrapped collaborator.
#[derive(Debug, Clone)]
pub struct Retrying<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Retrying<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<S: ChainHeadSource> ChainHeadSource for Retrying<S> {
    async fn canonical_head_slot(&self) -> Result<Slot> {
        self.policy
            .retry("canonical head slot", || self.inner.canonical_head_slot())
            .await
    }
}

impl<S: AssignmentSource> AssignmentSource for Retrying<S> {
    async fn validator_assignments(&self, epoch: Epoch) -> Result<Vec<Assignment>> {
        self.policy
            .retry("validator assignments", || self.inner.validator_assignments(epoch))
            .await
    }

    async fn next_epoch_assignments(&self) -> Result<(Epoch, Vec<Assignment>)> {
        self.policy
            .retry("next epoch assignments", || self.inner.next_epoch_assignments())
            .await
    }
}

impl<S: ConsensusInfoSink> ConsensusInfoSink for Retrying<S> {
    async fn insert_minimal_consensus_info(
        &self,
        epoch: Epoch,
        proposer_pub_keys: &[String],
        epoch_start_unix_time: u64,
    ) -> Result<bool> {
        self.policy
            .retry("insert minimal consensus info", || {
                self.inner
                    .insert_minimal_consensus_info(epoch, proposer_pub_keys, epoch_start_unix_time)
            })
            .await
    }
}

impl<T: ChainHeadSource> ChainHeadSource for Arc<T> {
    async fn canonical_head_slot(&self) -> Result<Slot> {
        (**self).canonical_head_slot().await
    }
}

impl<T: AssignmentSource> AssignmentSource for Arc<T> {
    async fn validator_assignments(&self, epoch: Epoch) -> Result<Vec<Assignment>> {
        (**self).validator_assignments(epoch).await
    }

    async fn next_epoch_assignments(&self) -> Result<(Epoch, Vec<Assignment>)> {
        (**self).next_epoch_assignments().await
    }
}

impl<T: ConsensusInfoSink> ConsensusInfoSink for Arc<T> {
    async fn insert_minimal_consensus_info(
        &self,
        epoch: Epoch,
        proposer_pub_keys: &[String],
        epoch_start_unix_time: u64,
    ) -> Result<bool> {
        (**self)
            .insert_minimal_consensus_info(epoch, proposer_pub_keys, epoch_start_unix_time)
            .await
    }
}
