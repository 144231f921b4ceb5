//! Cross-checks freshly fetched proposer duties against the cached schedule.
//!
//! The execution client must never see two different proposers for the same
//! slot across consecutive syncs, so drift is caught before anything is
//! published.

use log::warn;

use super::schedule_builder::EpochSchedule;
use super::{Assignment, Slot, ValidatorIndex};
use crate::errors::{Result, SyncError};

/// A slot claimed by different validators in two observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposerConflict {
    pub slot: Slot,
    /// Proposer recorded in the cached schedule.
    pub cached: ValidatorIndex,
    /// Proposer in the fresh data.
    pub fresh: ValidatorIndex,
}

/// Validates fresh duties against a cached schedule for the same epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompatibilityChecker;

impl CompatibilityChecker {
    pub fn new() -> Self {
        Self
    }

    /// Lists every slot where `fresh` contradicts `cached`.
    ///
    /// A slot conflicts when the cached schedule gave it to a different
    /// validator and holds a non-empty public key for that validator.
    pub fn conflicts(&self, cached: &EpochSchedule, fresh: &[Assignment]) -> Vec<ProposerConflict> {
        let mut conflicts = Vec::new();

        for assignment in fresh {
            for &slot in &assignment.proposer_slots {
                let Some(cached_proposer) = cached.proposer(slot) else {
                    continue;
                };
                if cached_proposer == assignment.validator_index {
                    continue;
                }
                let has_key = cached
                    .pubkey(cached_proposer)
                    .is_some_and(|key| !key.is_empty());
                if has_key {
                    conflicts.push(ProposerConflict {
                        slot,
                        cached: cached_proposer,
                        fresh: assignment.validator_index,
                    });
                }
            }
        }

        conflicts
    }

    /// Checks `fresh` against `cached`, logging each conflict.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Conflict`] if any slot conflicts.
    pub fn check(&self, cached: &EpochSchedule, fresh: &[Assignment]) -> Result<()> {
        let conflicts = self.conflicts(cached, fresh);
        if conflicts.is_empty() {
            return Ok(());
        }

        for conflict in &conflicts {
            let fresh_key = fresh
                .iter()
                .find(|a| a.validator_index == conflict.fresh)
                .map(|a| a.public_key.short())
                .unwrap_or_default();
            warn!(
                "Proposer conflict at slot {} in epoch {}: cached {} ({}) vs fresh {} ({})",
                conflict.slot,
                cached.epoch(),
                conflict.cached,
                cached
                    .pubkey(conflict.cached)
                    .map(|k| k.short())
                    .unwrap_or_default(),
                conflict.fresh,
                fresh_key
            );
        }

        Err(SyncError::Conflict {
            epoch: cached.epoch(),
            count: conflicts.len(),
        })
    }
}
