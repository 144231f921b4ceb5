//! Builds per-epoch proposer schedules from raw assignments.

use log::warn;
use std::collections::HashMap;

use super::{epoch_of, epoch_start_slot, Assignment, Epoch, PublicKey, Slot, ValidatorIndex};
use crate::errors::{Result, SyncError};

/// Proposer schedule for a single epoch.
///
/// Immutable once built. Slot lookups index a table sized to the epoch, so
/// they are O(1) and iterate in slot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochSchedule {
    epoch: Epoch,
    slots_per_epoch: u64,
    /// Slot offset within the epoch -> proposer.
    slot_to_proposer: Vec<Option<ValidatorIndex>>,
    /// Proposer -> public key, only for validators with at least one slot.
    proposer_to_pubkey: HashMap<ValidatorIndex, PublicKey>,
    /// Number of assignments the schedule was built from.
    assignment_count: usize,
}

impl EpochSchedule {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }

    pub fn assignment_count(&self) -> usize {
        self.assignment_count
    }

    /// First slot of the epoch.
    pub fn start_slot(&self) -> Slot {
        epoch_start_slot(self.epoch, self.slots_per_epoch)
    }

    /// Returns true if `slot` falls inside this epoch.
    pub fn contains_slot(&self, slot: Slot) -> bool {
        epoch_of(slot, self.slots_per_epoch) == self.epoch
    }

    /// Returns the proposer of `slot`, or None if unknown or outside the epoch.
    pub fn proposer(&self, slot: Slot) -> Option<ValidatorIndex> {
        if !self.contains_slot(slot) {
            return None;
        }
        let offset = (slot - self.start_slot()) as usize;
        self.slot_to_proposer.get(offset).copied().flatten()
    }

    /// Returns the recorded public key of a proposer.
    pub fn pubkey(&self, validator: ValidatorIndex) -> Option<&PublicKey> {
        self.proposer_to_pubkey.get(&validator)
    }

    /// Returns the public key of the proposer of `slot`.
    pub fn proposer_pubkey(&self, slot: Slot) -> Option<&PublicKey> {
        self.proposer(slot).and_then(|v| self.pubkey(v))
    }

    /// Iterates `(slot, proposer)` pairs in slot order, skipping unassigned slots.
    pub fn proposers(&self) -> impl Iterator<Item = (Slot, ValidatorIndex)> + '_ {
        let start = self.start_slot();
        self.slot_to_proposer
            .iter()
            .enumerate()
            .filter_map(move |(offset, v)| v.map(|v| (start + offset as u64, v)))
    }

    /// Number of slots with a known proposer.
    pub fn assigned_slots(&self) -> usize {
        self.slot_to_proposer.iter().filter(|v| v.is_some()).count()
    }

    /// Number of distinct proposers.
    pub fn proposer_count(&self) -> usize {
        self.proposer_to_pubkey.len()
    }
}

/// Turns assignment lists into [`EpochSchedule`]s.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleBuilder {
    slots_per_epoch: u64,
}

impl ScheduleBuilder {
    /// Creates a builder for epochs of `slots_per_epoch` slots.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidSlotsPerEpoch`] if `slots_per_epoch` is zero.
    pub fn new(slots_per_epoch: u64) -> Result<Self> {
        if slots_per_epoch == 0 {
            return Err(SyncError::InvalidSlotsPerEpoch(slots_per_epoch));
        }
        Ok(Self { slots_per_epoch })
    }

    pub fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }

    /// Builds the schedule of `epoch` from `assignments`.
    ///
    /// Input order does not matter except for duplicate slots, where the last
    /// assignment wins.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SlotOutsideEpoch`] if any proposer slot does not
    /// belong to `epoch`.
    pub fn build(&self, epoch: Epoch, assignments: &[Assignment]) -> Result<EpochSchedule> {
        let start = epoch_start_slot(epoch, self.slots_per_epoch);
        let mut slot_to_proposer = vec![None; self.slots_per_epoch as usize];
        let mut proposer_to_pubkey = HashMap::with_capacity(self.slots_per_epoch as usize);

        for assignment in assignments {
            for &slot in &assignment.proposer_slots {
                if epoch_of(slot, self.slots_per_epoch) != epoch {
                    return Err(SyncError::SlotOutsideEpoch { slot, epoch });
                }
                let entry = &mut slot_to_proposer[(slot - start) as usize];
                if let Some(previous) = entry.replace(assignment.validator_index) {
                    if previous != assignment.validator_index {
                        warn!(
                            "Duplicate proposer for slot {} in epoch {}: {} overwritten by {}",
                            slot, epoch, previous, assignment.validator_index
                        );
                    }
                }
            }

            if assignment.is_proposer() {
                proposer_to_pubkey.insert(assignment.validator_index, assignment.public_key.clone());
            }
        }

        Ok(EpochSchedule {
            epoch,
            slots_per_epoch: self.slots_per_epoch,
            slot_to_proposer,
            proposer_to_pubkey,
            assignment_count: assignments.len(),
        })
    }
}
