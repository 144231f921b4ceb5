//! Epoch boundary detection from polled head slots.

use log::debug;

use super::{epoch_of, Epoch, Slot};
use crate::errors::{Result, SyncError};

/// Mutable progress of the sync loop.
///
/// Created once at startup and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncState {
    /// Last epoch whose refresh cycle committed.
    pub last_processed_epoch: Option<Epoch>,
    /// Most recently observed head slot.
    pub head_slot: Slot,
    /// True until the first refresh commits.
    pub first_run: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            last_processed_epoch: None,
            head_slot: 0,
            first_run: true,
        }
    }
}

/// Outcome of observing a head slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Still inside an already processed epoch.
    None { epoch: Epoch },
    /// A refresh for `epoch` is due.
    Due { epoch: Epoch, first_run: bool },
}

impl Transition {
    pub fn is_due(&self) -> bool {
        matches!(self, Transition::Due { .. })
    }

    pub fn epoch(&self) -> Epoch {
        match self {
            Transition::None { epoch } | Transition::Due { epoch, .. } => *epoch,
        }
    }
}

/// Decides when the chain head has entered an unprocessed epoch.
#[derive(Debug)]
pub struct EpochTracker {
    slots_per_epoch: u64,
    state: SyncState,
}

impl EpochTracker {
    /// Creates a tracker in its startup state.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidSlotsPerEpoch`] if `slots_per_epoch` is zero.
    pub fn new(slots_per_epoch: u64) -> Result<Self> {
        if slots_per_epoch == 0 {
            return Err(SyncError::InvalidSlotsPerEpoch(slots_per_epoch));
        }
        Ok(Self {
            slots_per_epoch,
            state: SyncState::default(),
        })
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn last_processed_epoch(&self) -> Option<Epoch> {
        self.state.last_processed_epoch
    }

    /// Records `head_slot` and reports whether a refresh is due.
    ///
    /// A refresh is due on the first run, or once the observed epoch is at
    /// least one past the last processed epoch. Missed boundaries are caught
    /// up in a single refresh rather than one per skipped epoch.
    pub fn observe(&mut self, head_slot: Slot) -> Transition {
        self.state.head_slot = head_slot;
        let epoch = epoch_of(head_slot, self.slots_per_epoch);

        match self.state.last_processed_epoch {
            _ if self.state.first_run => Transition::Due {
                epoch,
                first_run: true,
            },
            None => Transition::Due {
                epoch,
                first_run: false,
            },
            Some(last) if epoch > last => Transition::Due {
                epoch,
                first_run: false,
            },
            Some(last) => {
                if epoch < last {
                    debug!(
                        "Head slot {} is in epoch {}, behind last processed epoch {}",
                        head_slot, epoch, last
                    );
                }
                Transition::None { epoch }
            }
        }
    }

    /// Marks `epoch` as processed after a successful refresh.
    ///
    /// Ignores epochs behind the last processed one so progress never regresses.
    pub fn commit(&mut self, epoch: Epoch) {
        if self.state.last_processed_epoch.map_or(true, |last| epoch >= last) {
            self.state.last_processed_epoch = Some(epoch);
        }
        self.state.first_run = false;
    }
}
