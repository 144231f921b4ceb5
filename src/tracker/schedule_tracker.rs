//! Proposer schedule caching per epoch.
//!
//! Caches the proposer schedule for the current and next epochs,
//! and handles epoch boundary rotations.

use log::info;
use std::sync::Arc;

use super::schedule_builder::EpochSchedule;
use super::{Epoch, PublicKey, Slot, ValidatorIndex};
use crate::errors::{Result, SyncError};

/// Caches proposer schedules for the current and upcoming epochs.
///
/// Maintains schedules for two epochs:
/// - Current epoch: the epoch the chain head is in
/// - Next epoch: prefetched so the boundary is seamless
///
/// On each committed transition the next schedule is promoted to current and
/// a freshly fetched schedule becomes next. Anything older than current or
/// newer than next is unknown; this is a sliding window, not a history.
#[derive(Debug, Clone, Default)]
pub struct ScheduleCache {
    current: Option<Arc<EpochSchedule>>,
    next: Option<Arc<EpochSchedule>>,
}

impl ScheduleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&EpochSchedule> {
        self.current.as_deref()
    }

    pub fn next(&self) -> Option<&EpochSchedule> {
        self.next.as_deref()
    }

    /// Epoch of the current schedule.
    pub fn current_epoch(&self) -> Option<Epoch> {
        self.current.as_ref().map(|s| s.epoch())
    }

    /// Epoch of the next schedule.
    pub fn next_epoch(&self) -> Option<Epoch> {
        self.next.as_ref().map(|s| s.epoch())
    }

    /// Returns the cached schedule that would become current for `epoch`.
    ///
    /// This is the cached next schedule when it was fetched for `epoch`.
    /// The cached current schedule also qualifies when it already is `epoch`.
    pub fn staged_current(&self, epoch: Epoch) -> Option<Arc<EpochSchedule>> {
        [&self.next, &self.current]
            .into_iter()
            .flatten()
            .find(|s| s.epoch() == epoch)
            .cloned()
    }

    /// Rotates the window to `new_next`.
    ///
    /// The cached next schedule becomes current when it directly precedes
    /// `new_next`. Otherwise (first run, or the loop skipped epochs) the
    /// current slot is filled with `fresh_current`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EpochMismatch`] if the resulting current epoch is
    /// not exactly one before `new_next`. The cache is left untouched.
    pub fn promote(
        &mut self,
        new_next: EpochSchedule,
        fresh_current: Option<EpochSchedule>,
    ) -> Result<()> {
        let target = new_next.epoch();
        let expected_current = target.checked_sub(1).ok_or(SyncError::EpochMismatch {
            expected: 1,
            actual: target,
        })?;

        let current = match self.staged_current(expected_current) {
            Some(cached) => cached,
            None => {
                let fresh = fresh_current.ok_or_else(|| {
                    SyncError::Unavailable(format!("schedule for epoch {}", expected_current))
                })?;
                if fresh.epoch() != expected_current {
                    return Err(SyncError::EpochMismatch {
                        expected: expected_current,
                        actual: fresh.epoch(),
                    });
                }
                Arc::new(fresh)
            }
        };

        info!(
            "Rotating epoch: {:?} -> {} (next {})",
            self.current_epoch(),
            current.epoch(),
            target
        );

        self.current = Some(current);
        self.next = Some(Arc::new(new_next));
        Ok(())
    }

    /// Returns the proposer of `slot` in `epoch` if that epoch is cached.
    pub fn lookup(&self, epoch: Epoch, slot: Slot) -> Option<ValidatorIndex> {
        lookup_in(&self.current, &self.next, epoch, slot)
    }

    /// Returns the recorded public key of `validator` in `epoch`.
    pub fn pubkey(&self, epoch: Epoch, validator: ValidatorIndex) -> Option<&PublicKey> {
        [&self.current, &self.next]
            .into_iter()
            .flatten()
            .find(|s| s.epoch() == epoch)
            .and_then(|s| s.pubkey(validator))
    }

    /// Takes an immutable copy of both cached schedules.
    pub fn snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            current: self.current.clone(),
            next: self.next.clone(),
        }
    }
}

/// Read-only view of the cache at a point in time.
///
/// Handed to readers outside the sync loop; the loop swaps both epochs in one
/// step so a snapshot is never half rotated.
#[derive(Debug, Clone, Default)]
pub struct ScheduleSnapshot {
    current: Option<Arc<EpochSchedule>>,
    next: Option<Arc<EpochSchedule>>,
}

impl ScheduleSnapshot {
    pub fn current(&self) -> Option<&EpochSchedule> {
        self.current.as_deref()
    }

    pub fn next(&self) -> Option<&EpochSchedule> {
        self.next.as_deref()
    }

    pub fn lookup(&self, epoch: Epoch, slot: Slot) -> Option<ValidatorIndex> {
        lookup_in(&self.current, &self.next, epoch, slot)
    }
}

fn lookup_in(
    current: &Option<Arc<EpochSchedule>>,
    next: &Option<Arc<EpochSchedule>>,
    epoch: Epoch,
    slot: Slot,
) -> Option<ValidatorIndex> {
    [current, next]
        .into_iter()
        .flatten()
        .find(|s| s.epoch() == epoch)
        .and_then(|s| s.proposer(slot))
}
