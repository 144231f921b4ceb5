//! Proposer schedule tracking.
//!
//! This module provides:
//! - Epoch boundary detection from polled head slots
//! - Per-epoch proposer schedules built from raw assignments
//! - A two-epoch (current/next) schedule cache
//! - Drift detection between freshly fetched and cached schedules
//!
//! The components are driven by [`crate::SyncLoop`]; none of them perform I/O.

mod compatibility;
mod epoch_tracker;
pub(crate) mod schedule_builder;
mod schedule_tracker;

use std::fmt;

pub use compatibility::{CompatibilityChecker, ProposerConflict};
pub use epoch_tracker::{EpochTracker, SyncState, Transition};
pub use schedule_builder::{EpochSchedule, ScheduleBuilder};
pub use schedule_tracker::{ScheduleCache, ScheduleSnapshot};

/// Type alias for slot numbers.
pub type Slot = u64;

/// Type alias for epoch numbers.
pub type Epoch = u64;

/// Type alias for validator indices.
pub type ValidatorIndex = u64;

/// Default number of slots in an epoch.
pub const DEFAULT_SLOTS_PER_EPOCH: u64 = 32;

/// Number of hex characters kept by [`PublicKey::short`].
const SHORT_KEY_HEX_LEN: usize = 8;

/// Returns the epoch containing `slot`.
///
/// `slots_per_epoch` must be non-zero; callers validate it up front.
pub fn epoch_of(slot: Slot, slots_per_epoch: u64) -> Epoch {
    slot / slots_per_epoch
}

/// Returns the first slot of `epoch`.
pub fn epoch_start_slot(epoch: Epoch, slots_per_epoch: u64) -> Slot {
    epoch.saturating_mul(slots_per_epoch)
}

/// A validator public key as raw bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Wraps raw key bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parses a hex key, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(digits).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the `0x`-prefixed lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    /// Returns a truncated hex prefix for log lines.
    pub fn short(&self) -> String {
        let full = hex::encode(&self.0);
        if full.len() <= SHORT_KEY_HEX_LEN {
            format!("0x{}", full)
        } else {
            format!("0x{}...", &full[..SHORT_KEY_HEX_LEN])
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.short())
    }
}

/// One validator's duties for a queried epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Validator index.
    pub validator_index: ValidatorIndex,
    /// Validator public key.
    pub public_key: PublicKey,
    /// Slots this validator proposes in the epoch. Empty when it proposes none.
    pub proposer_slots: Vec<Slot>,
}

impl Assignment {
    pub fn new(
        validator_index: ValidatorIndex,
        public_key: PublicKey,
        proposer_slots: Vec<Slot>,
    ) -> Self {
        Self {
            validator_index,
            public_key,
            proposer_slots,
        }
    }

    /// Returns true if the validator proposes at least one slot.
    pub fn is_proposer(&self) -> bool {
        !self.proposer_slots.is_empty()
    }
}
