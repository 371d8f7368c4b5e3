use crate::{PackerError, PackerResult};
use alloy_primitives::Address;
use meridian_primitives::BLOCK_INTERVAL;

/// How many whole rotations ahead a proposer slot is searched for.
const SEARCH_ROTATIONS: u64 = 2;

/// The authority rotation: assigns each block-interval slot to one proposer,
/// round-robin over the authority list.
#[derive(Debug, Clone)]
pub struct Scheduler {
    authority: Vec<Address>,
}

/// A scheduling decision: when the proposer may produce and the weight its
/// block contributes to the total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Target timestamp of the block.
    pub timestamp: u64,
    /// Proposer weight: full for the first slot after the parent, decreasing
    /// by one for every slot the rotation had to skip, never below one.
    pub weight: u64,
}

impl Scheduler {
    /// Creates a scheduler over the authority list, in rotation order.
    pub fn new(authority: Vec<Address>) -> Self {
        Self { authority }
    }

    /// The authority list.
    pub fn authority(&self) -> &[Address] {
        &self.authority
    }

    /// The proposer assigned to the slot covering `timestamp`.
    pub fn slot_proposer(&self, timestamp: u64) -> Option<Address> {
        if self.authority.is_empty() {
            return None
        }
        let slot = timestamp / BLOCK_INTERVAL;
        Some(self.authority[(slot % self.authority.len() as u64) as usize])
    }

    /// Finds the earliest slot at or after `max(parent_timestamp +
    /// BLOCK_INTERVAL, now)` where `proposer` is scheduled.
    ///
    /// Fails with [`PackerError::NoScheduledSlot`] when the proposer is not
    /// in the authority set or its next slot lies beyond the search window.
    pub fn schedule(
        &self,
        proposer: Address,
        parent_timestamp: u64,
        now: u64,
    ) -> PackerResult<Slot> {
        if !self.authority.contains(&proposer) {
            return Err(PackerError::NoScheduledSlot)
        }
        let earliest = (parent_timestamp + BLOCK_INTERVAL).max(now);
        // align up to the slot grid
        let mut timestamp = earliest.div_ceil(BLOCK_INTERVAL) * BLOCK_INTERVAL;

        let window = self.authority.len() as u64 * SEARCH_ROTATIONS;
        for skipped in 0..window {
            if self.slot_proposer(timestamp) == Some(proposer) {
                let weight = (self.authority.len() as u64).saturating_sub(skipped).max(1);
                return Ok(Slot { timestamp, weight })
            }
            timestamp += BLOCK_INTERVAL;
        }
        Err(PackerError::NoScheduledSlot)
    }
}
