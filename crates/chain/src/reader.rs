use crate::{ChainResult, Repository};
use meridian_primitives::{Block, BlockId};

/// Largest number of blocks one [`BlockReader::read`] call returns.
const READ_BATCH: usize = 32;

/// A block delivered by a [`BlockReader`], flagged when a reorg has retired
/// it from the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedBlock {
    /// The block.
    pub block: Block,
    /// True when the block was previously delivered as canonical and has
    /// since been reorged out; downstream undoes derived state on seeing it.
    pub obsolete: bool,
}

/// A lazy forward cursor over the canonical chain strictly after a starting
/// block.
///
/// The reader is single-owner and not restartable; create a new one to read
/// from a different position. When a reorg retires blocks the cursor already
/// delivered, the next [`BlockReader::read`] emits those blocks with
/// `obsolete == true` (ascending height) before any block of the new chain
/// is delivered.
#[derive(Debug)]
pub struct BlockReader {
    repo: Repository,
    position: BlockId,
}

impl BlockReader {
    pub(crate) fn new(repo: Repository, start: BlockId) -> Self {
        Self { repo, position: start }
    }

    /// Returns the next batch of blocks, empty once caught up with the head.
    ///
    /// Pair the reader with a [`crate::Ticker`] to wait for more.
    pub fn read(&mut self) -> ChainResult<Vec<ExtendedBlock>> {
        let chain = self.repo.best_chain();

        if !chain.contains(self.position) {
            // the cursor sits on a retired fork: back out to the fork point,
            // reporting everything above it as obsolete
            let mut retired = Vec::new();
            let mut cursor = self.position;
            while !chain.contains(cursor) {
                retired.push(cursor);
                cursor = self.repo.block_summary(cursor)?.header.parent_id;
            }
            self.position = cursor;
            let mut batch = Vec::with_capacity(retired.len());
            for id in retired.into_iter().rev() {
                batch.push(ExtendedBlock { block: self.repo.block(id)?, obsolete: true });
            }
            return Ok(batch)
        }

        let mut batch = Vec::new();
        let mut number = self.position.number();
        while batch.len() < READ_BATCH {
            number += 1;
            let Ok(id) = chain.block_id(number) else { break };
            batch.push(ExtendedBlock { block: self.repo.block(id)?, obsolete: false });
            self.position = id;
        }
        Ok(batch)
    }
}
