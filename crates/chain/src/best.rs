use crate::{ChainError, ChainResult};
use meridian_primitives::BlockId;
use std::{collections::BTreeMap, sync::Arc};

/// A snapshot of the canonical chain.
///
/// Creation is cheap (an atomic clone of the height index) and the snapshot
/// is internally consistent: every lookup answers against the same chain.
/// It does not observe writes made after creation.
#[derive(Debug, Clone)]
pub struct BestChain {
    canonical: Arc<BTreeMap<u32, BlockId>>,
    head: BlockId,
}

impl BestChain {
    pub(crate) fn new(canonical: Arc<BTreeMap<u32, BlockId>>, head: BlockId) -> Self {
        Self { canonical, head }
    }

    /// The head identifier of this snapshot.
    pub fn head_id(&self) -> BlockId {
        self.head
    }

    /// The canonical identifier at the given height; `NotFound` past the
    /// head.
    pub fn block_id(&self, number: u32) -> ChainResult<BlockId> {
        self.canonical.get(&number).copied().ok_or(ChainError::NotFound)
    }

    /// Returns whether the given block is on this snapshot of the canonical
    /// chain.
    pub fn contains(&self, id: BlockId) -> bool {
        self.canonical.get(&id.number()) == Some(&id)
    }
}
