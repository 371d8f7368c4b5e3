use meridian_primitives::{BlockId, BlockSummary};
use std::cmp::Reverse;

/// The finality capability.
///
/// Supplies the highest irreversible block and arbitrates between competing
/// best candidates. The repository and API consult it; they never mutate it.
pub trait Finalizer: Send + Sync + std::fmt::Debug {
    /// The identifier of the highest block considered irreversible.
    fn finalized(&self) -> BlockId;

    /// Chooses among competing tips: highest total score, ties broken by the
    /// lower identifier.
    fn select<'a>(&self, tips: &'a [BlockSummary]) -> Option<&'a BlockSummary> {
        tips.iter().max_by_key(|tip| (tip.header.total_score, Reverse(tip.id())))
    }
}

/// The solo-mode finalizer: genesis is final forever, so nothing ever
/// finalizes past it and every stored block stays revertible.
#[derive(Debug, Clone)]
pub struct SoloFinalizer {
    genesis: BlockId,
}

impl SoloFinalizer {
    /// Creates a finalizer pinned to the given genesis identifier.
    pub fn new(genesis: BlockId) -> Self {
        Self { genesis }
    }
}

impl Finalizer for SoloFinalizer {
    fn finalized(&self) -> BlockId {
        self.genesis
    }
}
