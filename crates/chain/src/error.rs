/// Chain result type.
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors surfaced by the repository, its readers and tickers.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// A point lookup missed.
    #[error("kvstore: not found")]
    NotFound,
    /// A block with this identifier is already stored with different content.
    #[error("block already exists")]
    AlreadyExists,
    /// The block's parent summary is not stored.
    #[error("orphan block")]
    OrphanBlock,
    /// The proposed best block is not stored.
    #[error("unknown block")]
    UnknownBlock,
    /// The proposed best block does not descend from the finalized block.
    #[error("not a descendant of the finalized block")]
    NotADescendant,
    /// The reorg would revert a finalized block.
    #[error("finalized block would be reverted")]
    FinalityViolated,
    /// The reader or ticker was cancelled.
    #[error("closed")]
    Closed,
    /// A stored record failed to decode.
    #[error("corrupt chain record")]
    Corrupt,
    /// Backing store failure.
    #[error(transparent)]
    Store(#[from] meridian_db::KvError),
}

impl ChainError {
    /// Classifies the `NotFound` kind; callers translate it to a null or 400
    /// response instead of a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
