/// Pool result type.
pub type PoolResult<T> = Result<T, PoolError>;

/// All errors the transaction pool can throw.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The transaction is already resident or already on the canonical
    /// chain. Callers usually treat this as success.
    #[error("known transaction")]
    KnownTransaction,
    /// Admission control rejected the transaction.
    #[error("tx rejected: {0}")]
    Rejected(RejectReason),
    /// Repository failure while validating.
    #[error(transparent)]
    Chain(#[from] meridian_chain::ChainError),
    /// State failure while validating.
    #[error(transparent)]
    State(#[from] meridian_state::StateError),
}

/// Why admission control turned a transaction away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// Origin or delegator signature failed to recover.
    #[error("bad signature")]
    BadSignature,
    /// The chain tag does not match this chain.
    #[error("chain tag mismatch")]
    ChainTagMismatch,
    /// Provided gas is below the intrinsic requirement.
    #[error("intrinsic gas exceeds provided gas")]
    IntrinsicGas,
    /// The encoded transaction exceeds the size cap.
    #[error("size too large")]
    Oversized,
    /// The executable window has closed against the best block.
    #[error("expired")]
    Expired,
    /// The origin already has its quota of resident transactions.
    #[error("account quota exceeded")]
    QuotaExceeded,
    /// The gas payer cannot cover the prepaid energy at the best state.
    #[error("insufficient energy")]
    InsufficientEnergy,
}
