/// Packer result type.
pub type PackerResult<T> = Result<T, PackerError>;

/// Errors from scheduling and block assembly.
#[derive(Debug, thiserror::Error)]
pub enum PackerError {
    /// The proposer has no slot within the scheduling window.
    #[error("no scheduled slot for proposer")]
    NoScheduledSlot,
    /// Adopting the transaction would exceed the block gas limit. The flow
    /// stays open; smaller transactions may still fit.
    #[error("gas limit reached")]
    GasLimitReached,
    /// The transaction was already adopted by this flow.
    #[error("known transaction")]
    KnownTransaction,
    /// The gas payer cannot cover the prepaid energy.
    #[error("insufficient energy")]
    InsufficientEnergy,
    /// The transaction fails validation against the parent block.
    #[error("bad transaction: {0}")]
    BadTransaction(&'static str),
    /// The flow is already packed; adopting or re-packing is a programmer
    /// error.
    #[error("flow is sealed")]
    Sealed,
    /// Repository failure.
    #[error(transparent)]
    Chain(#[from] meridian_chain::ChainError),
    /// State failure.
    #[error(transparent)]
    State(#[from] meridian_state::StateError),
}
