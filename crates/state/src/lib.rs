//! World-state access for meridian.
//!
//! The [`StateStore`] resolves accounts, storage slots and code at any known
//! state root; the [`Stager`] buffers a mutation batch on top of one root,
//! supports nested checkpoints, and produces a [`Stage`] whose commit
//! materializes the batch into the backing store under the new root.

mod stager;
mod store;

pub use stager::{Checkpoint, Stage, Stager};
pub use store::{StateConfig, StateStore};

use alloy_primitives::B256;

/// State result type.
pub type StateResult<T> = Result<T, StateError>;

/// Errors from state access and staging.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The gas payer cannot cover the requested energy amount.
    #[error("insufficient energy")]
    InsufficientEnergy,
    /// No state is stored under the given root.
    #[error("unknown state root {0}")]
    UnknownRoot(B256),
    /// A stored record failed to decode.
    #[error("corrupt state record under root {0}")]
    Corrupt(B256),
    /// Backing store failure.
    #[error(transparent)]
    Store(#[from] meridian_db::KvError),
}
