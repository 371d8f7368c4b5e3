//! The chain repository and canonical-chain maintenance.
//!
//! The [`Repository`] persists block summaries, bodies and receipts, indexes
//! the canonical chain, and resolves forks through
//! [`Repository::set_best_block_id`]. [`BestChain`] is a cheap consistent
//! snapshot, [`BlockReader`] a forward cursor that reports reorged-out blocks
//! as obsolete, and [`Ticker`] the edge-triggered new-best signal. The
//! [`Finalizer`] capability supplies the irreversible block; the repository
//! only ever reads it.

mod best;
mod error;
mod finality;
mod reader;
mod repository;
mod ticker;

pub use best::BestChain;
pub use error::{ChainError, ChainResult};
pub use finality::{Finalizer, SoloFinalizer};
pub use reader::{BlockReader, ExtendedBlock};
pub use repository::Repository;
pub use ticker::Ticker;
