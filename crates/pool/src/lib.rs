//! The transaction pool.
//!
//! The pool admits, stores, expires and orders executable transactions for
//! the packer. Admission is thread-safe; iteration works on snapshots, so
//! holders never block writers. A background task driven by the repository
//! ticker prunes mined, expired and over-age transactions.

mod config;
mod error;
mod maintain;
mod pool;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult, RejectReason};
pub use maintain::maintain_pool;
pub use pool::{Executables, Pool, PooledTx};
