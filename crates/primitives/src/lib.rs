//! Commonly used types for the meridian proof-of-authority chain.
//!
//! This crate contains the consensus data model: block identifiers, headers,
//! blocks and summaries, transactions with their clauses, receipts, and the
//! account record, together with the RLP codecs and trie-root helpers shared
//! by the rest of the node.

mod account;
mod block;
mod crypto;
mod genesis;
mod header;
mod id;
pub mod proofs;
mod receipt;
mod transaction;

pub use account::Account;
pub use block::{Block, BlockSummary};
pub use crypto::{public_key_to_address, recover_signer, sign_hash, CryptoError, SIGNATURE_LEN};
pub use genesis::{dev_accounts, DevAccount, Genesis};
pub use header::{Header, SealedHeader};
pub use id::{BlockId, TxId};
pub use receipt::{Event, Output, Receipt, Transfer};
pub use transaction::{Clause, Reserved, Transaction};

pub use alloy_primitives::{keccak256, Address, Bytes, B256, U256};

/// Interval between consecutive blocks, in seconds.
pub const BLOCK_INTERVAL: u64 = 10;

/// Maximum RLP-encoded transaction size accepted by the pool.
pub const MAX_TX_SIZE: usize = 32 * 1024;

/// Base intrinsic gas of any transaction.
pub const TX_GAS: u64 = 5_000;

/// Intrinsic gas per regular clause.
pub const CLAUSE_GAS: u64 = 16_000;

/// Intrinsic gas per contract-creation clause.
pub const CLAUSE_GAS_CONTRACT_CREATION: u64 = 48_000;

/// Intrinsic gas per zero byte of clause data.
pub const TX_DATA_ZERO_GAS: u64 = 4;

/// Intrinsic gas per non-zero byte of clause data.
pub const TX_DATA_NON_ZERO_GAS: u64 = 68;

/// The divisor bounding per-block gas limit adjustment (`parent / 1024`).
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Smallest block gas limit the chain accepts.
pub const MIN_GAS_LIMIT: u64 = 10_000_000;

/// Gas limit of the genesis block.
pub const INITIAL_GAS_LIMIT: u64 = 10_000_000;

/// Base gas price used to turn a gas amount into an energy amount.
///
/// The effective price is `base + base * coef / 255`, so a transaction with
/// coefficient 255 pays double the base price.
pub const INITIAL_BASE_GAS_PRICE: u128 = 1_000_000_000_000_000;

/// Energy generated per second, in energy-wei per 10^18 balance-wei.
pub const ENERGY_GROWTH_RATE: u64 = 5_000_000_000;

/// Computes the effective energy price of one unit of gas.
pub fn gas_price(base_gas_price: u128, coef: u8) -> u128 {
    base_gas_price + base_gas_price * coef as u128 / 255
}
