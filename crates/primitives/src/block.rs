use crate::{BlockId, Header, SealedHeader, Transaction, TxId};
use alloy_rlp::{Encodable, RlpDecodable, RlpEncodable};

/// A full block: header plus ordered transactions.
///
/// Receipts are stored out-of-band in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// The block's transactions.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a block from its parts.
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions }
    }

    /// The block identifier; derives it from the header.
    pub fn id(&self) -> BlockId {
        self.header.id()
    }

    /// The block number.
    pub fn number(&self) -> u32 {
        self.header.number()
    }

    /// RLP-encoded size in bytes.
    pub fn size(&self) -> usize {
        self.length()
    }

    /// Identifiers of the block's transactions, in order.
    pub fn tx_ids(&self) -> Vec<TxId> {
        self.transactions.iter().map(Transaction::id).collect()
    }

    /// Builds the summary stored alongside the block body.
    pub fn summarize(&self, conflicts: u32) -> BlockSummary {
        BlockSummary {
            header: self.header.clone().seal(),
            txs: self.tx_ids(),
            size: self.size() as u64,
            conflicts,
        }
    }
}

/// A block summary: sealed header, transaction identifiers and encoded size.
///
/// Summaries are what the repository indexes; bodies are fetched separately.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockSummary {
    /// The sealed block header.
    pub header: SealedHeader,
    /// Identifiers of the block's transactions.
    pub txs: Vec<TxId>,
    /// RLP-encoded size of the full block, in bytes.
    pub size: u64,
    /// Opaque conflict tag supplied at insertion; not interpreted by the
    /// repository.
    pub conflicts: u32,
}

impl BlockSummary {
    /// The block identifier.
    pub fn id(&self) -> BlockId {
        self.header.id()
    }

    /// The block number.
    pub fn number(&self) -> u32 {
        self.header.number()
    }
}
