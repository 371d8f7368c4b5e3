use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// A log emitted by clause execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Event {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Raw payload.
    pub data: Bytes,
}

/// A balance movement recorded by clause execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Transfer {
    /// Account debited.
    pub sender: Address,
    /// Account credited.
    pub recipient: Address,
    /// Amount moved.
    pub amount: U256,
}

/// Per-clause execution output.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Output {
    /// Events of the clause, in emission order.
    pub events: Vec<Event>,
    /// Transfers of the clause, in occurrence order.
    pub transfers: Vec<Transfer>,
}

/// Result of executing one transaction; stored out-of-band in block order.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Receipt {
    /// Gas consumed by the transaction.
    pub gas_used: u64,
    /// Account that paid for gas.
    pub gas_payer: Address,
    /// Energy paid for the consumed gas.
    pub paid: U256,
    /// Energy credited to the block beneficiary.
    pub reward: U256,
    /// Whether execution reverted. A reverted transaction keeps its gas
    /// payment but none of its clause effects, and carries no outputs.
    pub reverted: bool,
    /// One output per clause, empty when reverted.
    pub outputs: Vec<Output>,
}
