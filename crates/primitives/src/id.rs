use alloy_primitives::B256;
use alloy_rlp::{RlpDecodableWrapper, RlpEncodableWrapper};
use derive_more::{AsRef, Deref, From, Into};
use serde::{Deserialize, Serialize};

/// Hash identifying a transaction.
pub type TxId = B256;

/// A block identifier.
///
/// The first 4 bytes carry the big-endian block number, the remaining 28 bytes
/// are taken from a content digest, so the height of any block is extractable
/// from its identifier without a lookup.
#[derive(
    Debug,
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Deref,
    From,
    Into,
    RlpEncodableWrapper,
    RlpDecodableWrapper,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct BlockId(pub B256);

impl BlockId {
    /// Composes an identifier from a block number and a content digest.
    ///
    /// The digest's first 4 bytes are replaced by the big-endian number.
    pub fn compose(number: u32, digest: B256) -> Self {
        let mut bytes = digest.0;
        bytes[..4].copy_from_slice(&number.to_be_bytes());
        Self(B256::from(bytes))
    }

    /// Returns the block number encoded in this identifier.
    pub fn number(&self) -> u32 {
        u32::from_be_bytes(self.0[..4].try_into().unwrap())
    }

    /// Returns the low byte of the identifier.
    ///
    /// For the genesis identifier this is the chain tag.
    pub fn low_byte(&self) -> u8 {
        self.0[31]
    }
}

impl core::fmt::Display for BlockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl core::str::FromStr for BlockId {
    type Err = <B256 as core::str::FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<B256>().map(Self)
    }
}
