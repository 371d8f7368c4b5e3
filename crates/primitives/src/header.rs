use crate::{
    crypto::{recover_signer, sign_hash, CryptoError},
    BlockId,
};
use alloy_primitives::{keccak256, Address, Bytes, B256};
use alloy_rlp::{Decodable, Encodable, Header as RlpHeader};
use derive_more::{AsRef, Deref};
use secp256k1::SecretKey;

/// A block header.
///
/// The identifier of a block is derived from the header: the block number
/// (parent number + 1) composed with a digest over the signing hash and the
/// recovered signer, see [`Header::id`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Identifier of the parent block.
    pub parent_id: BlockId,
    /// Unix timestamp of the block, in seconds.
    pub timestamp: u64,
    /// Gas ceiling of the block.
    pub gas_limit: u64,
    /// Recipient of the block reward.
    pub beneficiary: Address,
    /// Gas consumed by the block's transactions.
    pub gas_used: u64,
    /// Cumulative proposer weight along this chain; the fork-choice rule.
    pub total_score: u64,
    /// Root over the block's transactions.
    pub txs_root: B256,
    /// Root of the world state after this block.
    pub state_root: B256,
    /// Root over the block's receipts.
    pub receipts_root: B256,
    /// Bitset of transaction features supported at this block.
    pub features: u32,
    /// Reserved gas-price coefficient slot, unused.
    pub base_gas_price_coef: u8,
    /// Recoverable signature of the proposer over [`Header::signing_hash`],
    /// empty while unsigned.
    pub signature: Bytes,
}

impl Header {
    /// Returns the block number, one past the parent's.
    ///
    /// The genesis parent identifier carries `u32::MAX`, which wraps to 0.
    pub fn number(&self) -> u32 {
        self.parent_id.number().wrapping_add(1)
    }

    /// Hash of the header without its signature; the digest the proposer signs.
    pub fn signing_hash(&self) -> B256 {
        let mut out = Vec::with_capacity(self.unsigned_payload_length() + 3);
        RlpHeader { list: true, payload_length: self.unsigned_payload_length() }.encode(&mut out);
        self.encode_unsigned_fields(&mut out);
        keccak256(&out)
    }

    /// Recovers the proposer from the header signature.
    pub fn signer(&self) -> Result<Address, CryptoError> {
        recover_signer(self.signing_hash(), &self.signature)
    }

    /// Returns the block identifier.
    ///
    /// The digest half covers the signing hash and the signer, so two headers
    /// differing only in proposer have distinct identifiers. An unsigned
    /// header is identified as if signed by the zero address.
    pub fn id(&self) -> BlockId {
        let signer = self.signer().unwrap_or(Address::ZERO);
        let mut buf = [0u8; 52];
        buf[..32].copy_from_slice(self.signing_hash().as_slice());
        buf[32..].copy_from_slice(signer.as_slice());
        BlockId::compose(self.number(), keccak256(buf))
    }

    /// Signs the header in place with the given proposer key.
    pub fn sign(&mut self, secret: &SecretKey) {
        self.signature = Bytes::copy_from_slice(&sign_hash(self.signing_hash(), secret));
    }

    /// Seals the header, memoizing its identifier.
    pub fn seal(self) -> SealedHeader {
        SealedHeader::new(self)
    }

    fn unsigned_payload_length(&self) -> usize {
        self.parent_id.length() +
            self.timestamp.length() +
            self.gas_limit.length() +
            self.beneficiary.length() +
            self.gas_used.length() +
            self.total_score.length() +
            self.txs_root.length() +
            self.state_root.length() +
            self.receipts_root.length() +
            self.features.length() +
            self.base_gas_price_coef.length()
    }

    fn encode_unsigned_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.parent_id.encode(out);
        self.timestamp.encode(out);
        self.gas_limit.encode(out);
        self.beneficiary.encode(out);
        self.gas_used.encode(out);
        self.total_score.encode(out);
        self.txs_root.encode(out);
        self.state_root.encode(out);
        self.receipts_root.encode(out);
        self.features.encode(out);
        self.base_gas_price_coef.encode(out);
    }
}

impl Encodable for Header {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let payload_length = self.unsigned_payload_length() + self.signature.length();
        RlpHeader { list: true, payload_length }.encode(out);
        self.encode_unsigned_fields(out);
        self.signature.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.unsigned_payload_length() + self.signature.length();
        RlpHeader { list: true, payload_length }.length() + payload_length
    }
}

impl Decodable for Header {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = RlpHeader::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let started_len = buf.len();
        let this = Self {
            parent_id: Decodable::decode(buf)?,
            timestamp: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            beneficiary: Decodable::decode(buf)?,
            gas_used: Decodable::decode(buf)?,
            total_score: Decodable::decode(buf)?,
            txs_root: Decodable::decode(buf)?,
            state_root: Decodable::decode(buf)?,
            receipts_root: Decodable::decode(buf)?,
            features: Decodable::decode(buf)?,
            base_gas_price_coef: Decodable::decode(buf)?,
            signature: Decodable::decode(buf)?,
        };
        let consumed = started_len - buf.len();
        if consumed != rlp_head.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: rlp_head.payload_length,
                got: consumed,
            })
        }
        Ok(this)
    }
}

/// A [`Header`] paired with its precomputed identifier.
///
/// Identifier derivation involves a signature recovery, so code that keeps a
/// header around holds it sealed.
#[derive(Debug, Clone, PartialEq, Eq, AsRef, Deref)]
pub struct SealedHeader {
    /// Locked header identifier.
    id: BlockId,
    /// Locked header fields.
    #[as_ref]
    #[deref]
    header: Header,
}

impl SealedHeader {
    /// Seals the given header.
    pub fn new(header: Header) -> Self {
        Self { id: header.id(), header }
    }

    /// Returns the memoized block identifier.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the sealed header fields.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Extracts the raw header.
    pub fn unseal(self) -> Header {
        self.header
    }
}

impl Encodable for SealedHeader {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.header.encode(out);
    }

    fn length(&self) -> usize {
        self.header.length()
    }
}

impl Decodable for SealedHeader {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        Ok(Self::new(Header::decode(buf)?))
    }
}
