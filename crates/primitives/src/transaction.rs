use crate::{
    crypto::{recover_signer, sign_hash, CryptoError, SIGNATURE_LEN},
    TxId, CLAUSE_GAS, CLAUSE_GAS_CONTRACT_CREATION, TX_DATA_NON_ZERO_GAS, TX_DATA_ZERO_GAS,
    TX_GAS,
};
use alloy_primitives::{keccak256, Address, Bytes, B256, B64, U256};
use alloy_rlp::{Decodable, Encodable, Header as RlpHeader};
use secp256k1::SecretKey;

/// Features bit marking a fee-delegated transaction.
pub const DELEGATED_FEATURE: u32 = 1;

/// An 8-byte reference binding a transaction to a window of block heights.
///
/// The first 4 bytes are the big-endian height of the referenced block.
pub type BlockRef = B64;

/// One sub-operation of a transaction: a transfer, a contract call, or (when
/// `to` is absent) a contract creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clause {
    /// Recipient; `None` creates a contract.
    pub to: Option<Address>,
    /// Amount of balance transferred.
    pub value: U256,
    /// Input data, or creation bytecode.
    pub data: Bytes,
}

impl Clause {
    fn payload_length(&self) -> usize {
        let to_len = match &self.to {
            Some(to) => to.length(),
            None => 1,
        };
        to_len + self.value.length() + self.data.length()
    }
}

impl Encodable for Clause {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        RlpHeader { list: true, payload_length: self.payload_length() }.encode(out);
        match &self.to {
            Some(to) => to.encode(out),
            // nil recipient encodes as the empty string
            None => out.put_u8(alloy_rlp::EMPTY_STRING_CODE),
        }
        self.value.encode(out);
        self.data.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        RlpHeader { list: true, payload_length }.length() + payload_length
    }
}

impl Decodable for Clause {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = RlpHeader::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let to = decode_optional_address(buf)?;
        Ok(Self { to, value: Decodable::decode(buf)?, data: Decodable::decode(buf)? })
    }
}

/// Reserved transaction fields; bit 0 of `features` marks fee delegation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reserved {
    /// Feature bitset.
    pub features: u32,
    /// Unused trailing fields, kept for forward compatibility.
    pub unused: Vec<Bytes>,
}

impl Reserved {
    /// Returns whether every reserved field holds its default value.
    pub fn is_empty(&self) -> bool {
        self.features == 0 && self.unused.is_empty()
    }

    fn payload_length(&self) -> usize {
        if self.is_empty() {
            return 0
        }
        self.features.length() + self.unused.iter().map(Encodable::length).sum::<usize>()
    }
}

impl Encodable for Reserved {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let payload_length = self.payload_length();
        RlpHeader { list: true, payload_length }.encode(out);
        if !self.is_empty() {
            self.features.encode(out);
            for field in &self.unused {
                field.encode(out);
            }
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        RlpHeader { list: true, payload_length }.length() + payload_length
    }
}

impl Decodable for Reserved {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = RlpHeader::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        if rlp_head.payload_length == 0 {
            return Ok(Self::default())
        }
        let started_len = buf.len();
        let features = u32::decode(buf)?;
        let mut unused = Vec::new();
        while started_len - buf.len() < rlp_head.payload_length {
            unused.push(Bytes::decode(buf)?);
        }
        Ok(Self { features, unused })
    }
}

/// A transaction: an ordered batch of clauses sharing one gas purchase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    /// Low byte of the genesis identifier; binds the transaction to a chain.
    pub chain_tag: u8,
    /// Reference block anchoring the executable window.
    pub block_ref: BlockRef,
    /// Number of blocks past the reference height the transaction stays
    /// executable.
    pub expiration: u32,
    /// The clauses, executed in order.
    pub clauses: Vec<Clause>,
    /// Gas price coefficient, 0..=255.
    pub gas_price_coef: u8,
    /// Gas provided for the whole transaction.
    pub gas: u64,
    /// Identifier of a transaction that must have succeeded on the canonical
    /// chain before this one executes.
    pub depends_on: Option<TxId>,
    /// Arbitrary nonce chosen by the sender.
    pub nonce: u64,
    /// Reserved fields.
    pub reserved: Reserved,
    /// Recoverable origin signature, followed by the gas payer's signature
    /// when delegated.
    pub signature: Bytes,
}

impl Transaction {
    /// Height of the reference block.
    pub fn ref_height(&self) -> u32 {
        u32::from_be_bytes(self.block_ref[..4].try_into().unwrap())
    }

    /// Returns whether the transaction window covers height `h`:
    /// `ref_height <= h < ref_height + expiration`.
    pub fn executable_at(&self, h: u32) -> bool {
        self.ref_height() <= h && !self.expired_at(h)
    }

    /// Returns whether the window has closed at height `h`.
    pub fn expired_at(&self, h: u32) -> bool {
        h >= self.ref_height().saturating_add(self.expiration)
    }

    /// Returns whether the transaction carries the fee-delegation feature.
    pub fn is_delegated(&self) -> bool {
        self.reserved.features & DELEGATED_FEATURE != 0
    }

    /// Hash of the transaction without its signature; the digest the origin
    /// signs.
    pub fn signing_hash(&self) -> B256 {
        let mut out = Vec::with_capacity(self.unsigned_payload_length() + 3);
        RlpHeader { list: true, payload_length: self.unsigned_payload_length() }.encode(&mut out);
        self.encode_unsigned_fields(&mut out);
        keccak256(&out)
    }

    /// The digest a fee delegator signs: the signing hash bound to the origin.
    pub fn delegator_signing_hash(&self, origin: Address) -> B256 {
        let mut buf = [0u8; 52];
        buf[..32].copy_from_slice(self.signing_hash().as_slice());
        buf[32..].copy_from_slice(origin.as_slice());
        keccak256(buf)
    }

    /// Recovers the origin from the first signature.
    pub fn origin(&self) -> Result<Address, CryptoError> {
        let expected = if self.is_delegated() { 2 * SIGNATURE_LEN } else { SIGNATURE_LEN };
        if self.signature.len() != expected {
            return Err(CryptoError::InvalidLength(self.signature.len()))
        }
        recover_signer(self.signing_hash(), &self.signature[..SIGNATURE_LEN])
    }

    /// Recovers the delegator of a delegated transaction, `None` otherwise.
    pub fn delegator(&self) -> Result<Option<Address>, CryptoError> {
        if !self.is_delegated() {
            return Ok(None)
        }
        let origin = self.origin()?;
        recover_signer(self.delegator_signing_hash(origin), &self.signature[SIGNATURE_LEN..])
            .map(Some)
    }

    /// The account paying for gas: the delegator when delegated, else the
    /// origin.
    pub fn gas_payer(&self) -> Result<Address, CryptoError> {
        Ok(match self.delegator()? {
            Some(delegator) => delegator,
            None => self.origin()?,
        })
    }

    /// The transaction identifier: a digest over the signing hash and origin,
    /// so identical payloads from distinct origins stay distinct.
    pub fn id(&self) -> TxId {
        let origin = self.origin().unwrap_or(Address::ZERO);
        let mut buf = [0u8; 52];
        buf[..32].copy_from_slice(self.signing_hash().as_slice());
        buf[32..].copy_from_slice(origin.as_slice());
        keccak256(buf)
    }

    /// Gas that admission charges before any clause runs.
    pub fn intrinsic_gas(&self) -> u64 {
        let mut total = TX_GAS;
        if self.clauses.is_empty() {
            // an empty transaction still pays for one clause slot
            return TX_GAS + CLAUSE_GAS
        }
        for clause in &self.clauses {
            total += if clause.to.is_some() { CLAUSE_GAS } else { CLAUSE_GAS_CONTRACT_CREATION };
            for byte in clause.data.iter() {
                total +=
                    if *byte == 0 { TX_DATA_ZERO_GAS } else { TX_DATA_NON_ZERO_GAS };
            }
        }
        total
    }

    /// RLP-encoded size in bytes.
    pub fn size(&self) -> usize {
        self.length()
    }

    /// Signs the transaction in place as the origin.
    pub fn sign(&mut self, secret: &SecretKey) {
        self.signature = Bytes::copy_from_slice(&sign_hash(self.signing_hash(), secret));
    }

    /// Appends the gas payer's signature to an origin-signed delegated
    /// transaction.
    pub fn sign_delegated(&mut self, origin: Address, delegator_secret: &SecretKey) {
        let delegator_sig = sign_hash(self.delegator_signing_hash(origin), delegator_secret);
        let mut combined = Vec::with_capacity(2 * SIGNATURE_LEN);
        combined.extend_from_slice(&self.signature);
        combined.extend_from_slice(&delegator_sig);
        self.signature = Bytes::from(combined);
    }

    fn unsigned_payload_length(&self) -> usize {
        self.chain_tag.length() +
            self.block_ref.length() +
            self.expiration.length() +
            self.clauses.length() +
            self.gas_price_coef.length() +
            self.gas.length() +
            self.depends_on.map_or(1, |id| id.length()) +
            self.nonce.length() +
            self.reserved.length()
    }

    fn encode_unsigned_fields(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.chain_tag.encode(out);
        self.block_ref.encode(out);
        self.expiration.encode(out);
        self.clauses.encode(out);
        self.gas_price_coef.encode(out);
        self.gas.encode(out);
        match &self.depends_on {
            Some(id) => id.encode(out),
            None => out.put_u8(alloy_rlp::EMPTY_STRING_CODE),
        }
        self.nonce.encode(out);
        self.reserved.encode(out);
    }
}

impl Encodable for Transaction {
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

impl Decodable for Transaction {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = RlpHeader::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let started_len = buf.len();
        let this = Self {
            chain_tag: Decodable::decode(buf)?,
            block_ref: Decodable::decode(buf)?,
            expiration: Decodable::decode(buf)?,
            clauses: Decodable::decode(buf)?,
            gas_price_coef: Decodable::decode(buf)?,
            gas: Decodable::decode(buf)?,
            depends_on: decode_optional_hash(buf)?,
            nonce: Decodable::decode(buf)?,
            reserved: Decodable::decode(buf)?,
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

pub(crate) fn decode_optional_address(buf: &mut &[u8]) -> alloy_rlp::Result<Option<Address>> {
    let bytes = Bytes::decode(buf)?;
    match bytes.len() {
        0 => Ok(None),
        20 => Ok(Some(Address::from_slice(&bytes))),
        _ => Err(alloy_rlp::Error::UnexpectedLength),
    }
}

pub(crate) fn decode_optional_hash(buf: &mut &[u8]) -> alloy_rlp::Result<Option<B256>> {
    let bytes = Bytes::decode(buf)?;
    match bytes.len() {
        0 => Ok(None),
        32 => Ok(Some(B256::from_slice(&bytes))),
        _ => Err(alloy_rlp::Error::UnexpectedLength),
    }
}
