use crate::{proofs::EMPTY_ROOT_HASH, transaction::decode_optional_hash, ENERGY_GROWTH_RATE};
use alloy_primitives::{B256, U256};
use alloy_rlp::{Decodable, Encodable, Header as RlpHeader};

/// The world-state record of one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Balance of the base token.
    pub balance: U256,
    /// Stored energy as of `block_time`; regenerates from balance, see
    /// [`Account::energy_at`].
    pub energy: U256,
    /// Timestamp at which `energy` was last materialized.
    pub block_time: u64,
    /// Account nonce.
    pub nonce: u64,
    /// Hash of the installed code, if any.
    pub code_hash: Option<B256>,
    /// Root over the account's storage slots.
    pub storage_root: B256,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            balance: U256::ZERO,
            energy: U256::ZERO,
            block_time: 0,
            nonce: 0,
            code_hash: None,
            storage_root: EMPTY_ROOT_HASH,
        }
    }
}

impl Account {
    /// Effective energy at `now`: the stored amount plus what the balance has
    /// generated since `block_time`, saturating at `cap`.
    pub fn energy_at(&self, now: u64, cap: U256) -> U256 {
        let elapsed = now.saturating_sub(self.block_time);
        let generated = self.balance * U256::from(ENERGY_GROWTH_RATE) * U256::from(elapsed) /
            U256::from(10u64).pow(U256::from(18));
        self.energy.saturating_add(generated).min(cap)
    }

    /// Returns whether code is installed.
    pub fn has_code(&self) -> bool {
        self.code_hash.is_some()
    }

    /// Returns whether every field holds its default value; empty accounts are
    /// excluded from the state root.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero() &&
            self.energy.is_zero() &&
            self.block_time == 0 &&
            self.nonce == 0 &&
            self.code_hash.is_none() &&
            self.storage_root == EMPTY_ROOT_HASH
    }

    fn payload_length(&self) -> usize {
        self.balance.length() +
            self.energy.length() +
            self.block_time.length() +
            self.nonce.length() +
            self.code_hash.map_or(1, |hash| hash.length()) +
            self.storage_root.length()
    }
}

impl Encodable for Account {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        RlpHeader { list: true, payload_length: self.payload_length() }.encode(out);
        self.balance.encode(out);
        self.energy.encode(out);
        self.block_time.encode(out);
        self.nonce.encode(out);
        match &self.code_hash {
            Some(hash) => hash.encode(out),
            None => out.put_u8(alloy_rlp::EMPTY_STRING_CODE),
        }
        self.storage_root.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        RlpHeader { list: true, payload_length }.length() + payload_length
    }
}

impl Decodable for Account {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = RlpHeader::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        Ok(Self {
            balance: Decodable::decode(buf)?,
            energy: Decodable::decode(buf)?,
            block_time: Decodable::decode(buf)?,
            nonce: Decodable::decode(buf)?,
            code_hash: decode_optional_hash(buf)?,
            storage_root: Decodable::decode(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_regenerates_from_balance() {
        let account = Account {
            // 25M tokens
            balance: U256::from(25_000_000u64) * U256::from(10u64).pow(U256::from(18)),
            block_time: 100,
            ..Default::default()
        };
        assert_eq!(account.energy_at(100, U256::MAX), U256::ZERO);
        // after 1000s: 25e6 * 5e9 * 1000 wei
        let expected = U256::from(25_000_000u64) * U256::from(ENERGY_GROWTH_RATE) * U256::from(1000u64);
        assert_eq!(account.energy_at(1_100, U256::MAX), expected);
    }

    #[test]
    fn energy_saturates_at_cap() {
        let account = Account {
            balance: U256::from(10u64).pow(U256::from(18)),
            energy: U256::from(5u64),
            block_time: 0,
            ..Default::default()
        };
        assert_eq!(account.energy_at(u64::MAX, U256::from(7u64)), U256::from(7u64));
    }

    #[test]
    fn rlp_round_trip() {
        let account = Account {
            balance: U256::from(1u64),
            energy: U256::from(2u64),
            block_time: 3,
            nonce: 4,
            code_hash: Some(B256::repeat_byte(5)),
            storage_root: B256::repeat_byte(6),
        };
        let encoded = alloy_rlp::encode(&account);
        assert_eq!(Account::decode(&mut encoded.as_slice()).unwrap(), account);

        let default = Account::default();
        let encoded = alloy_rlp::encode(&default);
        assert_eq!(Account::decode(&mut encoded.as_slice()).unwrap(), default);
    }
}
