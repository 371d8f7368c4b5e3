//! Trie-root helpers shared by headers, the stager and the genesis builder.

use crate::{Account, Address};
use alloy_primitives::{keccak256, B256};
use alloy_rlp::Encodable;
use alloy_trie::{HashBuilder, Nibbles};

pub use alloy_trie::EMPTY_ROOT_HASH;

/// Computes the root over an ordered list of items, keyed by index.
pub fn ordered_root<T: Encodable>(items: &[T]) -> B256 {
    if items.is_empty() {
        return EMPTY_ROOT_HASH
    }
    let mut builder = HashBuilder::default();
    for (index, item) in items.iter().enumerate() {
        let mut key = [0u8; 32];
        key[24..].copy_from_slice(&(index as u64).to_be_bytes());
        builder.add_leaf(Nibbles::unpack(key), &alloy_rlp::encode(item));
    }
    builder.root()
}

/// Computes a root over key/value pairs, hashing each key.
///
/// Pairs may arrive in any order; empty input yields [`EMPTY_ROOT_HASH`].
pub fn keyed_root(pairs: impl IntoIterator<Item = (B256, Vec<u8>)>) -> B256 {
    let mut sorted: Vec<(B256, Vec<u8>)> =
        pairs.into_iter().map(|(key, value)| (keccak256(key), value)).collect();
    if sorted.is_empty() {
        return EMPTY_ROOT_HASH
    }
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut builder = HashBuilder::default();
    for (key, value) in sorted {
        builder.add_leaf(Nibbles::unpack(key), &value);
    }
    builder.root()
}

/// Computes the world-state root over a full account set.
pub fn state_root<'a>(accounts: impl IntoIterator<Item = (&'a Address, &'a Account)>) -> B256 {
    keyed_root(accounts.into_iter().filter(|(_, account)| !account.is_empty()).map(
        |(address, account)| {
            let mut key = B256::ZERO;
            key[12..].copy_from_slice(address.as_slice());
            (key, alloy_rlp::encode(account))
        },
    ))
}

/// Computes the storage root of one account.
pub fn storage_root<'a>(slots: impl IntoIterator<Item = (&'a B256, &'a B256)>) -> B256 {
    keyed_root(
        slots
            .into_iter()
            .filter(|(_, value)| **value != B256::ZERO)
            .map(|(key, value)| (*key, alloy_rlp::encode(value))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::U256;

    #[test]
    fn empty_roots() {
        assert_eq!(ordered_root::<B256>(&[]), EMPTY_ROOT_HASH);
        assert_eq!(storage_root([].into_iter()), EMPTY_ROOT_HASH);
    }

    #[test]
    fn ordered_root_is_order_sensitive() {
        let a = B256::repeat_byte(1);
        let b = B256::repeat_byte(2);
        assert_ne!(ordered_root(&[a, b]), ordered_root(&[b, a]));
    }

    #[test]
    fn state_root_skips_empty_accounts() {
        let addr_a = Address::repeat_byte(1);
        let addr_b = Address::repeat_byte(2);
        let funded = Account { balance: U256::from(1u64), ..Default::default() };
        let empty = Account::default();

        let with_empty = state_root([(&addr_a, &funded), (&addr_b, &empty)]);
        let without = state_root([(&addr_a, &funded)]);
        assert_eq!(with_empty, without);
    }

    #[test]
    fn storage_root_ignores_zero_values() {
        let key = B256::repeat_byte(7);
        let zero = B256::ZERO;
        assert_eq!(storage_root([(&key, &zero)]), EMPTY_ROOT_HASH);
    }
}
