use crate::{
    crypto::public_key_to_address, proofs, Account, Address, Block, Header, BlockId,
    INITIAL_GAS_LIMIT, U256,
};
use alloy_primitives::{address, keccak256, B256};
use secp256k1::{SecretKey, SECP256K1};
use std::collections::BTreeMap;

/// Timestamp of the development-network genesis block.
pub const DEV_GENESIS_TIMESTAMP: u64 = 1_526_400_000;

/// Accounts funded by the development-network genesis.
const DEV_FUNDED: [Address; 10] = [
    address!("f077b491b355E64048cE21E3A6Fc4751eEeA77fa"),
    address!("435933c8064b4Ae76bE665428e0307eF2cCFBD68"),
    address!("0F872421Dc479F3c11eDd89512731814D0598dB5"),
    address!("F370940aBDBd2583bC80bFc19d19bc216C88Ccf0"),
    address!("99602e4Bbc0503b8ff4432bB1857F916c3653B85"),
    address!("61E7d0c2B25706bE3485980F39A3a994A8207aCf"),
    address!("361277D1b27504F36a3b33d3a52d1f8270331b8C"),
    address!("D7f75A0A1287ab2916848909C8531a0eA9412800"),
    address!("AbEf6032B9176C186F6BF984f548bdA53349f70a"),
    address!("865306084235Bf804c8Bba8a8d56890940ca8F0b"),
];

/// A development account with a known secret key, used by the solo proposer
/// and by tests that need to sign.
#[derive(Debug, Clone)]
pub struct DevAccount {
    /// Address derived from the secret key.
    pub address: Address,
    /// The secret key.
    pub secret: SecretKey,
}

/// Deterministic keyed development accounts.
///
/// Keys are derived from a fixed seed so every devnet instance agrees on the
/// proposer set.
pub fn dev_accounts() -> Vec<DevAccount> {
    (0u8..10)
        .map(|index| {
            let digest = keccak256([b"meridian dev account ".as_slice(), &[index]].concat());
            let secret =
                SecretKey::from_slice(digest.as_slice()).expect("digest is a valid scalar");
            let address = public_key_to_address(&secret.public_key(SECP256K1));
            DevAccount { address, secret }
        })
        .collect()
}

/// A genesis description: the initial allocation and the authority set.
#[derive(Debug, Clone)]
pub struct Genesis {
    /// Genesis timestamp, seconds.
    pub timestamp: u64,
    /// Gas limit of the genesis block.
    pub gas_limit: u64,
    /// Initial account records.
    pub accounts: BTreeMap<Address, Account>,
    /// Addresses authorized to propose blocks, in rotation order.
    pub authority: Vec<Address>,
}

impl Genesis {
    /// The development-network genesis: the well-known funded addresses plus
    /// the keyed accounts of [`dev_accounts`], which also form the authority
    /// set.
    pub fn dev() -> Self {
        let unit = U256::from(10u64).pow(U256::from(18));
        let balance = U256::from(25_000_000u64) * unit;

        let mut accounts = BTreeMap::new();
        for address in DEV_FUNDED {
            accounts.insert(
                address,
                Account {
                    balance,
                    block_time: DEV_GENESIS_TIMESTAMP,
                    ..Default::default()
                },
            );
        }
        let keyed = dev_accounts();
        for account in &keyed {
            accounts.insert(
                account.address,
                Account {
                    balance,
                    energy: balance,
                    block_time: DEV_GENESIS_TIMESTAMP,
                    ..Default::default()
                },
            );
        }

        Self {
            timestamp: DEV_GENESIS_TIMESTAMP,
            gas_limit: INITIAL_GAS_LIMIT,
            accounts,
            authority: keyed.into_iter().map(|account| account.address).collect(),
        }
    }

    /// Builds the genesis block over the initial allocation.
    ///
    /// The parent identifier carries `u32::MAX` so the genesis number wraps
    /// to 0; the block is unsigned.
    pub fn build(&self) -> Block {
        let mut parent = B256::ZERO;
        parent[..4].copy_from_slice(&u32::MAX.to_be_bytes());

        let header = Header {
            parent_id: BlockId(parent),
            timestamp: self.timestamp,
            gas_limit: self.gas_limit,
            state_root: proofs::state_root(self.accounts.iter()),
            txs_root: proofs::ordered_root::<crate::Transaction>(&[]),
            receipts_root: proofs::ordered_root::<crate::Receipt>(&[]),
            ..Default::default()
        };
        Block::new(header, Vec::new())
    }
}
