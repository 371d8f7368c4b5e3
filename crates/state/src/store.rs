use crate::{StateError, StateResult};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, RlpDecodable, RlpEncodable};
use meridian_db::{Batch, SharedStore};
use meridian_primitives::Account;
use std::collections::BTreeMap;
use tracing::trace;

/// Key of a stored root record: `state/r/<root>`.
fn root_key(root: B256) -> Vec<u8> {
    [b"state/r/".as_slice(), root.as_slice()].concat()
}

/// Key of a content-addressed code blob: `state/c/<hash>`.
fn code_key(hash: B256) -> Vec<u8> {
    [b"state/c/".as_slice(), hash.as_slice()].concat()
}

#[derive(Debug, RlpEncodable, RlpDecodable)]
struct AccountEntry {
    address: Address,
    account: Account,
}

#[derive(Debug, RlpEncodable, RlpDecodable)]
struct SlotEntry {
    key: B256,
    value: B256,
}

#[derive(Debug, RlpEncodable, RlpDecodable)]
struct StorageEntry {
    address: Address,
    slots: Vec<SlotEntry>,
}

/// One state root's delta over its parent root. Roots form a chain back to
/// the zero sentinel; resolution walks the chain until a delta answers.
#[derive(Debug, Default, RlpEncodable, RlpDecodable)]
struct RootRecord {
    parent: B256,
    accounts: Vec<AccountEntry>,
    storages: Vec<StorageEntry>,
}

/// Configuration of the state layer.
#[derive(Debug, Clone, Copy)]
pub struct StateConfig {
    /// Per-account ceiling for regenerated energy.
    pub energy_cap: U256,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { energy_cap: U256::MAX }
    }
}

/// Read access to the world state at any stored root, plus the commit path
/// used by [`crate::Stage`].
#[derive(Debug, Clone)]
pub struct StateStore {
    store: SharedStore,
    config: StateConfig,
}

impl StateStore {
    /// Creates a store over the shared key-value backend.
    pub fn new(store: SharedStore) -> Self {
        Self::with_config(store, StateConfig::default())
    }

    /// Creates a store with an explicit configuration.
    pub fn with_config(store: SharedStore, config: StateConfig) -> Self {
        Self { store, config }
    }

    /// The state configuration.
    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    /// Seeds the store with a genesis allocation and returns its root.
    pub fn commit_genesis(
        &self,
        accounts: &BTreeMap<Address, Account>,
    ) -> StateResult<B256> {
        let root = meridian_primitives::proofs::state_root(accounts.iter());
        self.persist(
            root,
            B256::ZERO,
            accounts.iter().map(|(address, account)| (*address, account.clone())).collect(),
            Vec::new(),
            Vec::new(),
        )?;
        Ok(root)
    }

    /// Resolves the account record at `root`, `None` for untouched addresses.
    pub fn account(&self, root: B256, address: Address) -> StateResult<Option<Account>> {
        let mut current = root;
        while current != B256::ZERO {
            let record = self.record(current)?;
            if let Some(entry) = record.accounts.iter().find(|entry| entry.address == address) {
                return Ok(Some(entry.account.clone()))
            }
            current = record.parent;
        }
        Ok(None)
    }

    /// Resolves a storage slot at `root`; untouched slots read as zero.
    pub fn storage(&self, root: B256, address: Address, key: B256) -> StateResult<B256> {
        let mut current = root;
        while current != B256::ZERO {
            let record = self.record(current)?;
            let slot = record
                .storages
                .iter()
                .find(|entry| entry.address == address)
                .and_then(|entry| entry.slots.iter().find(|slot| slot.key == key));
            if let Some(slot) = slot {
                return Ok(slot.value)
            }
            // an account rewrite without this slot does not shadow it
            current = record.parent;
        }
        Ok(B256::ZERO)
    }

    /// Fetches a code blob by hash.
    pub fn code(&self, hash: B256) -> StateResult<Option<Bytes>> {
        Ok(self.store.get(&code_key(hash))?.map(Bytes::from))
    }

    /// Collects the full account set at `root`, newest delta winning.
    pub(crate) fn accounts_at(&self, root: B256) -> StateResult<BTreeMap<Address, Account>> {
        let mut accounts = BTreeMap::new();
        let mut current = root;
        while current != B256::ZERO {
            let record = self.record(current)?;
            for entry in record.accounts {
                accounts.entry(entry.address).or_insert(entry.account);
            }
            current = record.parent;
        }
        Ok(accounts)
    }

    /// Collects the full storage of one account at `root`.
    pub(crate) fn storage_at(
        &self,
        root: B256,
        address: Address,
    ) -> StateResult<BTreeMap<B256, B256>> {
        let mut slots = BTreeMap::new();
        let mut current = root;
        while current != B256::ZERO {
            let record = self.record(current)?;
            if let Some(entry) = record.storages.iter().find(|entry| entry.address == address) {
                for slot in &entry.slots {
                    slots.entry(slot.key).or_insert(slot.value);
                }
            }
            current = record.parent;
        }
        Ok(slots)
    }

    /// Persists a delta under `root`. Codes are content-addressed and written
    /// alongside.
    pub(crate) fn persist(
        &self,
        root: B256,
        parent: B256,
        accounts: Vec<(Address, Account)>,
        storages: Vec<(Address, Vec<(B256, B256)>)>,
        codes: Vec<Bytes>,
    ) -> StateResult<()> {
        let record = RootRecord {
            parent,
            accounts: accounts
                .into_iter()
                .map(|(address, account)| AccountEntry { address, account })
                .collect(),
            storages: storages
                .into_iter()
                .map(|(address, slots)| StorageEntry {
                    address,
                    slots: slots
                        .into_iter()
                        .map(|(key, value)| SlotEntry { key, value })
                        .collect(),
                })
                .collect(),
        };
        let mut batch = Batch::new();
        for code in codes {
            batch.put(code_key(keccak256(&code)), code.to_vec());
        }
        batch.put(root_key(root), alloy_rlp::encode(&record));
        trace!(target: "state", %root, %parent, "persisting state delta");
        self.store.write(batch)?;
        Ok(())
    }

    fn record(&self, root: B256) -> StateResult<RootRecord> {
        let raw = self
            .store
            .get(&root_key(root))?
            .ok_or(StateError::UnknownRoot(root))?;
        RootRecord::decode(&mut raw.as_slice()).map_err(|_| StateError::Corrupt(root))
    }
}
