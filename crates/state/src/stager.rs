use crate::{StateError, StateResult, StateStore};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use meridian_primitives::{proofs, Account};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A nested save-point into a [`Stager`]'s journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Undo record for one buffered write.
#[derive(Debug)]
enum JournalEntry {
    Account { address: Address, prev: Option<Account> },
    Storage { address: Address, key: B256, prev: Option<B256> },
    Code { address: Address, prev: Option<Bytes> },
}

/// A buffered mutation batch on top of a base state root.
///
/// Reads fall through to the base state for anything not dirty; writes are
/// journaled so [`Stager::revert_to`] restores exactly the dirty state at
/// checkpoint time, in time proportional to the writes since the checkpoint.
///
/// The stager is single-owner: each packing flow forks its own off the
/// parent's state root.
#[derive(Debug)]
pub struct Stager {
    store: StateStore,
    base_root: B256,
    accounts: HashMap<Address, Account>,
    storage: HashMap<(Address, B256), B256>,
    codes: HashMap<Address, Bytes>,
    journal: Vec<JournalEntry>,
}

impl Stager {
    /// Creates a stager over the given base root.
    pub fn new(store: StateStore, base_root: B256) -> Self {
        Self {
            store,
            base_root,
            accounts: HashMap::new(),
            storage: HashMap::new(),
            codes: HashMap::new(),
            journal: Vec::new(),
        }
    }

    /// The root this stager forked from.
    pub fn base_root(&self) -> B256 {
        self.base_root
    }

    /// Balance of an address.
    pub fn balance(&self, address: Address) -> StateResult<U256> {
        Ok(self.record(address)?.map(|account| account.balance).unwrap_or_default())
    }

    /// Effective energy of an address at `now`.
    pub fn energy(&self, address: Address, now: u64) -> StateResult<U256> {
        let cap = self.store.config().energy_cap;
        Ok(self
            .record(address)?
            .map(|account| account.energy_at(now, cap))
            .unwrap_or_default())
    }

    /// Installed code of an address, if any.
    pub fn code(&self, address: Address) -> StateResult<Option<Bytes>> {
        if let Some(code) = self.codes.get(&address) {
            return Ok(Some(code.clone()))
        }
        match self.record(address)?.and_then(|account| account.code_hash) {
            Some(hash) => self.store.code(hash),
            None => Ok(None),
        }
    }

    /// A storage slot of an address; untouched slots read as zero.
    pub fn storage(&self, address: Address, key: B256) -> StateResult<B256> {
        if let Some(value) = self.storage.get(&(address, key)) {
            return Ok(*value)
        }
        self.store.storage(self.base_root, address, key)
    }

    /// Sets the balance, materializing regenerated energy first.
    pub fn set_balance(&mut self, address: Address, value: U256, now: u64) -> StateResult<()> {
        let mut record = self.touch(address, now)?;
        record.balance = value;
        self.accounts.insert(address, record);
        Ok(())
    }

    /// Sets the stored energy as of `now`.
    pub fn set_energy(&mut self, address: Address, value: U256, now: u64) -> StateResult<()> {
        let mut record = self.touch(address, now)?;
        record.energy = value;
        self.accounts.insert(address, record);
        Ok(())
    }

    /// Deducts prepaid gas energy from the payer. Fails with
    /// [`StateError::InsufficientEnergy`] without mutating anything.
    pub fn sub_energy_for_gas(
        &mut self,
        payer: Address,
        amount: U256,
        now: u64,
    ) -> StateResult<()> {
        let effective = self.energy(payer, now)?;
        if effective < amount {
            return Err(StateError::InsufficientEnergy)
        }
        let mut record = self.touch(payer, now)?;
        record.energy = effective - amount;
        self.accounts.insert(payer, record);
        Ok(())
    }

    /// Installs code at an address.
    pub fn set_code(&mut self, address: Address, code: Bytes, now: u64) -> StateResult<()> {
        let mut record = self.touch(address, now)?;
        record.code_hash = Some(keccak256(&code));
        self.accounts.insert(address, record);
        self.journal.push(JournalEntry::Code { address, prev: self.codes.get(&address).cloned() });
        self.codes.insert(address, code);
        Ok(())
    }

    /// Writes a storage slot.
    pub fn set_storage(&mut self, address: Address, key: B256, value: B256) {
        self.journal.push(JournalEntry::Storage {
            address,
            key,
            prev: self.storage.get(&(address, key)).copied(),
        });
        self.storage.insert((address, key), value);
    }

    /// Opens a save-point.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    /// Rolls the dirty state back to the given save-point.
    pub fn revert_to(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            match self.journal.pop().expect("journal length checked") {
                JournalEntry::Account { address, prev } => match prev {
                    Some(record) => {
                        self.accounts.insert(address, record);
                    }
                    None => {
                        self.accounts.remove(&address);
                    }
                },
                JournalEntry::Storage { address, key, prev } => match prev {
                    Some(value) => {
                        self.storage.insert((address, key), value);
                    }
                    None => {
                        self.storage.remove(&(address, key));
                    }
                },
                JournalEntry::Code { address, prev } => match prev {
                    Some(code) => {
                        self.codes.insert(address, code);
                    }
                    None => {
                        self.codes.remove(&address);
                    }
                },
            }
        }
    }

    /// Previews the state root the buffered changes would commit to.
    pub fn state_root(&self) -> StateResult<B256> {
        Ok(proofs::state_root(self.resolved_accounts()?.iter()))
    }

    /// Closes the stager into a [`Stage`] holding the computed root and the
    /// change set; nothing is persisted until [`Stage::commit`].
    pub fn stage(self) -> StateResult<Stage> {
        let resolved = self.resolved_accounts()?;
        let root = proofs::state_root(resolved.iter());

        let mut changed: HashSet<Address> = self.accounts.keys().copied().collect();
        changed.extend(self.storage.keys().map(|(address, _)| *address));
        changed.extend(self.codes.keys().copied());

        let accounts = changed
            .iter()
            .map(|address| (*address, resolved.get(address).cloned().unwrap_or_default()))
            .collect();

        let mut storages: BTreeMap<Address, Vec<(B256, B256)>> = BTreeMap::new();
        for ((address, key), value) in &self.storage {
            storages.entry(*address).or_default().push((*key, *value));
        }

        Ok(Stage {
            store: self.store,
            parent_root: self.base_root,
            root,
            accounts,
            storages: storages.into_iter().collect(),
            codes: self.codes.into_values().collect(),
        })
    }

    /// The full account set with dirty records and recomputed storage roots
    /// applied.
    fn resolved_accounts(&self) -> StateResult<BTreeMap<Address, Account>> {
        let mut accounts = self.store.accounts_at(self.base_root)?;
        for (address, record) in &self.accounts {
            accounts.insert(*address, record.clone());
        }

        let dirty_storage: HashSet<Address> =
            self.storage.keys().map(|(address, _)| *address).collect();
        for address in dirty_storage {
            let mut slots = self.store.storage_at(self.base_root, address)?;
            for ((slot_address, key), value) in &self.storage {
                if *slot_address == address {
                    slots.insert(*key, *value);
                }
            }
            let record = accounts.entry(address).or_default();
            record.storage_root = proofs::storage_root(slots.iter());
        }
        Ok(accounts)
    }

    fn record(&self, address: Address) -> StateResult<Option<Account>> {
        if let Some(record) = self.accounts.get(&address) {
            return Ok(Some(record.clone()))
        }
        self.store.account(self.base_root, address)
    }

    /// Loads the working copy of an account, journals its prior dirty value,
    /// and materializes regenerated energy at `now`.
    fn touch(&mut self, address: Address, now: u64) -> StateResult<Account> {
        let prev = self.accounts.get(&address).cloned();
        let mut record = match &prev {
            Some(record) => record.clone(),
            None => self.store.account(self.base_root, address)?.unwrap_or_default(),
        };
        self.journal.push(JournalEntry::Account { address, prev });
        record.energy = record.energy_at(now, self.store.config().energy_cap);
        record.block_time = now;
        Ok(record)
    }
}

/// A closed mutation batch: the computed root plus the delta to persist.
#[derive(Debug)]
pub struct Stage {
    store: StateStore,
    parent_root: B256,
    root: B256,
    accounts: Vec<(Address, Account)>,
    storages: Vec<(Address, Vec<(B256, B256)>)>,
    codes: Vec<Bytes>,
}

impl Stage {
    /// The root the batch commits to.
    pub fn root(&self) -> B256 {
        self.root
    }

    /// Materializes the batch into the backing store and returns the root.
    ///
    /// Committing twice is harmless; the delta is keyed by its root.
    pub fn commit(self) -> StateResult<B256> {
        let root = self.root;
        self.store.persist(root, self.parent_root, self.accounts, self.storages, self.codes)?;
        Ok(root)
    }
}
