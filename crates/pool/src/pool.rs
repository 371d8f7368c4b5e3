use crate::{PoolConfig, PoolError, PoolResult, RejectReason};
use alloy_primitives::{Address, U256};
use meridian_chain::Repository;
use meridian_primitives::{gas_price, Transaction, TxId, INITIAL_BASE_GAS_PRICE, MAX_TX_SIZE};
use meridian_state::StateStore;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, trace};

/// A validated resident transaction.
#[derive(Debug)]
pub struct PooledTx {
    /// The transaction.
    pub tx: Transaction,
    /// Memoized identifier.
    pub id: TxId,
    /// Recovered origin.
    pub origin: Address,
    /// Admission counter; the FIFO tiebreak within a priority bucket.
    submission_id: u64,
    /// Admission time, for lifetime eviction.
    added_at: Instant,
}

impl PooledTx {
    fn priority(&self) -> u8 {
        self.tx.gas_price_coef
    }
}

/// Ordering handle into the priority set.
///
/// The set's minimum is the eviction candidate: lowest coefficient, youngest
/// admission. Reverse iteration yields packing order: highest coefficient,
/// oldest first within a coefficient bucket.
#[derive(Debug, Clone)]
struct PriorityRef(Arc<PooledTx>);

impl PartialEq for PriorityRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for PriorityRef {}

impl PartialOrd for PriorityRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityRef {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.0.priority(), Reverse(self.0.submission_id), self.0.id)
            .cmp(&(other.0.priority(), Reverse(other.0.submission_id), other.0.id))
    }
}

#[derive(Debug, Default)]
struct PoolIndex {
    by_id: HashMap<TxId, Arc<PooledTx>>,
    by_priority: BTreeSet<PriorityRef>,
    per_origin: HashMap<Address, usize>,
    next_submission_id: u64,
}

impl PoolIndex {
    fn insert(&mut self, pooled: Arc<PooledTx>) {
        *self.per_origin.entry(pooled.origin).or_default() += 1;
        self.by_priority.insert(PriorityRef(pooled.clone()));
        self.by_id.insert(pooled.id, pooled);
    }

    fn remove(&mut self, id: &TxId) -> Option<Arc<PooledTx>> {
        let pooled = self.by_id.remove(id)?;
        self.by_priority.remove(&PriorityRef(pooled.clone()));
        match self.per_origin.get_mut(&pooled.origin) {
            Some(count) if *count > 1 => *count -= 1,
            _ => {
                self.per_origin.remove(&pooled.origin);
            }
        }
        Some(pooled)
    }

    /// Drops the lowest-priority resident; the newest within the lowest
    /// coefficient bucket.
    fn evict_lowest(&mut self) -> Option<Arc<PooledTx>> {
        let candidate = self.by_priority.first()?.0.id;
        self.remove(&candidate)
    }
}

struct Inner {
    config: PoolConfig,
    repo: Repository,
    state: StateStore,
    index: RwLock<PoolIndex>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("config", &self.config).finish_non_exhaustive()
    }
}

/// The transaction pool.
///
/// Cloning shares the pool; admission takes the write lock across validation
/// and eviction, iteration snapshots under the read lock.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    /// Creates a pool bound to the repository and state it validates against.
    pub fn new(config: PoolConfig, repo: Repository, state: StateStore) -> Self {
        Self { inner: Arc::new(Inner { config, repo, state, index: RwLock::new(PoolIndex::default()) }) }
    }

    /// The repository this pool follows.
    pub fn repo(&self) -> &Repository {
        &self.inner.repo
    }

    /// Validates and admits a transaction, returning its identifier.
    ///
    /// On global overflow the lowest-priority resident is evicted, which may
    /// be the incoming transaction itself.
    pub fn add(&self, tx: Transaction) -> PoolResult<TxId> {
        if tx.size() > MAX_TX_SIZE {
            return Err(PoolError::Rejected(RejectReason::Oversized))
        }
        if tx.chain_tag != self.inner.repo.chain_tag() {
            return Err(PoolError::Rejected(RejectReason::ChainTagMismatch))
        }
        let origin =
            tx.origin().map_err(|_| PoolError::Rejected(RejectReason::BadSignature))?;
        let payer =
            tx.gas_payer().map_err(|_| PoolError::Rejected(RejectReason::BadSignature))?;
        if tx.gas < tx.intrinsic_gas() {
            return Err(PoolError::Rejected(RejectReason::IntrinsicGas))
        }

        let best = self.inner.repo.best_block_summary();
        if tx.expired_at(best.number()) {
            return Err(PoolError::Rejected(RejectReason::Expired))
        }

        let id = tx.id();
        if self.inner.repo.find_canonical_tx(id, best.number()).is_some() {
            return Err(PoolError::KnownTransaction)
        }

        // prepaid energy at the best state
        let required = U256::from(gas_price(INITIAL_BASE_GAS_PRICE, tx.gas_price_coef)) *
            U256::from(tx.gas);
        let energy = self
            .inner
            .state
            .account(best.header.state_root, payer)?
            .map(|account| {
                account.energy_at(best.header.timestamp, self.inner.state.config().energy_cap)
            })
            .unwrap_or_default();
        if energy < required {
            return Err(PoolError::Rejected(RejectReason::InsufficientEnergy))
        }

        let mut index = self.inner.index.write();
        if index.by_id.contains_key(&id) {
            return Err(PoolError::KnownTransaction)
        }
        if index.per_origin.get(&origin).copied().unwrap_or(0) >=
            self.inner.config.limit_per_account
        {
            return Err(PoolError::Rejected(RejectReason::QuotaExceeded))
        }

        let submission_id = index.next_submission_id;
        index.next_submission_id += 1;
        index.insert(Arc::new(PooledTx {
            tx,
            id,
            origin,
            submission_id,
            added_at: Instant::now(),
        }));

        while index.by_id.len() > self.inner.config.limit {
            if let Some(evicted) = index.evict_lowest() {
                counter!("pool_evicted_total").increment(1);
                trace!(target: "pool", id = %evicted.id, "evicted lowest-priority transaction");
            }
        }

        gauge!("pool_resident").set(index.by_id.len() as f64);
        counter!("pool_added_total").increment(1);
        trace!(target: "pool", %id, %origin, "admitted transaction");
        Ok(id)
    }

    /// Silently removes the given transactions.
    pub fn remove(&self, ids: &[TxId]) {
        let mut index = self.inner.index.write();
        for id in ids {
            index.remove(id);
        }
        gauge!("pool_resident").set(index.by_id.len() as f64);
    }

    /// Looks up a resident transaction.
    pub fn get(&self, id: &TxId) -> Option<Arc<PooledTx>> {
        self.inner.index.read().by_id.get(id).cloned()
    }

    /// Number of resident transactions.
    pub fn len(&self) -> usize {
        self.inner.index.read().by_id.len()
    }

    /// Returns whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot iterator over the transactions executable in the next
    /// block: dependency satisfied on the canonical chain, reference height
    /// not in the future. Highest coefficient first, FIFO within a bucket.
    ///
    /// Pool mutations after the snapshot are invisible to the iterator.
    pub fn executables(&self) -> Executables {
        let best_number = self.inner.repo.best_block_summary().number();
        let next = best_number.saturating_add(1);

        let snapshot: Vec<Arc<PooledTx>> = {
            let index = self.inner.index.read();
            index.by_priority.iter().rev().map(|entry| entry.0.clone()).collect()
        };

        let txs = snapshot
            .into_iter()
            .filter(|pooled| {
                if !pooled.tx.executable_at(next) {
                    return false
                }
                match pooled.tx.depends_on {
                    Some(dep) => {
                        self.inner.repo.has_succeeded_tx(dep, best_number).unwrap_or(false)
                    }
                    None => true,
                }
            })
            .collect::<Vec<_>>();
        Executables { txs: txs.into_iter() }
    }

    /// Prunes transactions whose window has closed against the best block
    /// and those resident longer than the configured lifetime.
    pub fn evict_stale(&self) {
        let best_number = self.inner.repo.best_block_summary().number();
        let max_lifetime = self.inner.config.max_lifetime;

        let mut index = self.inner.index.write();
        let stale: Vec<TxId> = index
            .by_id
            .values()
            .filter(|pooled| {
                pooled.tx.expired_at(best_number) || pooled.added_at.elapsed() > max_lifetime
            })
            .map(|pooled| pooled.id)
            .collect();
        for id in &stale {
            index.remove(id);
        }
        if !stale.is_empty() {
            counter!("pool_evicted_total").increment(stale.len() as u64);
            debug!(target: "pool", count = stale.len(), "pruned stale transactions");
        }
        gauge!("pool_resident").set(index.by_id.len() as f64);
    }
}

/// Snapshot iterator returned by [`Pool::executables`].
#[derive(Debug)]
pub struct Executables {
    txs: std::vec::IntoIter<Arc<PooledTx>>,
}

impl Iterator for Executables {
    type Item = Arc<PooledTx>;

    fn next(&mut self) -> Option<Self::Item> {
        self.txs.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_chain::SoloFinalizer;
    use meridian_db::MemoryStore;
    use meridian_primitives::{dev_accounts, Clause, Genesis, Reserved};
    use meridian_state::StateStore;
    use std::time::Duration;

    fn setup(config: PoolConfig) -> (Pool, Vec<meridian_primitives::DevAccount>) {
        let store: meridian_db::SharedStore = Arc::new(MemoryStore::new());
        let genesis = Genesis::dev();
        let state = StateStore::new(store.clone());
        state.commit_genesis(&genesis.accounts).unwrap();
        let block = genesis.build();
        let finalizer = Arc::new(SoloFinalizer::new(block.id()));
        let repo = Repository::new(store, &block, finalizer).unwrap();
        (Pool::new(config, repo, state), dev_accounts())
    }

    fn tx(pool: &Pool, account: &meridian_primitives::DevAccount, coef: u8, nonce: u64) -> Transaction {
        let mut tx = Transaction {
            chain_tag: pool.repo().chain_tag(),
            expiration: 100,
            clauses: vec![Clause {
                to: Some(Address::repeat_byte(9)),
                value: U256::from(1u64),
                data: Default::default(),
            }],
            gas_price_coef: coef,
            gas: 30_000,
            nonce,
            reserved: Reserved::default(),
            ..Default::default()
        };
        tx.sign(&account.secret);
        tx
    }

    #[test]
    fn admits_and_reports_known() {
        let (pool, accounts) = setup(PoolConfig::default());
        let sample = tx(&pool, &accounts[0], 0, 1);
        let id = pool.add(sample.clone()).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(matches!(pool.add(sample), Err(PoolError::KnownTransaction)));
        assert_eq!(pool.get(&id).unwrap().id, id);
    }

    #[test]
    fn rejects_wrong_chain_tag() {
        let (pool, accounts) = setup(PoolConfig::default());
        let mut bad = tx(&pool, &accounts[0], 0, 1);
        bad.chain_tag = bad.chain_tag.wrapping_add(1);
        bad.sign(&accounts[0].secret);
        assert!(matches!(
            pool.add(bad),
            Err(PoolError::Rejected(RejectReason::ChainTagMismatch))
        ));
    }

    #[test]
    fn rejects_bad_signature() {
        let (pool, accounts) = setup(PoolConfig::default());
        let mut bad = tx(&pool, &accounts[0], 0, 1);
        bad.signature = Default::default();
        assert!(matches!(
            pool.add(bad),
            Err(PoolError::Rejected(RejectReason::BadSignature))
        ));
    }

    #[test]
    fn rejects_intrinsic_gas_shortfall() {
        let (pool, accounts) = setup(PoolConfig::default());
        let mut bad = tx(&pool, &accounts[0], 0, 1);
        bad.gas = 1_000;
        bad.sign(&accounts[0].secret);
        assert!(matches!(
            pool.add(bad),
            Err(PoolError::Rejected(RejectReason::IntrinsicGas))
        ));
    }

    #[test]
    fn rejects_expired_window() {
        let (pool, accounts) = setup(PoolConfig::default());
        let mut bad = tx(&pool, &accounts[0], 0, 1);
        bad.expiration = 0;
        bad.sign(&accounts[0].secret);
        assert!(matches!(pool.add(bad), Err(PoolError::Rejected(RejectReason::Expired))));
    }

    #[test]
    fn rejects_unfunded_payer() {
        let (pool, _) = setup(PoolConfig::default());
        let poor = secp256k1::SecretKey::from_slice(&[7u8; 32]).unwrap();
        let account = meridian_primitives::DevAccount {
            address: meridian_primitives::public_key_to_address(
                &poor.public_key(secp256k1::SECP256K1),
            ),
            secret: poor,
        };
        let unfunded = tx(&pool, &account, 0, 1);
        assert!(matches!(
            pool.add(unfunded),
            Err(PoolError::Rejected(RejectReason::InsufficientEnergy))
        ));
    }

    #[test]
    fn enforces_per_account_quota() {
        let (pool, accounts) = setup(PoolConfig { limit_per_account: 2, ..Default::default() });
        pool.add(tx(&pool, &accounts[0], 0, 1)).unwrap();
        pool.add(tx(&pool, &accounts[0], 0, 2)).unwrap();
        assert!(matches!(
            pool.add(tx(&pool, &accounts[0], 0, 3)),
            Err(PoolError::Rejected(RejectReason::QuotaExceeded))
        ));
        // other origins are unaffected
        pool.add(tx(&pool, &accounts[1], 0, 1)).unwrap();
    }

    #[test]
    fn overflow_evicts_lowest_priority_newest() {
        let (pool, accounts) = setup(PoolConfig { limit: 2, ..Default::default() });
        let high = pool.add(tx(&pool, &accounts[0], 200, 1)).unwrap();
        let low_old = pool.add(tx(&pool, &accounts[1], 10, 1)).unwrap();
        let low_new = pool.add(tx(&pool, &accounts[2], 10, 1)).unwrap();

        assert_eq!(pool.len(), 2);
        assert!(pool.get(&high).is_some());
        assert!(pool.get(&low_old).is_some(), "older admission wins the tiebreak");
        assert!(pool.get(&low_new).is_none());
    }

    #[test]
    fn executables_order_by_coef_then_fifo() {
        let (pool, accounts) = setup(PoolConfig::default());
        let mid = pool.add(tx(&pool, &accounts[0], 100, 1)).unwrap();
        let top_old = pool.add(tx(&pool, &accounts[1], 255, 1)).unwrap();
        let top_new = pool.add(tx(&pool, &accounts[2], 255, 1)).unwrap();
        let bottom = pool.add(tx(&pool, &accounts[3], 0, 1)).unwrap();

        let order: Vec<TxId> = pool.executables().map(|pooled| pooled.id).collect();
        assert_eq!(order, vec![top_old, top_new, mid, bottom]);
    }

    #[test]
    fn executables_is_a_snapshot() {
        let (pool, accounts) = setup(PoolConfig::default());
        let first = pool.add(tx(&pool, &accounts[0], 0, 1)).unwrap();
        let snapshot = pool.executables();
        pool.remove(&[first]);
        pool.add(tx(&pool, &accounts[1], 0, 1)).unwrap();

        let seen: Vec<TxId> = snapshot.map(|pooled| pooled.id).collect();
        assert_eq!(seen, vec![first], "later mutations are invisible to the snapshot");
    }

    #[test]
    fn executables_skip_future_refs_and_unmet_dependencies() {
        let (pool, accounts) = setup(PoolConfig::default());

        let mut future = tx(&pool, &accounts[0], 0, 1);
        future.block_ref = alloy_primitives::B64::from([0, 0, 0, 5, 0, 0, 0, 0]);
        future.sign(&accounts[0].secret);
        pool.add(future).unwrap();

        let mut dependent = tx(&pool, &accounts[1], 0, 1);
        dependent.depends_on = Some(meridian_primitives::B256::repeat_byte(0xee));
        dependent.sign(&accounts[1].secret);
        pool.add(dependent).unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.executables().count(), 0);
    }

    #[test]
    fn evict_stale_drops_over_lifetime() {
        let (pool, accounts) =
            setup(PoolConfig { max_lifetime: Duration::ZERO, ..Default::default() });
        pool.add(tx(&pool, &accounts[0], 0, 1)).unwrap();
        pool.evict_stale();
        assert!(pool.is_empty());
    }
}
