use crate::{BestChain, BlockReader, ChainError, ChainResult, Finalizer, Ticker};
use alloy_rlp::Decodable;
use meridian_db::{Batch, SharedStore};
use meridian_primitives::{Block, BlockId, BlockSummary, Receipt, Transaction, TxId};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::watch;
use tracing::{debug, info};

const BEST_KEY: &[u8] = b"chain/best";

fn summary_key(id: BlockId) -> Vec<u8> {
    [b"chain/s/".as_slice(), id.as_slice()].concat()
}

fn body_key(id: BlockId) -> Vec<u8> {
    [b"chain/b/".as_slice(), id.as_slice()].concat()
}

fn receipts_key(id: BlockId) -> Vec<u8> {
    [b"chain/r/".as_slice(), id.as_slice()].concat()
}

fn canonical_key(number: u32) -> Vec<u8> {
    [b"chain/n/".as_slice(), &number.to_be_bytes()].concat()
}

/// In-memory indices derived from the stored summaries.
#[derive(Debug)]
struct Indices {
    /// Every stored summary by identifier, forks included.
    summaries: HashMap<BlockId, Arc<BlockSummary>>,
    /// Parent to children, for descendant enumeration.
    children: HashMap<BlockId, Vec<BlockId>>,
    /// Transaction id to the blocks containing it and the index within.
    tx_meta: HashMap<TxId, Vec<(BlockId, u32)>>,
    /// The canonical height index; swapped wholesale on reorg so
    /// [`BestChain`] handles stay internally consistent.
    canonical: Arc<BTreeMap<u32, BlockId>>,
    /// Identifier of the current best block.
    best: BlockId,
}

impl Indices {
    fn summary(&self, id: BlockId) -> ChainResult<Arc<BlockSummary>> {
        self.summaries.get(&id).cloned().ok_or(ChainError::NotFound)
    }

    /// Walks `id`'s ancestry down to the given height.
    fn ancestor_at(&self, id: BlockId, number: u32) -> ChainResult<BlockId> {
        let mut cursor = id;
        while cursor.number() > number {
            cursor = self
                .summaries
                .get(&cursor)
                .ok_or(ChainError::Corrupt)?
                .header
                .parent_id;
        }
        Ok(cursor)
    }

    /// Lowest common ancestor of two stored blocks.
    fn lowest_common_ancestor(&self, a: BlockId, b: BlockId) -> ChainResult<BlockId> {
        let common = a.number().min(b.number());
        let mut a = self.ancestor_at(a, common)?;
        let mut b = self.ancestor_at(b, common)?;
        while a != b {
            a = self.summaries.get(&a).ok_or(ChainError::Corrupt)?.header.parent_id;
            b = self.summaries.get(&b).ok_or(ChainError::Corrupt)?.header.parent_id;
        }
        Ok(a)
    }

    fn index_summary(&mut self, summary: Arc<BlockSummary>) {
        let id = summary.id();
        self.children.entry(summary.header.parent_id).or_default().push(id);
        for (index, tx_id) in summary.txs.iter().enumerate() {
            self.tx_meta.entry(*tx_id).or_default().push((id, index as u32));
        }
        self.summaries.insert(id, summary);
    }
}

#[derive(Debug)]
struct Inner {
    store: SharedStore,
    finalizer: Arc<dyn Finalizer>,
    genesis: Arc<BlockSummary>,
    indices: RwLock<Indices>,
    tick: watch::Sender<u64>,
}

/// The persistent index of blocks, receipts and the canonical chain.
///
/// Writes hold one exclusive lock spanning persist, index update and ticker
/// fire; reads take shared locks or snapshots. Summaries are never deleted,
/// so forks stay addressable by identifier.
#[derive(Debug, Clone)]
pub struct Repository {
    inner: Arc<Inner>,
}

impl Repository {
    /// Opens the repository over the shared store, seeding it with the
    /// genesis block on first use.
    pub fn new(
        store: SharedStore,
        genesis: &Block,
        finalizer: Arc<dyn Finalizer>,
    ) -> ChainResult<Self> {
        let genesis_summary = Arc::new(genesis.summarize(0));
        let (tick, _) = watch::channel(0u64);

        let mut indices = Indices {
            summaries: HashMap::new(),
            children: HashMap::new(),
            tx_meta: HashMap::new(),
            canonical: Arc::new(BTreeMap::new()),
            best: genesis_summary.id(),
        };

        if let Some(best_raw) = store.get(BEST_KEY)? {
            // existing chain: rebuild every index from the stored summaries
            let best = decode_id(&best_raw)?;
            for (_, raw) in store.scan_prefix(b"chain/s/")? {
                let summary = BlockSummary::decode(&mut raw.as_slice())
                    .map_err(|_| ChainError::Corrupt)?;
                indices.index_summary(Arc::new(summary));
            }
            if !indices.summaries.contains_key(&genesis_summary.id()) {
                return Err(ChainError::Corrupt)
            }
            let mut canonical = BTreeMap::new();
            let mut cursor = best;
            loop {
                canonical.insert(cursor.number(), cursor);
                if cursor.number() == 0 {
                    break
                }
                cursor = indices.summary(cursor)?.header.parent_id;
            }
            indices.canonical = Arc::new(canonical);
            indices.best = best;
            info!(target: "chain", %best, blocks = indices.summaries.len(), "reopened repository");
        } else {
            let mut batch = Batch::new();
            batch.put(summary_key(genesis_summary.id()), alloy_rlp::encode(&*genesis_summary));
            batch.put(body_key(genesis_summary.id()), alloy_rlp::encode(genesis));
            batch.put(receipts_key(genesis_summary.id()), alloy_rlp::encode(Vec::<Receipt>::new()));
            batch.put(canonical_key(0), genesis_summary.id().to_vec());
            batch.put(BEST_KEY, genesis_summary.id().to_vec());
            store.write(batch)?;

            indices.index_summary(genesis_summary.clone());
            indices.canonical = Arc::new(BTreeMap::from([(0, genesis_summary.id())]));
            info!(target: "chain", genesis = %genesis_summary.id(), "initialized repository");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                finalizer,
                genesis: genesis_summary,
                indices: RwLock::new(indices),
                tick,
            }),
        })
    }

    /// The genesis block identifier.
    pub fn genesis_id(&self) -> BlockId {
        self.inner.genesis.id()
    }

    /// The chain tag: the low byte of the genesis identifier. Transactions
    /// carry it to bind themselves to this chain.
    pub fn chain_tag(&self) -> u8 {
        self.genesis_id().low_byte()
    }

    /// The finalizer this repository consults.
    pub fn finalizer(&self) -> &Arc<dyn Finalizer> {
        &self.inner.finalizer
    }

    /// Persists a block with its receipts and summary.
    ///
    /// `conflicts` is an opaque tag recorded on the summary for observers.
    /// Re-adding an identical block is a silent no-op; a same-id block with
    /// different content fails with [`ChainError::AlreadyExists`], an unknown
    /// parent with [`ChainError::OrphanBlock`]. The block does not become
    /// canonical here; see [`Repository::set_best_block_id`].
    pub fn add_block(
        &self,
        block: &Block,
        receipts: &[Receipt],
        conflicts: u32,
    ) -> ChainResult<()> {
        let summary = Arc::new(block.summarize(conflicts));
        let id = summary.id();

        let mut indices = self.inner.indices.write();
        if let Some(existing) = indices.summaries.get(&id) {
            return if **existing == *summary { Ok(()) } else { Err(ChainError::AlreadyExists) }
        }
        if !indices.summaries.contains_key(&summary.header.parent_id) {
            return Err(ChainError::OrphanBlock)
        }

        let mut batch = Batch::new();
        batch.put(body_key(id), alloy_rlp::encode(block));
        batch.put(receipts_key(id), alloy_rlp::encode(receipts.to_vec()));
        batch.put(summary_key(id), alloy_rlp::encode(&*summary));
        self.inner.store.write(batch)?;

        indices.index_summary(summary);
        counter!("chain_blocks_added_total").increment(1);
        debug!(target: "chain", %id, number = id.number(), txs = block.transactions.len(), "added block");
        Ok(())
    }

    /// Promotes `id`'s ancestry to canonical and signals every ticker.
    ///
    /// Rewrites the height index from the fork point, sequencing the best
    /// pointer last so a crash mid-reorg leaves the old best active with all
    /// constituent blocks visible.
    pub fn set_best_block_id(&self, id: BlockId) -> ChainResult<()> {
        let mut indices = self.inner.indices.write();
        if !indices.summaries.contains_key(&id) {
            return Err(ChainError::UnknownBlock)
        }

        let finalized = self.inner.finalizer.finalized();
        if id.number() < finalized.number() ||
            indices.ancestor_at(id, finalized.number())? != finalized
        {
            return Err(ChainError::NotADescendant)
        }

        let old_best = indices.best;
        let fork = indices.lowest_common_ancestor(old_best, id)?;
        if fork.number() < finalized.number() {
            return Err(ChainError::FinalityViolated)
        }

        // retire (fork, old_best], promote (fork, id] in height order
        let mut canonical = (*indices.canonical).clone();
        let retired: Vec<u32> =
            canonical.range(fork.number() + 1..).map(|(number, _)| *number).collect();
        for number in retired {
            canonical.remove(&number);
        }

        let mut promoted = Vec::new();
        let mut cursor = id;
        while cursor != fork {
            promoted.push((cursor.number(), cursor));
            cursor = indices.summary(cursor)?.header.parent_id;
        }

        let mut batch = Batch::new();
        for (number, block_id) in promoted.iter().rev() {
            canonical.insert(*number, *block_id);
            batch.put(canonical_key(*number), block_id.to_vec());
        }
        // the head pointer is sequenced last
        batch.put(BEST_KEY, id.to_vec());
        self.inner.store.write(batch)?;

        indices.canonical = Arc::new(canonical);
        indices.best = id;
        drop(indices);

        gauge!("chain_best_block_number").set(id.number() as f64);
        info!(target: "chain", best = %id, number = id.number(), fork = fork.number(), "new best block");
        self.inner.tick.send_modify(|epoch| *epoch += 1);
        Ok(())
    }

    /// Summary of a stored block.
    pub fn block_summary(&self, id: BlockId) -> ChainResult<Arc<BlockSummary>> {
        self.inner.indices.read().summary(id)
    }

    /// Full body of a stored block.
    pub fn block(&self, id: BlockId) -> ChainResult<Block> {
        let raw = self.inner.store.get(&body_key(id))?.ok_or(ChainError::NotFound)?;
        Block::decode(&mut raw.as_slice()).map_err(|_| ChainError::Corrupt)
    }

    /// Transactions of a stored block, in block order.
    pub fn block_transactions(&self, id: BlockId) -> ChainResult<Vec<Transaction>> {
        Ok(self.block(id)?.transactions)
    }

    /// Receipts of a stored block, in block order.
    pub fn block_receipts(&self, id: BlockId) -> ChainResult<Vec<Receipt>> {
        let raw = self.inner.store.get(&receipts_key(id))?.ok_or(ChainError::NotFound)?;
        Vec::<Receipt>::decode(&mut raw.as_slice()).map_err(|_| ChainError::Corrupt)
    }

    /// Summary of the current best block.
    pub fn best_block_summary(&self) -> Arc<BlockSummary> {
        let indices = self.inner.indices.read();
        indices.summaries.get(&indices.best).expect("best block is stored").clone()
    }

    /// A cheap internally-consistent snapshot of the canonical chain.
    ///
    /// The handle does not track writes made after its creation; re-fetch it
    /// across suspend points when strict consistency is required.
    pub fn best_chain(&self) -> BestChain {
        let indices = self.inner.indices.read();
        BestChain::new(indices.canonical.clone(), indices.best)
    }

    /// A forward cursor over the canonical chain strictly after `start`.
    pub fn block_reader(&self, start: BlockId) -> BlockReader {
        BlockReader::new(self.clone(), start)
    }

    /// An edge-triggered signal fired after every successful
    /// [`Repository::set_best_block_id`]. Tickers are independent of each
    /// other.
    pub fn ticker(&self) -> Ticker {
        Ticker::new(self.inner.tick.subscribe())
    }

    /// Locates a transaction on the canonical chain at or below the given
    /// height.
    pub fn find_canonical_tx(
        &self,
        tx_id: TxId,
        max_number: u32,
    ) -> Option<(BlockId, u32)> {
        let indices = self.inner.indices.read();
        let metas = indices.tx_meta.get(&tx_id)?;
        metas.iter().copied().find(|(block_id, _)| {
            block_id.number() <= max_number &&
                indices.canonical.get(&block_id.number()) == Some(block_id)
        })
    }

    /// Returns whether `tx_id` has a succeeded receipt on the canonical chain
    /// at or below `max_number`; the dependency rule of `depends_on`.
    pub fn has_succeeded_tx(&self, tx_id: TxId, max_number: u32) -> ChainResult<bool> {
        let Some((block_id, index)) = self.find_canonical_tx(tx_id, max_number) else {
            return Ok(false)
        };
        let receipts = self.block_receipts(block_id)?;
        Ok(receipts.get(index as usize).map(|receipt| !receipt.reverted).unwrap_or(false))
    }
}

fn decode_id(raw: &[u8]) -> ChainResult<BlockId> {
    if raw.len() != 32 {
        return Err(ChainError::Corrupt)
    }
    Ok(BlockId(alloy_primitives::B256::from_slice(raw)))
}
