//! Keeps the pool in sync with the canonical chain.

use crate::Pool;
use meridian_chain::Repository;
use tracing::{debug, warn};

/// Follows the repository ticker and prunes the pool after every new best
/// block: transactions now on-chain, transactions whose window closed, and
/// transactions past their residency ceiling.
///
/// Runs until the repository is dropped; spawn it as an owned task.
pub async fn maintain_pool(pool: Pool, repo: Repository) {
    let mut ticker = repo.ticker();
    let mut reader = repo.block_reader(repo.genesis_id());

    loop {
        // catch up first: blocks promoted before this task subscribed would
        // otherwise be missed
        loop {
            match reader.read() {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    for entry in batch {
                        if !entry.obsolete {
                            pool.remove(&entry.block.tx_ids());
                        }
                    }
                }
                Err(err) => {
                    warn!(target: "pool", %err, "failed to read new canonical blocks");
                    break
                }
            }
        }
        pool.evict_stale();

        if ticker.tick().await.is_err() {
            debug!(target: "pool", "repository closed, maintenance stopping");
            return
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoolConfig;
    use meridian_chain::SoloFinalizer;
    use meridian_db::MemoryStore;
    use meridian_primitives::{dev_accounts, Block, Clause, Genesis, Header, Transaction};
    use meridian_state::StateStore;
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn removes_mined_transactions() {
        let store: meridian_db::SharedStore = Arc::new(MemoryStore::new());
        let genesis = Genesis::dev();
        let state = StateStore::new(store.clone());
        state.commit_genesis(&genesis.accounts).unwrap();
        let genesis_block = genesis.build();
        let finalizer = Arc::new(SoloFinalizer::new(genesis_block.id()));
        let repo = Repository::new(store, &genesis_block, finalizer).unwrap();
        let pool = Pool::new(PoolConfig::default(), repo.clone(), state);

        let account = &dev_accounts()[0];
        let mut tx = Transaction {
            chain_tag: repo.chain_tag(),
            expiration: 100,
            clauses: vec![Clause::default()],
            gas: 60_000,
            ..Default::default()
        };
        tx.sign(&account.secret);
        pool.add(tx.clone()).unwrap();
        assert_eq!(pool.len(), 1);

        tokio::spawn(maintain_pool(pool.clone(), repo.clone()));

        // mine the transaction
        let block = Block::new(
            Header {
                parent_id: genesis_block.id(),
                timestamp: genesis_block.header.timestamp + 10,
                gas_limit: genesis_block.header.gas_limit,
                total_score: 1,
                ..Default::default()
            },
            vec![tx],
        );
        repo.add_block(&block, &[Default::default()], 0).unwrap();
        repo.set_best_block_id(block.id()).unwrap();

        for _ in 0..50 {
            if pool.is_empty() {
                return
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("mined transaction was not pruned");
    }
}
