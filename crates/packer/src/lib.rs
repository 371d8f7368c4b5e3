//! Block assembly.
//!
//! The [`Packer`] schedules block production for one proposer against the
//! authority rotation and opens a [`Flow`] per scheduled slot. The flow
//! adopts transactions one by one against a transient stager and seals a
//! block whose state commits separately, so a caller can abort between
//! assembly and persistence without orphaning state.

mod error;
mod flow;
mod runner;
mod schedule;

pub use error::{PackerError, PackerResult};
pub use flow::{Flow, Packed};
pub use runner::{ClauseContext, ClauseOutput, ClauseRevert, ClauseRunner, NativeRunner};
pub use schedule::{Scheduler, Slot};

use alloy_primitives::Address;
use meridian_chain::Repository;
use meridian_primitives::{BlockSummary, GAS_LIMIT_BOUND_DIVISOR, MIN_GAS_LIMIT};
use meridian_state::{Stager, StateStore};
use std::sync::Arc;
use tracing::debug;

/// Schedules and opens block-assembly flows for one proposer.
#[derive(Debug, Clone)]
pub struct Packer {
    repo: Repository,
    state: StateStore,
    scheduler: Scheduler,
    proposer: Address,
    beneficiary: Address,
    target_gas_limit: Option<u64>,
    runner: Arc<dyn ClauseRunner>,
}

impl Packer {
    /// Creates a packer for `proposer` over the given authority rotation.
    pub fn new(
        repo: Repository,
        state: StateStore,
        authority: Vec<Address>,
        proposer: Address,
        runner: Arc<dyn ClauseRunner>,
    ) -> Self {
        Self {
            repo,
            state,
            scheduler: Scheduler::new(authority),
            proposer,
            beneficiary: proposer,
            target_gas_limit: None,
            runner,
        }
    }

    /// Overrides the block-reward recipient, which defaults to the proposer.
    pub fn with_beneficiary(mut self, beneficiary: Address) -> Self {
        self.beneficiary = beneficiary;
        self
    }

    /// Sets the gas-limit target the packer moves toward, bounded per block
    /// by 1/1024 of the parent limit.
    pub fn with_target_gas_limit(mut self, target: u64) -> Self {
        self.target_gas_limit = Some(target);
        self
    }

    /// The proposer this packer produces for.
    pub fn proposer(&self) -> Address {
        self.proposer
    }

    /// Assigns the proposer its next slot after `parent` and opens a flow
    /// bound to that timestamp, with a fresh stager forked off the parent's
    /// state root.
    pub fn schedule(&self, parent: &BlockSummary, now: u64) -> PackerResult<Flow> {
        let slot = self.scheduler.schedule(self.proposer, parent.header.timestamp, now)?;
        let gas_limit = next_gas_limit(
            parent.header.gas_limit,
            self.target_gas_limit.unwrap_or(parent.header.gas_limit),
        );
        let parent = self.repo.block_summary(parent.id())?;
        let stager = Stager::new(self.state.clone(), parent.header.state_root);

        debug!(
            target: "packer",
            parent = %parent.id(),
            timestamp = slot.timestamp,
            weight = slot.weight,
            "scheduled flow"
        );
        Ok(Flow::new(
            self.repo.clone(),
            self.runner.clone(),
            parent.clone(),
            stager,
            slot.timestamp,
            parent.header.total_score + slot.weight,
            gas_limit,
            self.beneficiary,
            parent.header.features,
        ))
    }
}

/// Moves the parent gas limit toward `target`, changing by at most
/// 1/[`GAS_LIMIT_BOUND_DIVISOR`] of the parent limit per block and never
/// dropping below [`MIN_GAS_LIMIT`].
fn next_gas_limit(parent_limit: u64, target: u64) -> u64 {
    let bound = parent_limit / GAS_LIMIT_BOUND_DIVISOR;
    let next = if target > parent_limit {
        parent_limit + (target - parent_limit).min(bound)
    } else {
        parent_limit - (parent_limit - target).min(bound)
    };
    next.max(MIN_GAS_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B64, U256};
    use meridian_chain::SoloFinalizer;
    use meridian_db::MemoryStore;
    use meridian_primitives::{
        dev_accounts, proofs, Block, Clause, DevAccount, Genesis, Transaction,
        BLOCK_INTERVAL,
    };

    struct Harness {
        repo: Repository,
        state: StateStore,
        accounts: Vec<DevAccount>,
        genesis: Block,
    }

    fn harness() -> Harness {
        let store: meridian_db::SharedStore = Arc::new(MemoryStore::new());
        let genesis = Genesis::dev();
        let state = StateStore::new(store.clone());
        state.commit_genesis(&genesis.accounts).unwrap();
        let block = genesis.build();
        let finalizer = Arc::new(SoloFinalizer::new(block.id()));
        let repo = Repository::new(store, &block, finalizer).unwrap();
        Harness { repo, state, accounts: dev_accounts(), genesis: block }
    }

    fn packer(harness: &Harness, proposer: &DevAccount) -> Packer {
        let authority = harness.accounts.iter().map(|account| account.address).collect();
        Packer::new(
            harness.repo.clone(),
            harness.state.clone(),
            authority,
            proposer.address,
            Arc::new(NativeRunner),
        )
    }

    fn transfer(harness: &Harness, from: &DevAccount, to: Address, value: u64) -> Transaction {
        let mut tx = Transaction {
            chain_tag: harness.repo.chain_tag(),
            block_ref: B64::ZERO,
            expiration: 1000,
            clauses: vec![Clause { to: Some(to), value: U256::from(value), data: Default::default() }],
            gas: 100_000,
            ..Default::default()
        };
        tx.sign(&from.secret);
        tx
    }

    #[test]
    fn pack_commit_add_promotes_best() {
        let harness = harness();
        let proposer = harness.accounts[0].clone();
        let packer = packer(&harness, &proposer);

        let parent = harness.repo.best_block_summary();
        let mut flow = packer.schedule(&parent, 0).unwrap();
        assert!(flow.timestamp() >= parent.header.timestamp + BLOCK_INTERVAL);

        let recipient = Address::repeat_byte(0xaa);
        let tx = transfer(&harness, &harness.accounts[1], recipient, 1234);
        flow.adopt(&tx).unwrap();

        let packed = flow.pack(&proposer.secret, 0, false).unwrap();
        assert_eq!(packed.block.header.state_root, packed.stage.root());
        assert_eq!(
            packed.block.header.receipts_root,
            proofs::ordered_root(&packed.receipts)
        );
        assert_eq!(packed.block.header.signer().unwrap(), proposer.address);

        let root = packed.stage.commit().unwrap();
        harness.repo.add_block(&packed.block, &packed.receipts, packed.conflicts).unwrap();
        harness.repo.set_best_block_id(packed.block.id()).unwrap();

        assert_eq!(harness.repo.best_block_summary().id(), packed.block.id());
        let reader = Stager::new(harness.state.clone(), root);
        assert_eq!(reader.balance(recipient).unwrap(), U256::from(1234u64));
    }

    #[test]
    fn adopt_is_idempotent_per_flow() {
        let harness = harness();
        let proposer = harness.accounts[0].clone();
        let packer = packer(&harness, &proposer);
        let mut flow = packer.schedule(&harness.repo.best_block_summary(), 0).unwrap();

        let tx = transfer(&harness, &harness.accounts[1], Address::repeat_byte(1), 1);
        flow.adopt(&tx).unwrap();
        assert!(matches!(flow.adopt(&tx), Err(PackerError::KnownTransaction)));
    }

    #[test]
    fn adopt_after_pack_is_sealed() {
        let harness = harness();
        let proposer = harness.accounts[0].clone();
        let packer = packer(&harness, &proposer);
        let mut flow = packer.schedule(&harness.repo.best_block_summary(), 0).unwrap();
        flow.pack(&proposer.secret, 0, false).unwrap();

        let tx = transfer(&harness, &harness.accounts[1], Address::repeat_byte(1), 1);
        assert!(matches!(flow.adopt(&tx), Err(PackerError::Sealed)));
        assert!(matches!(
            flow.pack(&proposer.secret, 0, false),
            Err(PackerError::Sealed)
        ));
    }

    #[test]
    fn oversized_tx_hits_gas_limit_but_flow_continues() {
        let harness = harness();
        let proposer = harness.accounts[0].clone();
        let packer = packer(&harness, &proposer);
        let mut flow = packer.schedule(&harness.repo.best_block_summary(), 0).unwrap();

        let mut big = transfer(&harness, &harness.accounts[1], Address::repeat_byte(1), 1);
        big.gas = 20_000_000;
        big.sign(&harness.accounts[1].secret);
        assert!(matches!(flow.adopt(&big), Err(PackerError::GasLimitReached)));

        let small = transfer(&harness, &harness.accounts[2], Address::repeat_byte(1), 1);
        flow.adopt(&small).unwrap();
        assert_eq!(flow.len(), 1);
    }

    #[test]
    fn reverted_clause_keeps_gas_payment() {
        let harness = harness();
        let proposer = harness.accounts[0].clone();
        let packer = packer(&harness, &proposer);
        let mut flow = packer.schedule(&harness.repo.best_block_summary(), 0).unwrap();

        // the funded account cannot transfer more than its whole balance
        let payer = harness.accounts[1].clone();
        let mut tx = transfer(&harness, &payer, Address::repeat_byte(1), 1);
        tx.clauses[0].value = U256::MAX;
        tx.sign(&payer.secret);
        flow.adopt(&tx).unwrap();

        let packed = flow.pack(&proposer.secret, 0, false).unwrap();
        let receipt = &packed.receipts[0];
        assert!(receipt.reverted);
        assert!(receipt.outputs.is_empty());
        assert_eq!(receipt.gas_used, tx.gas);
        assert_eq!(receipt.gas_payer, payer.address);
        assert!(!receipt.paid.is_zero());
    }

    #[test]
    fn rejects_wrong_chain_tag_and_bad_signature() {
        let harness = harness();
        let proposer = harness.accounts[0].clone();
        let packer = packer(&harness, &proposer);
        let mut flow = packer.schedule(&harness.repo.best_block_summary(), 0).unwrap();

        let mut wrong_tag = transfer(&harness, &harness.accounts[1], Address::repeat_byte(1), 1);
        wrong_tag.chain_tag = wrong_tag.chain_tag.wrapping_add(1);
        wrong_tag.sign(&harness.accounts[1].secret);
        assert!(matches!(flow.adopt(&wrong_tag), Err(PackerError::BadTransaction(_))));

        let mut unsigned = transfer(&harness, &harness.accounts[1], Address::repeat_byte(1), 1);
        unsigned.signature = Default::default();
        assert!(matches!(flow.adopt(&unsigned), Err(PackerError::BadTransaction(_))));
    }

    #[test]
    fn skip_sign_leaves_header_unsigned() {
        let harness = harness();
        let proposer = harness.accounts[0].clone();
        let packer = packer(&harness, &proposer);
        let mut flow = packer.schedule(&harness.repo.best_block_summary(), 0).unwrap();
        let packed = flow.pack(&proposer.secret, 0, true).unwrap();
        assert!(packed.block.header.signature.is_empty());
    }

    #[test]
    fn gas_limit_moves_toward_target_bounded() {
        assert_eq!(next_gas_limit(10_240_000, 10_240_000), 10_240_000);
        // at most 1/1024 of the parent per block
        assert_eq!(next_gas_limit(10_240_000, 20_000_000), 10_250_000);
        assert_eq!(next_gas_limit(10_240_000, 10_245_000), 10_245_000);
        assert_eq!(next_gas_limit(10_240_000, 0), 10_230_000);
        // never below the floor
        assert_eq!(next_gas_limit(MIN_GAS_LIMIT, 0), MIN_GAS_LIMIT);
    }
}
