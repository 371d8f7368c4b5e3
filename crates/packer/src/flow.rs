use crate::{ClauseContext, ClauseRunner, PackerError, PackerResult};
use alloy_primitives::{Address, U256};
use meridian_chain::Repository;
use meridian_primitives::{
    gas_price, proofs, Block, BlockSummary, Header, Output, Receipt, Transaction, TxId,
    INITIAL_BASE_GAS_PRICE,
};
use meridian_state::{Stage, Stager, StateError};
use secp256k1::SecretKey;
use std::{collections::HashSet, sync::Arc};
use tracing::trace;

/// Share of the gas payment credited to the block beneficiary, in percent.
const REWARD_RATIO_PERCENT: u64 = 30;

/// An in-progress block-assembly session owned by one proposer.
///
/// State machine: open while transactions are adopted, sealed once packed.
/// Adoption never suspends; every side effect goes through the flow's own
/// stager, which forked off the parent's state root.
#[derive(Debug)]
pub struct Flow {
    repo: Repository,
    runner: Arc<dyn ClauseRunner>,
    parent: Arc<BlockSummary>,
    timestamp: u64,
    score: u64,
    gas_limit: u64,
    beneficiary: Address,
    features: u32,
    /// Taken on pack; `None` marks the sealed state.
    stager: Option<Stager>,
    gas_used: u64,
    txs: Vec<Transaction>,
    receipts: Vec<Receipt>,
    adopted: HashSet<TxId>,
}

/// Everything a successful pack produces. The caller commits the stage,
/// adds the block, then promotes it:
/// `stage.commit()` → `repo.add_block(&block, &receipts, conflicts)` →
/// `repo.set_best_block_id(block.id())`. The split lets a caller abort
/// between assembly and persistence without leaving orphan state.
#[derive(Debug)]
pub struct Packed {
    /// The sealed block.
    pub block: Block,
    /// Handle materializing the state changes on commit.
    pub stage: Stage,
    /// Receipts in block order.
    pub receipts: Vec<Receipt>,
    /// Conflict tag to record with the block.
    pub conflicts: u32,
}

impl Flow {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        repo: Repository,
        runner: Arc<dyn ClauseRunner>,
        parent: Arc<BlockSummary>,
        stager: Stager,
        timestamp: u64,
        score: u64,
        gas_limit: u64,
        beneficiary: Address,
        features: u32,
    ) -> Self {
        Self {
            repo,
            runner,
            parent,
            timestamp,
            score,
            gas_limit,
            beneficiary,
            features,
            stager: Some(stager),
            gas_used: 0,
            txs: Vec::new(),
            receipts: Vec::new(),
            adopted: HashSet::new(),
        }
    }

    /// The parent this flow builds on.
    pub fn parent(&self) -> &BlockSummary {
        &self.parent
    }

    /// Target timestamp of the block under assembly.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Height of the block under assembly.
    pub fn number(&self) -> u32 {
        self.parent.number().wrapping_add(1)
    }

    /// Gas adopted so far.
    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    /// Number of adopted transactions.
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Returns whether no transaction has been adopted yet.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Validates and executes one transaction, appending its receipt.
    ///
    /// A failed adoption leaves the flow exactly as it was: the stager is
    /// rolled back to the pre-adoption checkpoint. [`PackerError::GasLimitReached`]
    /// rejects only this transaction; the flow keeps accepting smaller ones.
    pub fn adopt(&mut self, tx: &Transaction) -> PackerResult<()> {
        let number = self.parent.number().wrapping_add(1);
        let chain_tag = self.repo.chain_tag();
        if self.stager.is_none() {
            return Err(PackerError::Sealed)
        }

        if tx.chain_tag != chain_tag {
            return Err(PackerError::BadTransaction("chain tag mismatch"))
        }
        if tx.expired_at(number) {
            return Err(PackerError::BadTransaction("expired"))
        }
        if !tx.executable_at(number) {
            return Err(PackerError::BadTransaction("block ref in the future"))
        }
        let origin =
            tx.origin().map_err(|_| PackerError::BadTransaction("bad signature"))?;
        let payer =
            tx.gas_payer().map_err(|_| PackerError::BadTransaction("bad signature"))?;
        if tx.gas < tx.intrinsic_gas() {
            return Err(PackerError::BadTransaction("intrinsic gas exceeds provided gas"))
        }
        if let Some(dep) = tx.depends_on {
            if !self.repo.has_succeeded_tx(dep, self.parent.number())? {
                return Err(PackerError::BadTransaction("dependency not satisfied"))
            }
        }

        let id = tx.id();
        if self.adopted.contains(&id) {
            return Err(PackerError::KnownTransaction)
        }
        if self.gas_used + tx.gas > self.gas_limit {
            return Err(PackerError::GasLimitReached)
        }

        let timestamp = self.timestamp;
        let stager = self.stager.as_mut().expect("checked open above");
        let checkpoint = stager.checkpoint();

        // prepaid gas, kept even if the clauses revert
        let price = gas_price(INITIAL_BASE_GAS_PRICE, tx.gas_price_coef);
        let prepaid = U256::from(price) * U256::from(tx.gas);
        match stager.sub_energy_for_gas(payer, prepaid, timestamp) {
            Ok(()) => {}
            Err(StateError::InsufficientEnergy) => {
                stager.revert_to(checkpoint);
                return Err(PackerError::InsufficientEnergy)
            }
            Err(err) => return Err(err.into()),
        }

        let clause_checkpoint = stager.checkpoint();
        let mut outputs = Vec::with_capacity(tx.clauses.len());
        let mut extra_gas = 0u64;
        let mut reverted = false;
        for (index, clause) in tx.clauses.iter().enumerate() {
            let ctx = ClauseContext { origin, height: number, timestamp, index: index as u32 };
            match self.runner.run(stager, clause, &ctx)? {
                Ok(output) => {
                    extra_gas += output.gas_used;
                    outputs.push(Output { events: output.events, transfers: output.transfers });
                }
                Err(revert) => {
                    trace!(target: "packer", %id, clause = index, %revert, "clause reverted");
                    stager.revert_to(clause_checkpoint);
                    outputs.clear();
                    reverted = true;
                    break
                }
            }
        }

        // a reverted transaction consumes all provided gas; a successful one
        // is refunded the unused remainder
        let tx_gas_used =
            if reverted { tx.gas } else { (tx.intrinsic_gas() + extra_gas).min(tx.gas) };
        let paid = U256::from(price) * U256::from(tx_gas_used);
        if prepaid > paid {
            let current = stager.energy(payer, timestamp)?;
            stager.set_energy(payer, current + (prepaid - paid), timestamp)?;
        }
        let reward = paid * U256::from(REWARD_RATIO_PERCENT) / U256::from(100u64);
        if !reward.is_zero() {
            let current = stager.energy(self.beneficiary, timestamp)?;
            stager.set_energy(self.beneficiary, current + reward, timestamp)?;
        }

        self.receipts.push(Receipt {
            gas_used: tx_gas_used,
            gas_payer: payer,
            paid,
            reward,
            reverted,
            outputs,
        });
        self.txs.push(tx.clone());
        self.adopted.insert(id);
        self.gas_used += tx_gas_used;
        trace!(target: "packer", %id, gas = tx_gas_used, reverted, "adopted transaction");
        Ok(())
    }

    /// Seals the flow into a block.
    ///
    /// The state root in the header is a preview; nothing is persisted until
    /// the returned stage commits. Packing twice fails with
    /// [`PackerError::Sealed`].
    pub fn pack(
        &mut self,
        secret: &SecretKey,
        conflicts: u32,
        skip_sign: bool,
    ) -> PackerResult<Packed> {
        let stager = self.stager.take().ok_or(PackerError::Sealed)?;
        let stage = stager.stage()?;

        let mut header = Header {
            parent_id: self.parent.id(),
            timestamp: self.timestamp,
            gas_limit: self.gas_limit,
            beneficiary: self.beneficiary,
            gas_used: self.gas_used,
            total_score: self.score,
            txs_root: proofs::ordered_root(&self.txs),
            state_root: stage.root(),
            receipts_root: proofs::ordered_root(&self.receipts),
            features: self.features,
            ..Default::default()
        };
        if !skip_sign {
            header.sign(secret);
        }

        Ok(Packed {
            block: Block::new(header, std::mem::take(&mut self.txs)),
            stage,
            receipts: std::mem::take(&mut self.receipts),
            conflicts,
        })
    }
}
