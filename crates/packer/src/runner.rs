use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use meridian_primitives::{Clause, Event, Transfer};
use meridian_state::{Stager, StateResult};

/// Execution context of one clause.
#[derive(Debug, Clone, Copy)]
pub struct ClauseContext {
    /// Transaction origin.
    pub origin: Address,
    /// Height of the block under assembly.
    pub height: u32,
    /// Timestamp of the block under assembly.
    pub timestamp: u64,
    /// Index of the clause within its transaction.
    pub index: u32,
}

/// Successful clause result.
#[derive(Debug, Clone, Default)]
pub struct ClauseOutput {
    /// Return data; the created contract address for creation clauses.
    pub data: Bytes,
    /// Emitted events.
    pub events: Vec<Event>,
    /// Recorded transfers.
    pub transfers: Vec<Transfer>,
    /// Gas consumed beyond the intrinsic charge.
    pub gas_used: u64,
}

/// Why a clause reverted. A revert rolls back every clause effect of the
/// transaction; the prepaid gas stays spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClauseRevert {
    /// The origin's balance does not cover the transferred value.
    #[error("insufficient balance")]
    InsufficientBalance,
}

/// The clause execution capability.
///
/// The VM proper sits behind this seam; the flow and the call-simulation
/// endpoint drive whatever implementation the node was built with.
pub trait ClauseRunner: Send + Sync + std::fmt::Debug {
    /// Runs one clause against the stager. The outer error is a fatal state
    /// failure, the inner one a clause revert.
    fn run(
        &self,
        stager: &mut Stager,
        clause: &Clause,
        ctx: &ClauseContext,
    ) -> StateResult<Result<ClauseOutput, ClauseRevert>>;
}

/// The native runner: balance transfers, code installation for creation
/// clauses, and nothing else. Contract bytecode is installed verbatim and
/// never interpreted.
#[derive(Debug, Clone, Default)]
pub struct NativeRunner;

impl NativeRunner {
    /// Derives the address of a contract created by `ctx.origin` in this
    /// block.
    fn created_address(ctx: &ClauseContext) -> Address {
        let mut buf = [0u8; 28];
        buf[..20].copy_from_slice(ctx.origin.as_slice());
        buf[20..24].copy_from_slice(&ctx.height.to_be_bytes());
        buf[24..].copy_from_slice(&ctx.index.to_be_bytes());
        Address::from_slice(&keccak256(buf)[12..])
    }
}

impl ClauseRunner for NativeRunner {
    fn run(
        &self,
        stager: &mut Stager,
        clause: &Clause,
        ctx: &ClauseContext,
    ) -> StateResult<Result<ClauseOutput, ClauseRevert>> {
        let mut output = ClauseOutput::default();

        let recipient = match clause.to {
            Some(to) => to,
            None => {
                let created = Self::created_address(ctx);
                stager.set_code(created, clause.data.clone(), ctx.timestamp)?;
                output.data = Bytes::copy_from_slice(created.as_slice());
                created
            }
        };

        if !clause.value.is_zero() {
            let from_balance = stager.balance(ctx.origin)?;
            if from_balance < clause.value {
                return Ok(Err(ClauseRevert::InsufficientBalance))
            }
            stager.set_balance(ctx.origin, from_balance - clause.value, ctx.timestamp)?;
            let to_balance = stager.balance(recipient)?;
            stager.set_balance(recipient, to_balance + clause.value, ctx.timestamp)?;
            output.transfers.push(Transfer {
                sender: ctx.origin,
                recipient,
                amount: clause.value,
            });
        }

        if clause.to.is_none() {
            output.events.push(Event {
                address: recipient,
                topics: vec![B256::from(U256::from(ctx.index))],
                data: Bytes::new(),
            });
        }

        Ok(Ok(output))
    }
}
