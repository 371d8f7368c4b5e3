//! Block reads: collapsed summaries and expanded bodies.

use crate::{accounts::summary_for, ApiContext, ApiResult};
use alloy_primitives::{Address, Bytes, B256, U256};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use meridian_chain::ChainResult;
use meridian_primitives::{BlockId, BlockSummary, Receipt, Transaction, TxId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BlockQuery {
    expanded: Option<String>,
}

/// The summary part shared by collapsed and expanded responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BlockSummaryJson {
    number: u32,
    id: BlockId,
    size: u64,
    parent_id: BlockId,
    timestamp: u64,
    gas_limit: u64,
    beneficiary: Address,
    gas_used: u64,
    total_score: u64,
    txs_root: B256,
    txs_features: u32,
    state_root: B256,
    receipts_root: B256,
    signer: Address,
    is_trunk: bool,
    is_finalized: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct CollapsedBlockJson {
    #[serde(flatten)]
    summary: BlockSummaryJson,
    transactions: Vec<TxId>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExpandedBlockJson {
    #[serde(flatten)]
    summary: BlockSummaryJson,
    transactions: Vec<EmbeddedTxJson>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EmbeddedTxJson {
    id: TxId,
    chain_tag: u8,
    block_ref: String,
    expiration: u32,
    clauses: Vec<ClauseJson>,
    gas_price_coef: u8,
    gas: u64,
    origin: Address,
    nonce: u64,
    depends_on: Option<TxId>,
    size: u64,
    // receipt fields, in block order
    gas_used: u64,
    gas_payer: Address,
    paid: U256,
    reward: U256,
    reverted: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ClauseJson {
    to: Option<Address>,
    value: U256,
    data: Bytes,
}

fn build_summary_json(
    ctx: &ApiContext,
    summary: &BlockSummary,
) -> ChainResult<BlockSummaryJson> {
    let id = summary.id();
    let chain = ctx.repo.best_chain();
    let is_trunk = chain.contains(id);
    let is_finalized = is_trunk &&
        ctx.repo.finalizer().finalized().number() >= summary.number();

    Ok(BlockSummaryJson {
        number: summary.number(),
        id,
        size: summary.size,
        parent_id: summary.header.parent_id,
        timestamp: summary.header.timestamp,
        gas_limit: summary.header.gas_limit,
        beneficiary: summary.header.beneficiary,
        gas_used: summary.header.gas_used,
        total_score: summary.header.total_score,
        txs_root: summary.header.txs_root,
        txs_features: summary.header.features,
        state_root: summary.header.state_root,
        receipts_root: summary.header.receipts_root,
        signer: summary.header.signer().unwrap_or_default(),
        is_trunk,
        is_finalized,
    })
}

fn embed_txs(txs: Vec<Transaction>, receipts: Vec<Receipt>) -> Vec<EmbeddedTxJson> {
    txs.into_iter()
        .zip(receipts)
        .map(|(tx, receipt)| EmbeddedTxJson {
            id: tx.id(),
            chain_tag: tx.chain_tag,
            block_ref: format!("0x{}", alloy_primitives::hex::encode(tx.block_ref)),
            expiration: tx.expiration,
            clauses: tx
                .clauses
                .iter()
                .map(|clause| ClauseJson {
                    to: clause.to,
                    value: clause.value,
                    data: clause.data.clone(),
                })
                .collect(),
            gas_price_coef: tx.gas_price_coef,
            gas: tx.gas,
            origin: tx.origin().unwrap_or_default(),
            nonce: tx.nonce,
            depends_on: tx.depends_on,
            size: tx.size() as u64,
            gas_used: receipt.gas_used,
            gas_payer: receipt.gas_payer,
            paid: receipt.paid,
            reward: receipt.reward,
            reverted: receipt.reverted,
        })
        .collect()
}

/// `GET /blocks/{revision}?expanded={true|false}`.
///
/// Unknown revisions answer a JSON `null`; malformed ones are a 400.
pub(crate) async fn get_block(
    State(ctx): State<ApiContext>,
    Path(revision): Path<String>,
    Query(query): Query<BlockQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let expanded = match query.expanded.as_deref() {
        None | Some("") | Some("false") => false,
        Some("true") => true,
        Some(_) => {
            return Err(crate::ApiError::BadRequest("expanded: should be boolean".into()))
        }
    };

    let summary = match summary_for(&ctx, Some(revision.as_str()), false) {
        Ok(summary) => summary,
        // unknown revision reads as an absent block
        Err(crate::ApiError::BadRequest(message)) if message.ends_with(": not found") => {
            return Ok(Json(serde_json::Value::Null))
        }
        Err(err) => return Err(err),
    };

    let summary_json = build_summary_json(&ctx, &summary)?;
    let value = if expanded {
        let id = summary.id();
        let txs = ctx.repo.block_transactions(id)?;
        let receipts = ctx.repo.block_receipts(id)?;
        serde_json::to_value(ExpandedBlockJson {
            summary: summary_json,
            transactions: embed_txs(txs, receipts),
        })
    } else {
        serde_json::to_value(CollapsedBlockJson {
            summary: summary_json,
            transactions: summary.txs.clone(),
        })
    }
    .map_err(|err| crate::ApiError::Internal(err.to_string()))?;

    Ok(Json(value))
}
