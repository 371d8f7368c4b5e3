//! Account state reads and call simulation.

use crate::{resolve_summary, ApiContext, ApiError, ApiResult, Revision};
use alloy_primitives::{Address, Bytes, B256, U256};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use meridian_packer::ClauseContext;
use meridian_primitives::{BlockSummary, Clause};
use meridian_state::Stager;
use serde::{Deserialize, Serialize};

/// Query string carrying the revision token.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RevisionQuery {
    revision: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountResponse {
    balance: U256,
    energy: U256,
    has_code: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct CodeResponse {
    code: Bytes,
}

#[derive(Debug, Serialize)]
pub(crate) struct StorageResponse {
    value: B256,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CallData {
    value: Option<U256>,
    data: Option<Bytes>,
    gas: Option<u64>,
    gas_price: Option<String>,
    proved_work: Option<String>,
    caller: Option<Address>,
    gas_payer: Option<Address>,
    expiration: Option<u32>,
    block_ref: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct BatchCallData {
    clauses: Vec<ClauseData>,
    gas: Option<u64>,
    gas_price: Option<String>,
    proved_work: Option<String>,
    caller: Option<Address>,
    gas_payer: Option<Address>,
    expiration: Option<u32>,
    block_ref: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ClauseData {
    to: Option<Address>,
    value: Option<U256>,
    data: Option<Bytes>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CallResult {
    data: Bytes,
    events: Vec<EventJson>,
    transfers: Vec<TransferJson>,
    gas_used: u64,
    reverted: bool,
    vm_error: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct EventJson {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
}

#[derive(Debug, Serialize)]
pub(crate) struct TransferJson {
    sender: Address,
    recipient: Address,
    amount: U256,
}

fn parse_address(raw: &str) -> ApiResult<Address> {
    raw.parse().map_err(|err| ApiError::bad_request("address", err))
}

fn parse_storage_key(raw: &str) -> ApiResult<B256> {
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    if hex.len() != 64 {
        return Err(ApiError::BadRequest("key: invalid length".into()))
    }
    raw.parse().map_err(|err| ApiError::bad_request("key", err))
}

/// Resolves the revision query, translating misses into 400 the way every
/// revision-taking endpoint does.
pub(crate) fn summary_for(
    ctx: &ApiContext,
    revision: Option<&str>,
    allow_next: bool,
) -> ApiResult<BlockSummary> {
    let revision = Revision::parse(revision, allow_next)
        .map_err(|err| ApiError::bad_request("revision", err))?;
    resolve_summary(&ctx.repo, revision).map_err(|err| {
        if err.is_not_found() {
            ApiError::bad_request("revision", err)
        } else {
            err.into()
        }
    })
}

pub(crate) async fn get_account(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
    Query(query): Query<RevisionQuery>,
) -> ApiResult<Json<AccountResponse>> {
    let address = parse_address(&address)?;
    let summary = summary_for(&ctx, query.revision.as_deref(), false)?;
    let stager = Stager::new(ctx.state.clone(), summary.header.state_root);

    Ok(Json(AccountResponse {
        balance: stager.balance(address)?,
        energy: stager.energy(address, summary.header.timestamp)?,
        has_code: stager.code(address)?.is_some(),
    }))
}

pub(crate) async fn get_code(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
    Query(query): Query<RevisionQuery>,
) -> ApiResult<Json<CodeResponse>> {
    let address = parse_address(&address)?;
    let summary = summary_for(&ctx, query.revision.as_deref(), false)?;
    let stager = Stager::new(ctx.state.clone(), summary.header.state_root);

    Ok(Json(CodeResponse { code: stager.code(address)?.unwrap_or_default() }))
}

pub(crate) async fn get_storage(
    State(ctx): State<ApiContext>,
    Path((address, key)): Path<(String, String)>,
    Query(query): Query<RevisionQuery>,
) -> ApiResult<Json<StorageResponse>> {
    let address = parse_address(&address)?;
    let key = parse_storage_key(&key)?;
    let summary = summary_for(&ctx, query.revision.as_deref(), false)?;
    let stager = Stager::new(ctx.state.clone(), summary.header.state_root);

    Ok(Json(StorageResponse { value: stager.storage(address, key)? }))
}

/// `POST /accounts` — simulate a contract-creation clause.
pub(crate) async fn call_create(
    State(ctx): State<ApiContext>,
    Query(query): Query<RevisionQuery>,
    Json(body): Json<CallData>,
) -> ApiResult<Json<CallResult>> {
    call_single(ctx, None, query, body)
}

/// `POST /accounts/{addr}` — simulate a call clause against `addr`, or a
/// batch when the path segment is the `*` wildcard.
pub(crate) async fn call_contract(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
    Query(query): Query<RevisionQuery>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<axum::response::Response> {
    use axum::response::IntoResponse;

    if address == "*" {
        let body: BatchCallData = serde_json::from_value(body)
            .map_err(|err| ApiError::bad_request("body", err))?;
        let results = call_batch(ctx, query, body)?;
        return Ok(Json(results).into_response())
    }

    let address = parse_address(&address)?;
    let body: CallData =
        serde_json::from_value(body).map_err(|err| ApiError::bad_request("body", err))?;
    let result = call_single(ctx, Some(address), query, body)?;
    Ok(result.into_response())
}

fn call_single(
    ctx: ApiContext,
    to: Option<Address>,
    query: RevisionQuery,
    body: CallData,
) -> ApiResult<Json<CallResult>> {
    validate_call_options(
        &ctx,
        body.gas,
        body.gas_price.as_deref(),
        body.proved_work.as_deref(),
        body.block_ref.as_deref(),
        body.expiration,
    )?;
    let summary = summary_for(&ctx, query.revision.as_deref(), true)?;
    let clause = Clause {
        to,
        value: body.value.unwrap_or_default(),
        data: body.data.unwrap_or_default(),
    };
    let caller = body.caller.unwrap_or_default();
    let _ = body.gas_payer;

    let mut results = run_clauses(&ctx, &summary, caller, &[clause])?;
    Ok(Json(results.remove(0)))
}

fn call_batch(
    ctx: ApiContext,
    query: RevisionQuery,
    body: BatchCallData,
) -> ApiResult<Vec<CallResult>> {
    validate_call_options(
        &ctx,
        body.gas,
        body.gas_price.as_deref(),
        body.proved_work.as_deref(),
        body.block_ref.as_deref(),
        body.expiration,
    )?;
    let summary = summary_for(&ctx, query.revision.as_deref(), true)?;
    let clauses: Vec<Clause> = body
        .clauses
        .into_iter()
        .map(|clause| Clause {
            to: clause.to,
            value: clause.value.unwrap_or_default(),
            data: clause.data.unwrap_or_default(),
        })
        .collect();
    let caller = body.caller.unwrap_or_default();
    let _ = body.gas_payer;

    run_clauses(&ctx, &summary, caller, &clauses)
}

fn validate_call_options(
    ctx: &ApiContext,
    gas: Option<u64>,
    gas_price: Option<&str>,
    proved_work: Option<&str>,
    block_ref: Option<&str>,
    _expiration: Option<u32>,
) -> ApiResult<()> {
    if let Some(gas) = gas {
        if gas > ctx.call_gas_limit {
            return Err(ApiError::Forbidden(format!(
                "gas: exceeds limit {}",
                ctx.call_gas_limit
            )))
        }
    }
    if let Some(price) = gas_price {
        match price.strip_prefix("0x") {
            Some(hex) => u128::from_str_radix(hex, 16),
            None => price.parse::<u128>(),
        }
        .map_err(|err| ApiError::bad_request("gasPrice", err))?;
    }
    if let Some(work) = proved_work {
        work.parse::<u64>().map_err(|err| ApiError::bad_request("provedWork", err))?;
    }
    if let Some(raw) = block_ref {
        // kept: a malformed block ref surfaces as an internal failure, not a
        // bad request
        let hex = raw.strip_prefix("0x").unwrap_or(raw);
        if hex.len() != 16 || hex.bytes().any(|b| !b.is_ascii_hexdigit()) {
            return Err(ApiError::Internal(format!("blockRef: invalid value {raw}")))
        }
    }
    Ok(())
}

fn run_clauses(
    ctx: &ApiContext,
    summary: &BlockSummary,
    caller: Address,
    clauses: &[Clause],
) -> ApiResult<Vec<CallResult>> {
    let mut stager = Stager::new(ctx.state.clone(), summary.header.state_root);
    let mut results = Vec::with_capacity(clauses.len());

    for (index, clause) in clauses.iter().enumerate() {
        let clause_ctx = ClauseContext {
            origin: caller,
            height: summary.number(),
            timestamp: summary.header.timestamp,
            index: index as u32,
        };
        let checkpoint = stager.checkpoint();
        match ctx.runner.run(&mut stager, clause, &clause_ctx)? {
            Ok(output) => results.push(CallResult {
                data: output.data,
                events: output
                    .events
                    .into_iter()
                    .map(|event| EventJson {
                        address: event.address,
                        topics: event.topics,
                        data: event.data,
                    })
                    .collect(),
                transfers: output
                    .transfers
                    .into_iter()
                    .map(|transfer| TransferJson {
                        sender: transfer.sender,
                        recipient: transfer.recipient,
                        amount: transfer.amount,
                    })
                    .collect(),
                gas_used: output.gas_used,
                reverted: false,
                vm_error: String::new(),
            }),
            Err(revert) => {
                stager.revert_to(checkpoint);
                results.push(CallResult {
                    data: Bytes::new(),
                    events: Vec::new(),
                    transfers: Vec::new(),
                    gas_used: 0,
                    reverted: true,
                    vm_error: revert.to_string(),
                });
            }
        }
    }
    Ok(results)
}
