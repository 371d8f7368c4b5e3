//! Transaction submission.

use crate::{ApiContext, ApiError, ApiResult};
use alloy_primitives::Bytes;
use alloy_rlp::Decodable;
use axum::{extract::State, Json};
use meridian_pool::PoolError;
use meridian_primitives::{Transaction, TxId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(crate) struct RawTransaction {
    raw: Bytes,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendResult {
    id: TxId,
}

/// `POST /transactions` — decode a raw transaction and admit it to the pool.
///
/// A transaction the pool already knows counts as accepted.
pub(crate) async fn send_transaction(
    State(ctx): State<ApiContext>,
    Json(body): Json<RawTransaction>,
) -> ApiResult<Json<SendResult>> {
    let tx = Transaction::decode(&mut body.raw.as_ref())
        .map_err(|err| ApiError::bad_request("raw", err))?;
    let id = tx.id();

    match ctx.pool.add(tx) {
        Ok(id) => Ok(Json(SendResult { id })),
        Err(PoolError::KnownTransaction) => Ok(Json(SendResult { id })),
        Err(err @ PoolError::Rejected(_)) => Err(ApiError::bad_request("tx", err)),
        Err(err) => Err(ApiError::Internal(err.to_string())),
    }
}
