//! The HTTP read surface.
//!
//! Exposes account state, call simulation, block reads, transaction
//! submission and block subscriptions over an axum router. Handlers consume
//! the revision resolver, the repository, the state store and the pool; the
//! core never depends back on this crate.

mod accounts;
mod blocks;
mod error;
mod revision;
mod subscriptions;
mod transactions;

pub use error::{ApiError, ApiResult};
pub use revision::{resolve_summary, BadRevision, Revision};
pub use subscriptions::{BlockMessage, Broadcaster};

use axum::{
    routing::{get, post},
    Router,
};
use meridian_chain::Repository;
use meridian_packer::ClauseRunner;
use meridian_pool::Pool;
use meridian_state::StateStore;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

/// Per-call gas ceiling of the simulation endpoints.
pub const DEFAULT_CALL_GAS_LIMIT: u64 = 40_000_000;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct ApiContext {
    /// The chain repository.
    pub repo: Repository,
    /// World-state access.
    pub state: StateStore,
    /// The transaction pool, for submissions.
    pub pool: Pool,
    /// The clause runner backing call simulation.
    pub runner: Arc<dyn ClauseRunner>,
    /// The subscription fan-out.
    pub broadcaster: Broadcaster,
    /// Per-call gas cap; simulations past it are forbidden.
    pub call_gas_limit: u64,
}

impl ApiContext {
    /// Builds the handler state and spawns the subscription broadcaster.
    pub fn new(
        repo: Repository,
        state: StateStore,
        pool: Pool,
        runner: Arc<dyn ClauseRunner>,
    ) -> Self {
        let broadcaster = Broadcaster::spawn(repo.clone());
        Self { repo, state, pool, runner, broadcaster, call_gas_limit: DEFAULT_CALL_GAS_LIMIT }
    }
}

/// Builds the API router.
pub fn router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/accounts", post(accounts::call_create))
        .route(
            "/accounts/:address",
            get(accounts::get_account).post(accounts::call_contract),
        )
        .route("/accounts/:address/code", get(accounts::get_code))
        .route("/accounts/:address/storage/:key", get(accounts::get_storage))
        .route("/blocks/:revision", get(blocks::get_block))
        .route("/transactions", post(transactions::send_transaction))
        .route("/subscriptions/block", get(subscriptions::subscribe_block))
        .with_state(ctx)
}

/// Binds and serves the API until the process ends.
pub async fn serve(ctx: ApiContext, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "api", %addr, "API listening");
    axum::serve(listener, router(ctx)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{self, get_account, RevisionQuery};
    use alloy_primitives::U256;
    use axum::extract::{Path, Query, State};
    use meridian_chain::SoloFinalizer;
    use meridian_db::MemoryStore;
    use meridian_packer::NativeRunner;
    use meridian_pool::PoolConfig;
    use meridian_primitives::Genesis;

    async fn context() -> (ApiContext, meridian_primitives::Block) {
        let store: meridian_db::SharedStore = Arc::new(MemoryStore::new());
        let genesis = Genesis::dev();
        let state = StateStore::new(store.clone());
        state.commit_genesis(&genesis.accounts).unwrap();
        let block = genesis.build();
        let finalizer = Arc::new(SoloFinalizer::new(block.id()));
        let repo = Repository::new(store, &block, finalizer).unwrap();
        let pool = Pool::new(PoolConfig::default(), repo.clone(), state.clone());
        (ApiContext::new(repo, state, pool, Arc::new(NativeRunner)), block)
    }

    fn revision(token: &str) -> Query<RevisionQuery> {
        Query(serde_json::from_value(serde_json::json!({ "revision": token })).unwrap())
    }

    #[tokio::test]
    async fn genesis_account_balance_literal() {
        let (ctx, genesis) = context().await;
        let response = get_account(
            State(ctx),
            Path("0xf077b491b355E64048cE21E3A6Fc4751eEeA77fa".to_string()),
            revision(&genesis.id().to_string()),
        )
        .await
        .unwrap();

        let body = serde_json::to_value(&response.0).unwrap();
        assert_eq!(body["balance"], "0x14adf4b7320334b9000000");
        assert_eq!(body["energy"], "0x0");
        assert_eq!(body["hasCode"], false);
    }

    #[tokio::test]
    async fn unknown_revision_is_bad_request_with_not_found_body() {
        let (ctx, _) = context().await;
        let missing =
            "0x00000000851caf3cfdb6e899cf5958bfb1ac3413d346d43539627e6be7ec1b4a";
        let err = get_account(
            State(ctx),
            Path("0xf077b491b355E64048cE21E3A6Fc4751eEeA77fa".to_string()),
            revision(missing),
        )
        .await
        .unwrap_err();

        match err {
            ApiError::BadRequest(message) => {
                assert_eq!(message, "revision: kvstore: not found")
            }
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_revision_number_is_bad_request() {
        let (ctx, _) = context().await;
        let err = get_account(
            State(ctx),
            Path("0xf077b491b355E64048cE21E3A6Fc4751eEeA77fa".to_string()),
            revision("4294967296"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn bad_address_is_bad_request() {
        let (ctx, _) = context().await;
        let err = get_account(State(ctx), Path("0x123".to_string()), revision("best"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn batch_call_returns_one_result_per_clause() {
        let (ctx, _) = context().await;
        let recipient = "0x00000000000000000000000000000000000000aa";
        let body = serde_json::json!({
            "clauses": [
                { "to": recipient, "value": "0x1", "data": "0x" },
                { "to": recipient, "value": "0x1", "data": "0x" },
            ],
            "caller": "0xf077b491b355E64048cE21E3A6Fc4751eEeA77fa",
            "gas": 100000u64,
        });

        let response = accounts::call_contract(
            State(ctx),
            Path("*".to_string()),
            revision("best"),
            axum::Json(body),
        )
        .await
        .unwrap();
        // two clauses, two results
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let results: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(results.as_array().unwrap().len(), 2);
        assert_eq!(results[0]["reverted"], false);
        assert_eq!(results[1]["reverted"], false);
    }

    #[tokio::test]
    async fn batch_call_gas_over_cap_is_forbidden() {
        let (ctx, _) = context().await;
        let body = serde_json::json!({
            "clauses": [],
            "gas": u64::MAX,
        });
        let err = accounts::call_contract(
            State(ctx),
            Path("*".to_string()),
            revision("best"),
            axum::Json(body),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn malformed_block_ref_is_internal() {
        let (ctx, _) = context().await;
        let body = serde_json::json!({
            "clauses": [],
            "blockRef": "0x00",
        });
        let err = accounts::call_contract(
            State(ctx),
            Path("*".to_string()),
            revision("best"),
            axum::Json(body),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn call_simulation_accepts_next_revision() {
        let (ctx, _) = context().await;
        let body = serde_json::json!({
            "clauses": [{
                "to": "0x00000000000000000000000000000000000000aa",
                "value": "0x0",
                "data": "0x",
            }],
        });
        accounts::call_contract(
            State(ctx.clone()),
            Path("*".to_string()),
            revision("next"),
            axum::Json(body),
        )
        .await
        .unwrap();

        // but a state read rejects it
        let err = get_account(
            State(ctx),
            Path("0xf077b491b355E64048cE21E3A6Fc4751eEeA77fa".to_string()),
            revision("next"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn transfer_simulation_moves_value_transiently() {
        let (ctx, _) = context().await;
        let caller = "0xf077b491b355E64048cE21E3A6Fc4751eEeA77fa";
        let body = serde_json::json!({
            "clauses": [{
                "to": "0x00000000000000000000000000000000000000aa",
                "value": "0x64",
                "data": "0x",
            }],
            "caller": caller,
        });
        let response = accounts::call_contract(
            State(ctx.clone()),
            Path("*".to_string()),
            revision("best"),
            axum::Json(body),
        )
        .await
        .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let results: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(results[0]["transfers"][0]["amount"], "0x64");

        // the simulation never touched persistent state
        let account = get_account(
            State(ctx),
            Path(caller.to_string()),
            revision("best"),
        )
        .await
        .unwrap();
        let balance: U256 =
            serde_json::from_value(serde_json::to_value(&account.0).unwrap()["balance"].clone())
                .unwrap();
        assert_eq!(balance, U256::from(25_000_000u64) * U256::from(10u64).pow(U256::from(18)));
    }
}
