//! End-to-end tests driving the HTTP surface of a packed chain.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use meridian_api::ApiContext;
use meridian_chain::{Repository, SoloFinalizer};
use meridian_db::MemoryStore;
use meridian_packer::{NativeRunner, Packer};
use meridian_pool::{Pool, PoolConfig};
use meridian_primitives::{
    dev_accounts, Address, Bytes, Clause, DevAccount, Genesis, Transaction, U256,
};
use meridian_state::StateStore;
use std::sync::Arc;
use tower::ServiceExt;

const FUNDED: &str = "0xf077b491b355E64048cE21E3A6Fc4751eEeA77fa";

struct Node {
    router: Router,
    repo: Repository,
    state: StateStore,
    pool: Pool,
    accounts: Vec<DevAccount>,
    genesis_id: String,
}

fn node() -> Node {
    let store: meridian_db::SharedStore = Arc::new(MemoryStore::new());
    let genesis = Genesis::dev();
    let state = StateStore::new(store.clone());
    state.commit_genesis(&genesis.accounts).unwrap();
    let block = genesis.build();
    let finalizer = Arc::new(SoloFinalizer::new(block.id()));
    let repo = Repository::new(store, &block, finalizer).unwrap();
    let pool = Pool::new(PoolConfig::default(), repo.clone(), state.clone());
    let ctx = ApiContext::new(repo.clone(), state.clone(), pool.clone(), Arc::new(NativeRunner));
    Node {
        router: meridian_api::router(ctx),
        repo,
        state,
        pool,
        accounts: dev_accounts(),
        genesis_id: block.id().to_string(),
    }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn post(router: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

/// Packs one block out of the pool and promotes it to best.
fn pack_block(node: &Node) {
    let proposer = node.accounts[0].clone();
    let packer = Packer::new(
        node.repo.clone(),
        node.state.clone(),
        vec![proposer.address],
        proposer.address,
        Arc::new(NativeRunner),
    );
    let parent = node.repo.best_block_summary();
    let mut flow = packer.schedule(&parent, 0).unwrap();
    for pooled in node.pool.executables() {
        flow.adopt(&pooled.tx).unwrap();
    }
    let packed = flow.pack(&proposer.secret, 0, false).unwrap();
    packed.stage.commit().unwrap();
    node.repo.add_block(&packed.block, &packed.receipts, packed.conflicts).unwrap();
    node.repo.set_best_block_id(packed.block.id()).unwrap();
    let mined: Vec<_> = packed.block.tx_ids();
    node.pool.remove(&mined);
}

#[tokio::test]
async fn genesis_account_over_http() {
    let node = node();
    let (status, body) =
        get(&node.router, &format!("/accounts/{FUNDED}?revision={}", node.genesis_id)).await;
    assert_eq!(status, StatusCode::OK);
    let value = json(&body);
    assert_eq!(value["balance"], "0x14adf4b7320334b9000000");
    assert_eq!(value["energy"], "0x0");
}

#[tokio::test]
async fn unknown_revision_is_400_with_not_found_body() {
    let node = node();
    let missing = "0x00000000851caf3cfdb6e899cf5958bfb1ac3413d346d43539627e6be7ec1b4a";
    let (status, body) =
        get(&node.router, &format!("/accounts/{FUNDED}?revision={missing}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "revision: kvstore: not found\n");
}

#[tokio::test]
async fn oversized_revision_number_is_400() {
    let node = node();
    let (status, _) =
        get(&node.router, &format!("/accounts/{FUNDED}?revision=4294967296")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_call_gas_over_cap_is_403() {
    let node = node();
    let body = serde_json::json!({ "clauses": [], "gas": u64::MAX });
    let (status, _) = post(&node.router, "/accounts/*", body).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_block_ref_is_500() {
    let node = node();
    let body = serde_json::json!({ "clauses": [], "blockRef": "0x00" });
    let (status, _) = post(&node.router, "/accounts/*", body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn unknown_block_revision_reads_null() {
    let node = node();
    let (status, body) = get(&node.router, "/blocks/12345").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::Value::Null);
}

#[tokio::test]
async fn submitted_transfer_lands_in_a_block() {
    let node = node();
    let sender = &node.accounts[1];
    let recipient = Address::repeat_byte(0xbb);

    let mut tx = Transaction {
        chain_tag: node.repo.chain_tag(),
        expiration: 720,
        clauses: vec![Clause {
            to: Some(recipient),
            value: U256::from(1_000u64),
            data: Bytes::new(),
        }],
        gas: 100_000,
        nonce: 7,
        ..Default::default()
    };
    tx.sign(&sender.secret);
    let raw = format!("0x{}", alloy_primitives::hex::encode(alloy_rlp::encode(&tx)));

    let (status, body) =
        post(&node.router, "/transactions", serde_json::json!({ "raw": raw })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["id"], tx.id().to_string());

    pack_block(&node);

    // the block endpoint shows the transaction on the best chain
    let (status, body) = get(&node.router, "/blocks/1").await;
    assert_eq!(status, StatusCode::OK);
    let block = json(&body);
    assert_eq!(block["number"], 1);
    assert_eq!(block["isTrunk"], true);
    assert_eq!(block["transactions"][0], tx.id().to_string());

    // and the recipient balance moved
    let (status, body) =
        get(&node.router, &format!("/accounts/0x{}", alloy_primitives::hex::encode(recipient)))
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["balance"], "0x3e8");
}

#[tokio::test]
async fn deployed_code_is_readable() {
    let node = node();
    let sender = &node.accounts[2];
    let code = vec![0x60u8, 0x80, 0x60, 0x40, 0x52];

    let mut tx = Transaction {
        chain_tag: node.repo.chain_tag(),
        expiration: 720,
        clauses: vec![Clause { to: None, value: U256::ZERO, data: Bytes::from(code.clone()) }],
        gas: 200_000,
        nonce: 8,
        ..Default::default()
    };
    tx.sign(&sender.secret);
    node.pool.add(tx).unwrap();
    pack_block(&node);

    // the creation receipt carries the created address in its output data
    let (_, body) = get(&node.router, "/blocks/1?expanded=true").await;
    let block = json(&body);
    assert_eq!(block["transactions"][0]["reverted"], false);

    let best = node.repo.best_block_summary();
    let receipts = node.repo.block_receipts(best.id()).unwrap();
    assert_eq!(receipts.len(), 1);

    // recover the created address through the call-simulation path: the
    // address derivation is deterministic in (origin, height, clause index),
    // so simulating the same creation at the same height reproduces it
    let sim = serde_json::json!({
        "clauses": [
            { "value": "0x0", "data": format!("0x{}", alloy_primitives::hex::encode(&code)) },
        ],
        "caller": format!("0x{}", alloy_primitives::hex::encode(sender.address)),
    });
    let (status, body) = post(&node.router, "/accounts/*?revision=best", sim).await;
    assert_eq!(status, StatusCode::OK);
    let created = json(&body)[0]["data"].as_str().unwrap().to_string();

    let (status, body) =
        get(&node.router, &format!("/accounts/{created}/code?revision=best")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json(&body)["code"],
        format!("0x{}", alloy_primitives::hex::encode(&code))
    );

    // untouched storage reads as the zero word
    let key = format!("0x{}", "00".repeat(32));
    let (status, body) =
        get(&node.router, &format!("/accounts/{created}/storage/{key}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["value"], format!("0x{}", "00".repeat(32)));
}

#[tokio::test]
async fn reorged_blocks_backfill_as_obsolete() {
    let node = node();
    let broadcaster = meridian_api::Broadcaster::spawn(node.repo.clone());
    let genesis = node.repo.best_block_summary();

    pack_block(&node);
    let first_best = node.repo.best_block_summary();
    assert_eq!(first_best.number(), 1);

    // competing sibling chain of greater height wins
    let proposer = node.accounts[3].clone();
    let packer = Packer::new(
        node.repo.clone(),
        node.state.clone(),
        vec![proposer.address],
        proposer.address,
        Arc::new(NativeRunner),
    );
    let mut flow = packer.schedule(&genesis, 0).unwrap();
    let packed = flow.pack(&proposer.secret, 0, false).unwrap();
    packed.stage.commit().unwrap();
    node.repo.add_block(&packed.block, &packed.receipts, 0).unwrap();

    let mut flow2 = packer.schedule(&node.repo.block_summary(packed.block.id()).unwrap(), 0).unwrap();
    let packed2 = flow2.pack(&proposer.secret, 0, false).unwrap();
    packed2.stage.commit().unwrap();
    node.repo.add_block(&packed2.block, &packed2.receipts, 0).unwrap();
    node.repo.set_best_block_id(packed2.block.id()).unwrap();

    // a subscriber backfilling from the old best sees it retired first, then
    // the new chain
    let messages = broadcaster.backfill(first_best.id()).unwrap();
    let mut combined = messages;
    loop {
        let more = broadcaster.backfill(combined.last().unwrap().id);
        match more {
            Ok(batch) if batch.is_empty() => break,
            Ok(batch) => combined.extend(batch),
            Err(_) => break,
        }
    }
    assert!(combined[0].obsolete);
    assert_eq!(combined[0].id, first_best.id());
    let fresh: Vec<_> = combined.iter().filter(|message| !message.obsolete).collect();
    assert_eq!(fresh.len(), 2);
    assert_eq!(fresh.last().unwrap().id, packed2.block.id());
}

#[tokio::test]
async fn known_transaction_resubmission_is_accepted() {
    let node = node();
    let sender = &node.accounts[4];
    let mut tx = Transaction {
        chain_tag: node.repo.chain_tag(),
        expiration: 720,
        clauses: vec![Clause {
            to: Some(Address::repeat_byte(1)),
            value: U256::from(1u64),
            data: Bytes::new(),
        }],
        gas: 100_000,
        nonce: 9,
        ..Default::default()
    };
    tx.sign(&sender.secret);
    let raw = format!("0x{}", alloy_primitives::hex::encode(alloy_rlp::encode(&tx)));

    let (status, _) =
        post(&node.router, "/transactions", serde_json::json!({ "raw": raw })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) =
        post(&node.router, "/transactions", serde_json::json!({ "raw": raw })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["id"], tx.id().to_string());
}
