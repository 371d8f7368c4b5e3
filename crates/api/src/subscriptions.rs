//! New-block subscription fan-out with historical backfill.

use crate::ApiContext;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use meridian_chain::{ChainResult, Repository};
use meridian_primitives::{Block, BlockId, TxId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Capacity of the fan-out channel; slow subscribers miss ticks past it.
const FANOUT_CAPACITY: usize = 256;

/// The message sent for every delivered block.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMessage {
    /// Block number.
    pub number: u32,
    /// Block identifier.
    pub id: BlockId,
    /// Parent identifier.
    pub parent_id: BlockId,
    /// Block timestamp.
    pub timestamp: u64,
    /// Transaction identifiers in the block.
    pub transactions: Vec<TxId>,
    /// Whether a reorg has retired this previously delivered block.
    pub obsolete: bool,
}

impl BlockMessage {
    fn new(block: &Block, obsolete: bool) -> Self {
        Self {
            number: block.number(),
            id: block.id(),
            parent_id: block.header.parent_id,
            timestamp: block.header.timestamp,
            transactions: block.tx_ids(),
            obsolete,
        }
    }
}

/// Fans new best blocks out to every subscriber.
///
/// One owned background task follows the repository ticker and publishes to
/// a broadcast channel; each websocket client optionally backfills from a
/// historical position through its own block reader before going live. The
/// task ends when the repository closes.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    repo: Repository,
    fanout: broadcast::Sender<BlockMessage>,
}

impl Broadcaster {
    /// Creates the broadcaster and spawns its publisher task.
    pub fn spawn(repo: Repository) -> Self {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        let this = Self { repo, fanout };
        let publisher = this.clone();
        tokio::spawn(async move { publisher.run().await });
        this
    }

    /// Subscribes to live block messages.
    pub fn subscribe(&self) -> broadcast::Receiver<BlockMessage> {
        self.fanout.subscribe()
    }

    /// Collects the backfill from `position` up to the current head,
    /// obsolete entries included.
    pub fn backfill(&self, position: BlockId) -> ChainResult<Vec<BlockMessage>> {
        let mut reader = self.repo.block_reader(position);
        let mut messages = Vec::new();
        loop {
            let batch = reader.read()?;
            if batch.is_empty() {
                return Ok(messages)
            }
            for entry in batch {
                messages.push(BlockMessage::new(&entry.block, entry.obsolete));
            }
        }
    }

    async fn run(&self) {
        let mut ticker = self.repo.ticker();
        loop {
            if ticker.tick().await.is_err() {
                debug!(target: "api", "repository closed, broadcaster stopping");
                return
            }
            let best = self.repo.best_block_summary();
            match self.repo.block(best.id()) {
                Ok(block) => {
                    // no subscribers is fine
                    let _ = self.fanout.send(BlockMessage::new(&block, false));
                }
                Err(err) => warn!(target: "api", %err, "failed to load best block"),
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SubscriptionQuery {
    pos: Option<String>,
}

/// `GET /subscriptions/block?pos=<id>` — websocket stream of block messages.
pub(crate) async fn subscribe_block(
    State(ctx): State<ApiContext>,
    Query(query): Query<SubscriptionQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, crate::ApiError> {
    let position = match query.pos.as_deref() {
        None | Some("") => ctx.broadcaster.repo.best_block_summary().id(),
        Some(raw) => raw
            .parse()
            .map_err(|err| crate::ApiError::bad_request("pos", err))?,
    };
    Ok(upgrade.on_upgrade(move |socket| serve_subscriber(ctx, socket, position)))
}

async fn serve_subscriber(ctx: ApiContext, mut socket: WebSocket, position: BlockId) {
    // live subscription opens first so blocks arriving during backfill are
    // not lost; duplicates are cheaper than gaps
    let mut live = ctx.broadcaster.subscribe();

    match ctx.broadcaster.backfill(position) {
        Ok(messages) => {
            for message in messages {
                if send_json(&mut socket, &message).await.is_err() {
                    return
                }
            }
        }
        Err(err) => {
            warn!(target: "api", %err, "subscription backfill failed");
            return
        }
    }

    loop {
        match live.recv().await {
            Ok(message) => {
                if send_json(&mut socket, &message).await.is_err() {
                    return
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target: "api", skipped, "subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn send_json(socket: &mut WebSocket, message: &BlockMessage) -> Result<(), ()> {
    let text = serde_json::to_string(message).map_err(|_| ())?;
    socket.send(Message::Text(text)).await.map_err(|_| ())
}
