//! The meridian node binary.

use clap::{Args, Parser, Subcommand};
use meridian_api::ApiContext;
use meridian_chain::{Repository, SoloFinalizer};
use meridian_db::{FileStore, MemoryStore, SharedStore};
use meridian_packer::{NativeRunner, Packer, PackerError};
use meridian_pool::{maintain_pool, Pool, PoolConfig};
use meridian_primitives::{dev_accounts, Genesis};
use meridian_state::StateStore;
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "meridian", about = "Meridian proof-of-authority node", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a single-proposer development node with the devnet genesis.
    Solo(SoloArgs),
}

#[derive(Debug, Args)]
struct SoloArgs {
    /// Address the HTTP API binds to.
    #[arg(long, default_value = "127.0.0.1:8669")]
    api_addr: SocketAddr,

    /// Persist chain and state across restarts.
    #[arg(long)]
    persist: bool,

    /// Directory holding the persistent store.
    #[arg(long, default_value = "meridian-data")]
    data_dir: PathBuf,

    /// Gas-limit target the packer moves toward.
    #[arg(long)]
    target_gas_limit: Option<u64>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Solo(args) => solo(args).await,
    }
}

async fn solo(args: SoloArgs) -> eyre::Result<()> {
    let store: SharedStore = if args.persist {
        info!(data_dir = %args.data_dir.display(), "using persistent store");
        Arc::new(FileStore::open(args.data_dir.join("main.db"))?)
    } else {
        Arc::new(MemoryStore::new())
    };

    let genesis = Genesis::dev();
    let state = StateStore::new(store.clone());
    state.commit_genesis(&genesis.accounts)?;
    let genesis_block = genesis.build();

    let finalizer = Arc::new(SoloFinalizer::new(genesis_block.id()));
    let repo = Repository::new(store, &genesis_block, finalizer)?;
    info!(genesis = %genesis_block.id(), chain_tag = repo.chain_tag(), "chain ready");

    let pool = Pool::new(PoolConfig::default(), repo.clone(), state.clone());
    tokio::spawn(maintain_pool(pool.clone(), repo.clone()));

    // solo mode: one proposer, scheduled every slot
    let proposer = dev_accounts().into_iter().next().expect("dev accounts are not empty");
    let mut packer = Packer::new(
        repo.clone(),
        state.clone(),
        vec![proposer.address],
        proposer.address,
        Arc::new(NativeRunner),
    );
    if let Some(target) = args.target_gas_limit {
        packer = packer.with_target_gas_limit(target);
    }
    tokio::spawn(packing_loop(packer, pool.clone(), repo.clone(), proposer.secret));

    let ctx = ApiContext::new(repo, state, pool, Arc::new(NativeRunner));
    tokio::select! {
        result = meridian_api::serve(ctx, args.api_addr) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Packs one block per scheduled slot out of the pool's executables.
async fn packing_loop(
    packer: Packer,
    pool: Pool,
    repo: Repository,
    secret: secp256k1::SecretKey,
) {
    loop {
        let parent = repo.best_block_summary();
        let mut flow = match packer.schedule(&parent, unix_now()) {
            Ok(flow) => flow,
            Err(err) => {
                warn!(%err, "scheduling failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue
            }
        };

        let wait = flow.timestamp().saturating_sub(unix_now());
        tokio::time::sleep(Duration::from_secs(wait)).await;

        for pooled in pool.executables() {
            match flow.adopt(&pooled.tx) {
                Ok(()) => {}
                // too big for the remaining block space; smaller ones may fit
                Err(PackerError::GasLimitReached) => continue,
                Err(err) => {
                    warn!(id = %pooled.id, %err, "dropping unadoptable transaction");
                    pool.remove(&[pooled.id]);
                }
            }
        }

        let packed = match flow.pack(&secret, 0, false) {
            Ok(packed) => packed,
            Err(err) => {
                error!(%err, "pack failed");
                continue
            }
        };

        let result = packed
            .stage
            .commit()
            .map_err(eyre::Report::from)
            .and_then(|_| {
                repo.add_block(&packed.block, &packed.receipts, packed.conflicts)
                    .map_err(eyre::Report::from)
            })
            .and_then(|_| {
                repo.set_best_block_id(packed.block.id()).map_err(eyre::Report::from)
            });
        match result {
            Ok(()) => info!(
                number = packed.block.number(),
                id = %packed.block.id(),
                txs = packed.block.transactions.len(),
                gas_used = packed.block.header.gas_used,
                "packed block"
            ),
            Err(err) => error!(%err, "failed to commit packed block"),
        }
    }
}
