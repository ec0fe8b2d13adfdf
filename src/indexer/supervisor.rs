use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::config::{ChainConfig, Settings};
use crate::db::Database;
use crate::decode::EventRegistry;
use crate::indexer::{creation, refresher, swaps, tokens, ChainContext};
use crate::rpc::RpcClient;
use crate::sink::Sinks;

/// Total time the supervisor grants its workers after cancellation.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

/// Boot and babysit one chain: connect the RPC transport, build the decoder
/// registry, spawn the stream loops, and on shutdown drain them within the
/// budget.
pub async fn run_chain(
    settings: Arc<Settings>,
    chain: ChainConfig,
    db: Database,
    cache: Cache,
    sinks: Arc<Sinks>,
    cancel: CancellationToken,
) -> eyre::Result<()> {
    let chain = Arc::new(chain);
    let chain_id = chain.chain_id as i64;
    tracing::info!(chain = %chain.name, chain_id, "Starting chain indexer");

    let rpc = Arc::new(RpcClient::new(&chain, &settings, cancel.child_token()));
    rpc.connect().await?;

    let registry = Arc::new(EventRegistry::from_catalog(chain.enabled_contracts())?);

    let ctx = ChainContext {
        settings,
        chain: chain.clone(),
        rpc: rpc.clone(),
        db,
        cache,
        registry,
        sinks,
        cancel: cancel.clone(),
    };

    verify_contract_code(&ctx).await;

    let mut workers: JoinSet<&'static str> = JoinSet::new();
    {
        let ctx = ctx.clone();
        workers.spawn(async move {
            creation::run_pool_creation_loop(ctx).await;
            "pool_creation"
        });
    }
    {
        let ctx = ctx.clone();
        workers.spawn(async move {
            tokens::run_coin_indexer_loop(ctx).await;
            "coin_tokens"
        });
    }
    {
        let ctx = ctx.clone();
        workers.spawn(async move {
            swaps::run_swap_indexer_loop(ctx).await;
            "swaps"
        });
    }
    if chain.features.pool_state_refresh {
        let ctx = ctx.clone();
        workers.spawn(async move {
            refresher::run_pool_state_refresher(ctx).await;
            "pool_state_refresher"
        });
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                drain_workers(&mut workers, chain_id).await;
                break;
            }
            joined = workers.join_next() => match joined {
                Some(Ok(worker)) => {
                    tracing::info!(chain_id, worker, "Worker loop finished");
                }
                Some(Err(e)) => {
                    tracing::error!(chain_id, error = %e, "Worker task failed");
                }
                None => break,
            }
        }
    }

    rpc.disconnect();
    tracing::info!(chain = %chain.name, chain_id, "Chain indexer stopped");
    Ok(())
}

/// Give running workers the shutdown budget, then abort stragglers.
async fn drain_workers(workers: &mut JoinSet<&'static str>, chain_id: i64) {
    let deadline = Instant::now() + SHUTDOWN_BUDGET;
    loop {
        match timeout_at(deadline, workers.join_next()).await {
            Ok(Some(Ok(worker))) => {
                tracing::info!(chain_id, worker, "Worker stopped gracefully");
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(chain_id, error = %e, "Worker ended abnormally during shutdown");
            }
            Ok(None) => return,
            Err(_) => {
                tracing::warn!(chain_id, "Shutdown budget exhausted, aborting remaining workers");
                workers.abort_all();
                while workers.join_next().await.is_some() {}
                return;
            }
        }
    }
}

/// Startup sanity pass: warn about watched contracts with no code at head.
/// Purely advisory, never blocks startup.
async fn verify_contract_code(ctx: &ChainContext) {
    let mut watched: Vec<(String, String)> = Vec::new();
    for entry in ctx.chain.enabled_protocols() {
        if let Some(address) = entry.creation_contract() {
            watched.push((entry.protocol.as_str().to_string(), address.to_string()));
        }
    }
    for (name, contract) in ctx.chain.enabled_contracts() {
        watched.push((name.clone(), contract.address.clone()));
    }

    for (label, address) in watched {
        match ctx.rpc.get_code(&address).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(
                    chain_id = ctx.chain_id(),
                    contract = %label,
                    address = %address,
                    "Watched contract has no code at head, check the configuration"
                );
            }
            Err(e) => {
                tracing::debug!(
                    chain_id = ctx.chain_id(),
                    contract = %label,
                    error = %e,
                    "Contract code probe failed"
                );
                return; // RPC is struggling; the streams will surface it
            }
        }
    }
}
