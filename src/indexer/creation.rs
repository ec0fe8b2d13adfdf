use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::{keys, POOL_MARKER_TTL};
use crate::config::ProtocolEntry;
use crate::db::{progress, repository};
use crate::decode::abi::{DecodeError, LogParts};
use crate::decode::{balancer, curve, v2, v3, v4};
use crate::indexer::scheduler::{clamp_window, first_run_start, max_scan_window, Window};
use crate::indexer::{group_logs_by_block, ChainContext};
use crate::models::{Pool, Protocol, Stream};
use crate::rpc::Log;

/// Pool-creation stream: one tick scans a block window across every enabled
/// protocol's factory and persists the pools it finds.
pub async fn run_pool_creation_loop(ctx: ChainContext) {
    let chain_id = ctx.chain_id();
    if ctx.chain.enabled_protocols().next().is_none() {
        tracing::info!(chain_id, "No DEX protocols configured, pool creation stream idle");
        return;
    }

    tracing::info!(
        chain_id,
        stream = %Stream::Pools,
        interval = ctx.settings.worker_interval_seconds,
        "Pool creation indexer started"
    );

    while !ctx.cancel.is_cancelled() {
        let lock = keys::pool_indexer_lock(chain_id);
        match ctx
            .cache
            .acquire_lock(&lock, ctx.settings.lock_timeout_seconds)
            .await
        {
            Ok(true) => {
                let outcome = index_pools_tick(&ctx).await;
                if let Err(e) = ctx.cache.release_lock(&lock).await {
                    tracing::warn!(chain_id, error = %e, "Failed to release pool indexer lock");
                }
                if let Err(e) = outcome {
                    tracing::error!(
                        chain_id,
                        stream = %Stream::Pools,
                        error = %e,
                        "Pool indexing tick failed"
                    );
                    if !ctx.sleep(ctx.settings.worker_retry_delay).await {
                        break;
                    }
                    continue;
                }
            }
            Ok(false) => {
                tracing::debug!(chain_id, "Another worker is indexing pools, skipping tick");
            }
            Err(e) => {
                tracing::warn!(chain_id, error = %e, "Pool indexer lock unavailable");
            }
        }

        if !ctx.sleep(ctx.settings.worker_interval_seconds).await {
            break;
        }
    }

    tracing::info!(chain_id, stream = %Stream::Pools, "Pool creation indexer stopped");
}

async fn index_pools_tick(ctx: &ChainContext) -> eyre::Result<()> {
    let chain_id = ctx.chain_id();
    let cursor = progress::get_progress(ctx.db.pool(), chain_id, Stream::Pools, None).await?;
    let head = ctx.rpc.latest_block().await?;

    let entries: Vec<ProtocolEntry> = ctx.chain.enabled_protocols().cloned().collect();
    if entries.is_empty() {
        return Ok(());
    }

    let from = match &cursor {
        Some(c) => c.last_processed_block as u64 + 1,
        None => first_creation_scan_start(ctx, &entries, head),
    };

    let Some(window) = clamp_window(
        from,
        head,
        ctx.max_blocks_per_request(),
        ctx.chain.confirmation_blocks,
    ) else {
        tracing::debug!(chain_id, from, head, "No new blocks for pool creation stream");
        return Ok(());
    };

    tracing::info!(
        chain_id,
        stream = %Stream::Pools,
        from = window.from,
        to = window.to,
        head,
        protocols = entries.len(),
        "Indexing pool creations"
    );

    let semaphore = Arc::new(Semaphore::new(ctx.settings.max_concurrent_contracts));
    let mut join = JoinSet::new();
    for entry in entries {
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();
        join.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let protocol = entry.protocol;
            (protocol, index_protocol_window(&ctx, &entry, window).await)
        });
    }

    let mut first_failure: Option<String> = None;
    let mut failure_count = 0usize;
    while let Some(joined) = join.join_next().await {
        match joined {
            Ok((protocol, Ok(indexed))) => {
                if indexed > 0 {
                    tracing::info!(
                        chain_id,
                        protocol = %protocol,
                        pools = indexed,
                        "Indexed new pools"
                    );
                }
            }
            Ok((protocol, Err(e))) => {
                tracing::error!(chain_id, protocol = %protocol, error = %e, "Protocol window failed");
                failure_count += 1;
                first_failure.get_or_insert_with(|| format!("{protocol}: {e}"));
            }
            Err(e) => {
                failure_count += 1;
                first_failure.get_or_insert_with(|| format!("worker task failed: {e}"));
            }
        }
    }

    if failure_count > 0 {
        let message = format!(
            "{failure_count} protocol window(s) failed, cursor held: {}",
            first_failure.unwrap_or_default()
        );
        progress::update_progress(
            ctx.db.pool(),
            chain_id,
            Stream::Pools,
            None,
            window.from as i64 - 1,
            Some("error"),
            Some(&message),
        )
        .await?;
        return Err(eyre::eyre!(message));
    }

    progress::update_progress(
        ctx.db.pool(),
        chain_id,
        Stream::Pools,
        None,
        window.to as i64,
        Some("running"),
        None,
    )
    .await?;

    Ok(())
}

/// First-run start block: validated creation blocks of the enabled protocol
/// entries, with declared-in-the-future blocks dropped loudly.
fn first_creation_scan_start(ctx: &ChainContext, entries: &[ProtocolEntry], head: u64) -> u64 {
    let declared: Vec<u64> = entries.iter().filter_map(|e| e.creation_block).collect();
    let (valid, future): (Vec<u64>, Vec<u64>) = declared.iter().copied().partition(|&b| b <= head);

    if !future.is_empty() {
        tracing::warn!(
            chain_id = ctx.chain_id(),
            head,
            future_blocks = ?future,
            "Ignoring contract creation blocks declared after head"
        );
    }

    let scan_window = max_scan_window(ctx.max_blocks_per_request());
    let start = first_run_start(&valid, head, ctx.chain.start_block, scan_window);
    tracing::info!(
        chain_id = ctx.chain_id(),
        head,
        start_block = start,
        blocks_to_scan = head.saturating_sub(start) + 1,
        "First run, computed pool creation scan start"
    );
    start
}

/// One protocol's slice of the window: fetch factory logs, group by block,
/// process block batches with bounded concurrency.
async fn index_protocol_window(
    ctx: &ChainContext,
    entry: &ProtocolEntry,
    window: Window,
) -> eyre::Result<usize> {
    let from = window.from.max(entry.creation_block.unwrap_or(0));
    if from > window.to {
        tracing::debug!(
            protocol = %entry.protocol,
            creation_block = entry.creation_block,
            "Window predates protocol deployment, skipping"
        );
        return Ok(0);
    }

    let (Some(contract), Some(topic)) = (entry.creation_contract(), entry.creation_topic()) else {
        tracing::warn!(protocol = %entry.protocol, "Protocol entry missing contract or topic");
        return Ok(0);
    };

    let logs = ctx
        .rpc
        .logs(from, window.to, Some(contract), Some(vec![topic.to_string()]))
        .await?;
    if logs.is_empty() {
        return Ok(0);
    }

    tracing::info!(
        protocol = %entry.protocol,
        count = logs.len(),
        from,
        to = window.to,
        "Found pool creation logs"
    );

    let mut indexed = 0usize;
    let block_slots = Arc::new(Semaphore::new(ctx.settings.max_concurrent_blocks));
    let mut blocks = group_logs_by_block(logs).into_iter().peekable();
    while blocks.peek().is_some() {
        let batch: Vec<(u64, Vec<Log>)> = blocks
            .by_ref()
            .take(ctx.settings.event_processing_batch_size)
            .collect();

        let mut join = JoinSet::new();
        for (block_number, block_logs) in batch {
            let ctx = ctx.clone();
            let entry = entry.clone();
            let block_slots = block_slots.clone();
            join.spawn(async move {
                let _slot = block_slots.acquire_owned().await;
                process_creation_block(&ctx, &entry, block_number, block_logs).await
            });
        }

        let mut batch_error: Option<eyre::Report> = None;
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(Ok(count)) => indexed += count,
                Ok(Err(e)) => batch_error = Some(batch_error.unwrap_or(e)),
                Err(e) => batch_error = Some(batch_error.unwrap_or_else(|| eyre::eyre!(e))),
            }
        }
        if let Some(e) = batch_error {
            return Err(e);
        }
    }

    Ok(indexed)
}

/// One block's logs: a single timestamp fetch, then each log decoded and
/// persisted. Decode failures skip the log; infrastructure failures bubble.
async fn process_creation_block(
    ctx: &ChainContext,
    entry: &ProtocolEntry,
    block_number: u64,
    logs: Vec<Log>,
) -> eyre::Result<usize> {
    let timestamp = ctx.rpc.block_timestamp(block_number).await?;

    let mut indexed = 0usize;
    let mut store_error: Option<eyre::Report> = None;
    for log in &logs {
        let parts = match LogParts::parse(log) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(
                    protocol = %entry.protocol,
                    tx_hash = %log.transaction_hash,
                    error = %e,
                    "Skipping malformed log"
                );
                continue;
            }
        };

        match parse_pool_creation(ctx, entry.protocol, &parts, timestamp).await {
            Ok(pool) => match process_new_pool(ctx, pool).await {
                Ok(true) => indexed += 1,
                Ok(false) => {}
                // Siblings keep going; the window is surfaced as failed so the
                // cursor stays put and the range is retried.
                Err(e) => store_error = Some(store_error.unwrap_or(e)),
            },
            Err(e) => {
                tracing::warn!(
                    protocol = %entry.protocol,
                    tx_hash = %log.transaction_hash,
                    error = %e,
                    "Skipping undecodable pool creation log"
                );
            }
        }
    }

    match store_error {
        Some(e) => Err(e),
        None => Ok(indexed),
    }
}

async fn parse_pool_creation(
    ctx: &ChainContext,
    protocol: Protocol,
    parts: &LogParts,
    timestamp: DateTime<Utc>,
) -> Result<Pool, DecodeError> {
    let chain_id = ctx.chain_id();
    match protocol {
        p if p.is_v2_family() => v2::parse_pool_created(parts, p, chain_id, timestamp),
        p if p.is_v3_family() => v3::parse_pool_created(parts, p, chain_id, timestamp),
        Protocol::UniswapV4 => v4::parse_initialize(parts, chain_id, timestamp),
        Protocol::BalancerV2 => {
            balancer::parse_pool_registered(&ctx.rpc, parts, chain_id, timestamp).await
        }
        Protocol::Curve => curve::parse_pool_deployed(&ctx.rpc, parts, chain_id, timestamp).await,
        other => Err(DecodeError::Other(format!(
            "no pool creation decoder for {other}"
        ))),
    }
}

/// Dedup-checked persist of a discovered pool. On success the dedup marker is
/// written and an immediate swap drain for the pool is kicked off; on store
/// failure the marker is removed so a later tick can retry, and the failure
/// is returned so the window is not advanced past it.
async fn process_new_pool(ctx: &ChainContext, pool: Pool) -> eyre::Result<bool> {
    let chain_id = ctx.chain_id();
    let marker = keys::pool_processed(chain_id, &pool.pool_address);

    match ctx.cache.exists(&marker).await {
        Ok(true) => {
            tracing::debug!(pool_address = %pool.pool_address, "Pool already processed, skipping");
            return Ok(false);
        }
        Ok(false) => {}
        Err(e) => {
            // The store upsert stays idempotent without the cache.
            tracing::warn!(error = %e, "Dedup cache unavailable, falling through to store");
        }
    }

    match repository::upsert_pool(ctx.db.pool(), &pool).await {
        Ok(()) => {
            if let Err(e) = ctx.cache.set_marker(&marker, POOL_MARKER_TTL).await {
                tracing::warn!(pool_address = %pool.pool_address, error = %e, "Failed to write dedup marker");
            }
            tracing::debug!(
                chain_id,
                pool_address = %pool.pool_address,
                protocol = %pool.protocol,
                "Indexed new pool"
            );

            // Drain the new pool's swaps without waiting for the next tick.
            let ctx = ctx.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                crate::indexer::swaps::index_pool_swaps(ctx, pool).await;
            });
            Ok(true)
        }
        Err(e) => {
            if let Err(cache_err) = ctx.cache.delete(&marker).await {
                tracing::error!(
                    pool_address = %pool.pool_address,
                    error = %cache_err,
                    "Failed to clear dedup marker after store failure"
                );
            }
            tracing::error!(
                pool_address = %pool.pool_address,
                error = %e,
                "Failed to persist pool"
            );
            Err(e)
        }
    }
}
