use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::cache::{keys, SWAP_MARKER_TTL};
use crate::db::{progress, repository};
use crate::decode::abi::{DecodeError, LogParts};
use crate::decode::{balancer, curve, v2, v3, v4};
use crate::indexer::scheduler::{clamp_window, pool_stream_start, prioritize_pools};
use crate::indexer::{group_logs_by_block, ChainContext};
use crate::models::{Pool, PoolStatus, Protocol, Stream, SwapEvent};
use crate::rpc::Log;

/// How many pools one swap loop iteration will consider.
const POOL_ENUMERATION_LIMIT: i64 = 1000;

/// Per-pool swap/liquidity stream. Each iteration enumerates the chain's
/// pools, drains the newest and most-behind pools first, and processes them
/// in bounded parallel batches.
pub async fn run_swap_indexer_loop(ctx: ChainContext) {
    let chain_id = ctx.chain_id();
    tracing::info!(
        chain_id,
        stream = %Stream::Swaps,
        interval = ctx.settings.worker_interval_seconds,
        "Swap indexer started"
    );

    while !ctx.cancel.is_cancelled() {
        if let Err(e) = swap_indexer_iteration(&ctx).await {
            tracing::error!(chain_id, stream = %Stream::Swaps, error = %e, "Swap iteration failed");
            if !ctx.sleep(ctx.settings.worker_retry_delay).await {
                break;
            }
            continue;
        }

        if !ctx.sleep(ctx.settings.worker_interval_seconds).await {
            break;
        }
    }

    tracing::info!(chain_id, stream = %Stream::Swaps, "Swap indexer stopped");
}

async fn swap_indexer_iteration(ctx: &ChainContext) -> eyre::Result<()> {
    let chain_id = ctx.chain_id();
    let mut pools =
        repository::pools_by_chain(ctx.db.pool(), chain_id, POOL_ENUMERATION_LIMIT).await?;
    if pools.is_empty() {
        return Ok(());
    }

    let head = ctx.rpc.latest_block().await?;
    prioritize_pools(&mut pools, head, Utc::now());

    tracing::debug!(chain_id, pools = pools.len(), head, "Draining pool swap streams");

    for batch in pools.chunks(ctx.settings.worker_pool_size) {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let tasks = batch
            .iter()
            .filter(|pool| pool.status == PoolStatus::Active)
            .map(|pool| index_pool_swaps(ctx.clone(), pool.clone()));
        join_all(tasks).await;
    }

    Ok(())
}

/// Drain one pool under its stream lock. Contested locks mean another worker
/// owns the pool right now; the tick is skipped quietly.
pub async fn index_pool_swaps(ctx: ChainContext, pool: Pool) {
    let chain_id = ctx.chain_id();
    let lock = keys::swap_indexer_lock(chain_id, &pool.pool_address);

    match ctx
        .cache
        .acquire_lock(&lock, ctx.settings.lock_timeout_seconds)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(pool_address = %pool.pool_address, "Pool locked by another worker");
            return;
        }
        Err(e) => {
            tracing::warn!(pool_address = %pool.pool_address, error = %e, "Swap lock unavailable");
            return;
        }
    }

    if let Err(e) = process_pool_swaps(&ctx, &pool).await {
        tracing::error!(
            chain_id,
            pool_address = %pool.pool_address,
            error = %e,
            "Failed to process pool swaps"
        );
    }

    if pool.protocol == Protocol::UniswapV4 {
        // The liquidity pass doubles the tick's work; refresh the lock so it
        // cannot expire midway.
        match ctx
            .cache
            .extend_lock(&lock, ctx.settings.lock_timeout_seconds)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(pool_address = %pool.pool_address, "Swap lock expired mid-tick");
                return;
            }
            Err(e) => {
                tracing::warn!(pool_address = %pool.pool_address, error = %e, "Failed to extend swap lock");
            }
        }
        if let Err(e) = process_pool_liquidity(&ctx, &pool).await {
            tracing::error!(
                chain_id,
                pool_address = %pool.pool_address,
                error = %e,
                "Failed to process pool liquidity events"
            );
        }
    }

    if let Err(e) = ctx.cache.release_lock(&lock).await {
        tracing::warn!(pool_address = %pool.pool_address, error = %e, "Failed to release swap lock");
    }
}

async fn process_pool_swaps(ctx: &ChainContext, pool: &Pool) -> eyre::Result<()> {
    let chain_id = ctx.chain_id();
    let scope = Some(pool.pool_address.as_str());

    let cursor = progress::get_progress(ctx.db.pool(), chain_id, Stream::Swaps, scope).await?;
    let head = ctx.rpc.latest_block().await?;
    let from = pool_stream_start(
        cursor.as_ref().map(|c| c.last_processed_block),
        pool.creation_block,
        head,
        ctx.max_blocks_per_request(),
    );

    let Some(window) = clamp_window(
        from,
        head,
        ctx.max_blocks_per_request(),
        ctx.chain.confirmation_blocks,
    ) else {
        tracing::debug!(pool_address = %pool.pool_address, from, head, "Pool is caught up");
        return Ok(());
    };

    let Some(entry) = ctx.chain.protocol_entry(pool.protocol) else {
        tracing::warn!(
            pool_address = %pool.pool_address,
            protocol = %pool.protocol,
            "No protocol entry configured for pool, skipping"
        );
        return Ok(());
    };
    let Some(swap_topic) = entry.swap_topic.as_deref() else {
        tracing::debug!(protocol = %pool.protocol, "No swap topic configured");
        return Ok(());
    };

    // V4 pools live inside the singleton manager: filter its swap logs down
    // to this pool via the indexed poolId topic.
    let (source_address, pool_id) = pool.log_source();
    let mut topics = vec![swap_topic.to_string()];
    if let Some(pool_id) = pool_id {
        topics.push(format!("0x{pool_id}"));
    }

    let outcome = async {
        let logs = ctx
            .rpc
            .logs(window.from, window.to, Some(source_address), Some(topics))
            .await?;
        let count = logs.len();

        let mut skipped = 0usize;
        let mut store_error: Option<eyre::Report> = None;
        for (block_number, block_logs) in group_logs_by_block(logs) {
            let timestamp = ctx.rpc.block_timestamp(block_number).await?;
            for log in &block_logs {
                match process_swap_log(ctx, pool, log, timestamp).await {
                    Ok(true) => {}
                    Ok(false) => skipped += 1,
                    Err(e) => store_error = Some(store_error.unwrap_or(e)),
                }
            }
        }
        if let Some(e) = store_error {
            return Err(e);
        }
        Ok::<(usize, usize), eyre::Report>((count, skipped))
    }
    .await;

    match outcome {
        Ok((count, skipped)) => {
            progress::update_progress(
                ctx.db.pool(),
                chain_id,
                Stream::Swaps,
                scope,
                window.to as i64,
                Some("running"),
                None,
            )
            .await?;
            repository::update_pool_status(
                ctx.db.pool(),
                chain_id,
                &pool.pool_address,
                PoolStatus::Active,
                window.to as i64,
            )
            .await?;

            if count > 0 {
                tracing::info!(
                    chain_id,
                    pool_address = %pool.pool_address,
                    protocol = %pool.protocol,
                    events = count,
                    skipped,
                    from = window.from,
                    to = window.to,
                    "Processed swap events"
                );
            }
            Ok(())
        }
        Err(e) => {
            // Window invalidated: keep the cursor where it was, flag the error.
            if let Err(progress_err) = progress::update_progress(
                ctx.db.pool(),
                chain_id,
                Stream::Swaps,
                scope,
                window.from as i64 - 1,
                Some("error"),
                Some(&e.to_string()),
            )
            .await
            {
                tracing::warn!(
                    pool_address = %pool.pool_address,
                    error = %progress_err,
                    "Failed to record swap stream error state"
                );
            }
            Err(e)
        }
    }
}

/// `Ok(true)` when persisted, `Ok(false)` when skipped (dedup hit or decode
/// failure), `Err` on a store write failure so the window is not advanced.
async fn process_swap_log(
    ctx: &ChainContext,
    pool: &Pool,
    log: &Log,
    timestamp: DateTime<Utc>,
) -> eyre::Result<bool> {
    let parts = match LogParts::parse(log) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::warn!(tx_hash = %log.transaction_hash, error = %e, "Skipping malformed swap log");
            return Ok(false);
        }
    };

    let marker = keys::swap_processed(&parts.tx_hash, parts.log_index);
    match ctx.cache.exists(&marker).await {
        Ok(true) => {
            tracing::debug!(tx_hash = %parts.tx_hash, log_index = parts.log_index, "Swap already processed");
            return Ok(false);
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Dedup cache unavailable, falling through to store");
        }
    }

    let swap = match parse_swap(&parts, pool, timestamp) {
        Ok(swap) => swap,
        Err(e) => {
            tracing::warn!(
                tx_hash = %parts.tx_hash,
                pool_address = %pool.pool_address,
                error = %e,
                "Skipping undecodable swap log"
            );
            return Ok(false);
        }
    };

    match repository::insert_swap(ctx.db.pool(), &swap).await {
        Ok(()) => {
            if let Err(e) = ctx.cache.set_marker(&marker, SWAP_MARKER_TTL).await {
                tracing::warn!(tx_hash = %swap.tx_hash, error = %e, "Failed to write swap marker");
            }
            Ok(true)
        }
        Err(e) => {
            if let Err(cache_err) = ctx.cache.delete(&marker).await {
                tracing::error!(
                    tx_hash = %swap.tx_hash,
                    error = %cache_err,
                    "Failed to clear swap marker after store failure"
                );
            }
            tracing::error!(tx_hash = %swap.tx_hash, error = %e, "Failed to persist swap");
            Err(e)
        }
    }
}

fn parse_swap(
    parts: &LogParts,
    pool: &Pool,
    timestamp: DateTime<Utc>,
) -> Result<SwapEvent, DecodeError> {
    match pool.protocol {
        p if p.is_v2_family() => v2::parse_swap(parts, pool, timestamp),
        p if p.is_v3_family() => v3::parse_swap(parts, pool, timestamp),
        Protocol::UniswapV4 => v4::parse_swap(parts, pool, timestamp),
        Protocol::BalancerV2 => balancer::parse_swap(parts, pool, timestamp),
        Protocol::Curve => curve::parse_token_exchange(parts, pool, timestamp),
        other => Err(DecodeError::Other(format!("no swap decoder for {other}"))),
    }
}

/// V4 ModifyLiquidity drain for one pool, on its own progress stream.
async fn process_pool_liquidity(ctx: &ChainContext, pool: &Pool) -> eyre::Result<()> {
    let chain_id = ctx.chain_id();
    let scope = Some(pool.pool_address.as_str());

    let Some(entry) = ctx.chain.protocol_entry(pool.protocol) else {
        return Ok(());
    };
    let Some(liquidity_topic) = entry.modify_liquidity_topic.as_deref() else {
        tracing::debug!(protocol = %pool.protocol, "No liquidity topic configured");
        return Ok(());
    };

    let cursor = progress::get_progress(ctx.db.pool(), chain_id, Stream::Liquidity, scope).await?;
    let head = ctx.rpc.latest_block().await?;
    let from = pool_stream_start(
        cursor.as_ref().map(|c| c.last_processed_block),
        pool.creation_block,
        head,
        ctx.max_blocks_per_request(),
    );

    let Some(window) = clamp_window(
        from,
        head,
        ctx.max_blocks_per_request(),
        ctx.chain.confirmation_blocks,
    ) else {
        return Ok(());
    };

    let (source_address, pool_id) = pool.log_source();
    let mut topics = vec![liquidity_topic.to_string()];
    if let Some(pool_id) = pool_id {
        topics.push(format!("0x{pool_id}"));
    }

    let outcome = async {
        let logs = ctx
            .rpc
            .logs(window.from, window.to, Some(source_address), Some(topics))
            .await?;

        let mut stored = 0usize;
        let mut store_error: Option<eyre::Report> = None;
        for (block_number, block_logs) in group_logs_by_block(logs) {
            let timestamp = ctx.rpc.block_timestamp(block_number).await?;
            for log in &block_logs {
                let parts = match LogParts::parse(log) {
                    Ok(parts) => parts,
                    Err(e) => {
                        tracing::warn!(tx_hash = %log.transaction_hash, error = %e, "Skipping malformed liquidity log");
                        continue;
                    }
                };
                match v4::parse_modify_liquidity(&parts, pool, timestamp) {
                    Ok(event) => match repository::insert_liquidity(ctx.db.pool(), &event).await {
                        Ok(()) => stored += 1,
                        Err(e) => {
                            // Siblings keep going; the window is surfaced as
                            // failed so the cursor stays put.
                            tracing::error!(
                                tx_hash = %parts.tx_hash,
                                error = %e,
                                "Failed to persist liquidity event"
                            );
                            store_error = Some(store_error.unwrap_or(e));
                        }
                    },
                    Err(e) => {
                        tracing::warn!(
                            tx_hash = %parts.tx_hash,
                            error = %e,
                            "Skipping undecodable liquidity log"
                        );
                    }
                }
            }
        }
        if let Some(e) = store_error {
            return Err(e);
        }
        Ok::<usize, eyre::Report>(stored)
    }
    .await;

    match outcome {
        Ok(stored) => {
            progress::update_progress(
                ctx.db.pool(),
                chain_id,
                Stream::Liquidity,
                scope,
                window.to as i64,
                Some("running"),
                None,
            )
            .await?;

            if stored > 0 {
                tracing::info!(
                    chain_id,
                    pool_address = %pool.pool_address,
                    events = stored,
                    from = window.from,
                    to = window.to,
                    "Processed liquidity events"
                );
            }
            Ok(())
        }
        Err(e) => {
            // Window invalidated: keep the cursor where it was, flag the error.
            if let Err(progress_err) = progress::update_progress(
                ctx.db.pool(),
                chain_id,
                Stream::Liquidity,
                scope,
                window.from as i64 - 1,
                Some("error"),
                Some(&e.to_string()),
            )
            .await
            {
                tracing::warn!(
                    pool_address = %pool.pool_address,
                    error = %progress_err,
                    "Failed to record liquidity stream error state"
                );
            }
            Err(e)
        }
    }
}
