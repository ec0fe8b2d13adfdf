use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::{keys, TOKEN_GUARD_TTL};
use crate::config::ContractEntry;
use crate::db::{progress, repository};
use crate::decode::abi::LogParts;
use crate::decode::{coins, ParserId};
use crate::indexer::scheduler::{clamp_window, first_run_start, max_scan_window};
use crate::indexer::{group_logs_by_block, ChainContext};
use crate::models::{Stream, Token, TokenStatus};
use crate::rpc::Log;

/// Coin-creation stream: watches the launchpad contracts from the chain's
/// contract catalog and persists every newly launched token.
pub async fn run_coin_indexer_loop(ctx: ChainContext) {
    let chain_id = ctx.chain_id();
    if ctx.registry.is_empty() {
        tracing::info!(chain_id, "No coin contracts configured, coin stream idle");
        return;
    }

    tracing::info!(
        chain_id,
        stream = %Stream::CoinTokens,
        interval = ctx.settings.worker_interval_seconds,
        "Coin indexer started"
    );

    while !ctx.cancel.is_cancelled() {
        let lock = keys::coin_indexer_lock(chain_id);
        match ctx
            .cache
            .acquire_lock(&lock, ctx.settings.lock_timeout_seconds)
            .await
        {
            Ok(true) => {
                let outcome = index_coins_tick(&ctx).await;
                if let Err(e) = ctx.cache.release_lock(&lock).await {
                    tracing::warn!(chain_id, error = %e, "Failed to release coin indexer lock");
                }
                if let Err(e) = outcome {
                    tracing::error!(
                        chain_id,
                        stream = %Stream::CoinTokens,
                        error = %e,
                        "Coin indexing tick failed"
                    );
                    if !ctx.sleep(ctx.settings.worker_retry_delay).await {
                        break;
                    }
                    continue;
                }
            }
            Ok(false) => {
                tracing::debug!(chain_id, "Another worker is indexing coins, skipping tick");
            }
            Err(e) => {
                tracing::warn!(chain_id, error = %e, "Coin indexer lock unavailable");
            }
        }

        if !ctx.sleep(ctx.settings.worker_interval_seconds).await {
            break;
        }
    }

    tracing::info!(chain_id, stream = %Stream::CoinTokens, "Coin indexer stopped");
}

async fn index_coins_tick(ctx: &ChainContext) -> eyre::Result<()> {
    let chain_id = ctx.chain_id();
    let cursor = progress::get_progress(ctx.db.pool(), chain_id, Stream::CoinTokens, None).await?;
    let head = ctx.rpc.latest_block().await?;

    let contracts: Vec<ContractEntry> = ctx
        .chain
        .enabled_contracts()
        .map(|(_, entry)| entry.clone())
        .collect();
    if contracts.is_empty() {
        return Ok(());
    }

    let from = match &cursor {
        Some(c) => c.last_processed_block as u64 + 1,
        None => {
            let declared: Vec<u64> = contracts
                .iter()
                .filter_map(|c| c.creation_block)
                .filter(|&b| b <= head)
                .collect();
            let start = first_run_start(
                &declared,
                head,
                ctx.chain.start_block,
                max_scan_window(ctx.max_blocks_per_request()),
            );
            tracing::info!(
                chain_id,
                head,
                start_block = start,
                "First run, computed coin scan start"
            );
            start
        }
    };

    let Some(window) = clamp_window(
        from,
        head,
        ctx.max_blocks_per_request(),
        ctx.chain.confirmation_blocks,
    ) else {
        tracing::debug!(chain_id, from, head, "No new blocks for coin stream");
        return Ok(());
    };

    tracing::info!(
        chain_id,
        stream = %Stream::CoinTokens,
        from = window.from,
        to = window.to,
        contracts = contracts.len(),
        "Indexing coin creations"
    );

    let semaphore = Arc::new(Semaphore::new(ctx.settings.max_concurrent_contracts));
    let mut join = JoinSet::new();
    for contract in contracts {
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();
        let (window_from, window_to) = (window.from, window.to);
        join.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let address = contract.address.clone();
            (
                address,
                index_contract_window(&ctx, &contract, window_from, window_to).await,
            )
        });
    }

    let mut processed = 0usize;
    let mut first_failure: Option<String> = None;
    let mut failure_count = 0usize;
    while let Some(joined) = join.join_next().await {
        match joined {
            Ok((_, Ok(count))) => processed += count,
            Ok((address, Err(e))) => {
                tracing::error!(chain_id, contract = %address, error = %e, "Contract window failed");
                failure_count += 1;
                first_failure.get_or_insert_with(|| format!("{address}: {e}"));
            }
            Err(e) => {
                failure_count += 1;
                first_failure.get_or_insert_with(|| format!("worker task failed: {e}"));
            }
        }
    }

    if failure_count > 0 {
        let message = format!(
            "{failure_count} contract window(s) failed, cursor held: {}",
            first_failure.unwrap_or_default()
        );
        progress::update_progress(
            ctx.db.pool(),
            chain_id,
            Stream::CoinTokens,
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
        Stream::CoinTokens,
        None,
        window.to as i64,
        Some("running"),
        None,
    )
    .await?;

    if processed > 0 {
        if let Err(e) = ctx
            .cache
            .increment(&keys::stats_counter(chain_id, "tokens_processed"), processed as i64)
            .await
        {
            tracing::warn!(chain_id, error = %e, "Failed to bump token stats counter");
        }
        tracing::info!(
            chain_id,
            tokens = processed,
            from = window.from,
            to = window.to,
            "Processed new tokens"
        );
    }

    Ok(())
}

/// One contract's slice of the window. Logs are fetched unfiltered (a
/// contract can carry several registered events) and dispatched per topic0.
async fn index_contract_window(
    ctx: &ChainContext,
    contract: &ContractEntry,
    from: u64,
    to: u64,
) -> eyre::Result<usize> {
    let from = from.max(contract.creation_block.unwrap_or(0));
    if from > to {
        return Ok(0);
    }

    let logs = ctx
        .rpc
        .logs(from, to, Some(&contract.address), None)
        .await?;
    if logs.is_empty() {
        return Ok(0);
    }

    tracing::debug!(
        contract = %contract.address,
        count = logs.len(),
        "Fetched launchpad contract logs"
    );

    let mut processed = 0usize;
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
            let block_slots = block_slots.clone();
            join.spawn(async move {
                let _slot = block_slots.acquire_owned().await;
                process_coin_block(&ctx, block_number, block_logs).await
            });
        }

        let mut batch_error: Option<eyre::Report> = None;
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(Ok(count)) => processed += count,
                Ok(Err(e)) => batch_error = Some(batch_error.unwrap_or(e)),
                Err(e) => batch_error = Some(batch_error.unwrap_or_else(|| eyre::eyre!(e))),
            }
        }
        if let Some(e) = batch_error {
            return Err(e);
        }
    }

    Ok(processed)
}

async fn process_coin_block(
    ctx: &ChainContext,
    block_number: u64,
    logs: Vec<Log>,
) -> eyre::Result<usize> {
    let timestamp = ctx.rpc.block_timestamp(block_number).await?;

    let mut processed = 0usize;
    let mut store_error: Option<eyre::Report> = None;
    for log in &logs {
        let parts = match LogParts::parse(log) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(tx_hash = %log.transaction_hash, error = %e, "Skipping malformed log");
                continue;
            }
        };
        let Some(topic0) = parts.topics.first() else {
            continue;
        };
        let Some(parser) = ctx.registry.route(&parts.address, topic0) else {
            continue; // unrelated event from the same contract
        };

        match decode_coin_event(parser, &parts, timestamp) {
            Ok(Some(event)) => {
                let token = event.into_token(ctx.chain_id());
                match process_token(ctx, token).await {
                    Ok(true) => processed += 1,
                    Ok(false) => {}
                    Err(e) => store_error = Some(store_error.unwrap_or(e)),
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    tx_hash = %log.transaction_hash,
                    parser = parser.as_str(),
                    error = %e,
                    "Skipping undecodable coin creation log"
                );
            }
        }
    }

    match store_error {
        Some(e) => Err(e),
        None => Ok(processed),
    }
}

fn decode_coin_event(
    parser: ParserId,
    parts: &LogParts,
    timestamp: DateTime<Utc>,
) -> eyre::Result<Option<coins::CoinCreationEvent>> {
    let event = match parser {
        ParserId::CreatorCoin => coins::parse_creator_coin(parts, timestamp)?,
        ParserId::Clanker => coins::parse_clanker_token(parts, timestamp)?,
        other => {
            tracing::warn!(parser = other.as_str(), "Parser does not decode coin events");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Guarded persist + fan-out for one token. The in-flight guard keeps two
/// workers off the same token; it is always dropped afterwards so the
/// idempotent upsert can be retried. A store failure is returned so the
/// window is held back.
async fn process_token(ctx: &ChainContext, token: Token) -> eyre::Result<bool> {
    let chain_id = ctx.chain_id();
    let guard = keys::token_processing(chain_id, &token.token_address);

    match ctx.cache.try_set_guard(&guard, TOKEN_GUARD_TTL).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(token = %token.token_address, "Token already being processed, skipping");
            return Ok(false);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Token guard unavailable, falling through to store");
        }
    }

    let stored = repository::upsert_token(ctx.db.pool(), &token).await;
    let outcome = match stored {
        Ok(()) => {
            ctx.sinks.announce_token(&token, ctx.chain_name()).await;
            tracing::info!(
                chain_id,
                token = %token.token_address,
                name = %token.name,
                symbol = %token.symbol,
                source = token.source.as_str(),
                creator = %token.creator,
                "Processed new token"
            );
            Ok(true)
        }
        Err(e) => {
            tracing::error!(token = %token.token_address, error = %e, "Failed to persist token");
            if let Err(status_err) = repository::update_token_status(
                ctx.db.pool(),
                chain_id,
                &token.token_address,
                TokenStatus::Error.as_str(),
                Some(&e.to_string()),
            )
            .await
            {
                tracing::error!(
                    token = %token.token_address,
                    error = %status_err,
                    "Failed to record token error status"
                );
            }
            Err(e)
        }
    };

    if let Err(e) = ctx.cache.delete(&guard).await {
        tracing::warn!(token = %token.token_address, error = %e, "Failed to drop token guard");
    }
    outcome
}
