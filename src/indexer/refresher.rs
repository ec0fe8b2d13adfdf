use futures::future::join_all;

use crate::cache::keys;
use crate::db::repository;
use crate::decode::abi;
use crate::indexer::ChainContext;
use crate::models::{Pool, PoolStatus};

// Pool contract selectors.
const SLOT0_SIG: &str = "0x3850c7bd";
const LIQUIDITY_SIG: &str = "0x1a686502";
const GET_RESERVES_SIG: &str = "0x0902f1ac";

/// Skip pools whose state was refreshed within the last hour.
const REFRESH_MIN_AGE_SECS: i64 = 3600;

/// Optional worker keeping V3 slot0/liquidity and V2 reserves current.
/// Runs far less often than the indexing streams.
pub async fn run_pool_state_refresher(ctx: ChainContext) {
    let chain_id = ctx.chain_id();
    let interval = (ctx.settings.worker_interval_seconds * 5).max(300);

    tracing::info!(chain_id, interval, "Pool state refresher started");

    while !ctx.cancel.is_cancelled() {
        let lock = keys::pool_state_refresh_lock(chain_id);
        match ctx
            .cache
            .acquire_lock(&lock, ctx.settings.lock_timeout_seconds)
            .await
        {
            Ok(true) => {
                if let Err(e) = refresh_tick(&ctx).await {
                    tracing::error!(chain_id, error = %e, "Pool state refresh failed");
                }
                if let Err(e) = ctx.cache.release_lock(&lock).await {
                    tracing::warn!(chain_id, error = %e, "Failed to release refresh lock");
                }
            }
            Ok(false) => {
                tracing::debug!(chain_id, "Another worker is refreshing pool states");
            }
            Err(e) => {
                tracing::warn!(chain_id, error = %e, "Refresh lock unavailable");
            }
        }

        if !ctx.sleep(interval).await {
            break;
        }
    }

    tracing::info!(chain_id, "Pool state refresher stopped");
}

async fn refresh_tick(ctx: &ChainContext) -> eyre::Result<()> {
    let pools = repository::pools_by_chain(ctx.db.pool(), ctx.chain_id(), 1000).await?;
    tracing::debug!(chain_id = ctx.chain_id(), pools = pools.len(), "Refreshing pool states");

    for batch in pools.chunks(ctx.settings.worker_pool_size) {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let tasks = batch
            .iter()
            .filter(|pool| pool.status == PoolStatus::Active)
            .map(|pool| refresh_pool(ctx, pool));
        join_all(tasks).await;
    }
    Ok(())
}

async fn refresh_pool(ctx: &ChainContext, pool: &Pool) {
    if let Some(updated_at) = pool.state_updated_at {
        if (chrono::Utc::now() - updated_at).num_seconds() < REFRESH_MIN_AGE_SECS {
            return;
        }
    }

    let outcome = if pool.protocol.is_v3_family() {
        refresh_v3_state(ctx, pool).await
    } else if pool.protocol.is_v2_family() {
        refresh_v2_state(ctx, pool).await
    } else {
        // Singleton and vault pools carry their state in events.
        return;
    };

    if let Err(e) = outcome {
        tracing::warn!(
            pool_address = %pool.pool_address,
            protocol = %pool.protocol,
            error = %e,
            "Pool state refresh failed"
        );
    }
}

async fn refresh_v3_state(ctx: &ChainContext, pool: &Pool) -> eyre::Result<()> {
    let slot0_raw = ctx.rpc.call(&pool.pool_address, SLOT0_SIG).await?;
    let liquidity_raw = ctx.rpc.call(&pool.pool_address, LIQUIDITY_SIG).await?;

    let slot0 =
        abi::hex_bytes(&slot0_raw).and_then(|bytes| parse_slot0(&bytes));
    let liquidity = abi::hex_bytes(&liquidity_raw).and_then(|bytes| parse_uint_word(&bytes));

    let Some((sqrt_price, tick)) = slot0 else {
        return Err(eyre::eyre!("slot0 returned no data"));
    };

    repository::update_pool_state(
        ctx.db.pool(),
        pool.chain_id,
        &pool.pool_address,
        Some(&sqrt_price),
        Some(&tick.to_string()),
        liquidity.as_deref(),
        None,
        None,
    )
    .await?;

    tracing::debug!(pool_address = %pool.pool_address, sqrt_price, tick, "Refreshed V3 pool state");
    Ok(())
}

async fn refresh_v2_state(ctx: &ChainContext, pool: &Pool) -> eyre::Result<()> {
    let reserves_raw = ctx.rpc.call(&pool.pool_address, GET_RESERVES_SIG).await?;
    let Some((reserve0, reserve1)) =
        abi::hex_bytes(&reserves_raw).and_then(|bytes| parse_reserves(&bytes))
    else {
        return Err(eyre::eyre!("getReserves returned no data"));
    };

    repository::update_pool_state(
        ctx.db.pool(),
        pool.chain_id,
        &pool.pool_address,
        None,
        None,
        None,
        Some(&reserve0),
        Some(&reserve1),
    )
    .await?;

    tracing::debug!(pool_address = %pool.pool_address, reserve0, reserve1, "Refreshed V2 pool state");
    Ok(())
}

/// slot0(): sqrtPriceX96 in word 0, signed int24 tick in word 1.
fn parse_slot0(raw: &[u8]) -> Option<(String, i32)> {
    if raw.len() < 64 {
        return None;
    }
    let sqrt_price = alloy::primitives::U256::from_be_slice(&raw[0..32]).to_string();
    let tick = abi::word_i24(&raw[32..64]);
    Some((sqrt_price, tick))
}

/// getReserves(): reserve0, reserve1, blockTimestampLast.
fn parse_reserves(raw: &[u8]) -> Option<(String, String)> {
    if raw.len() < 64 {
        return None;
    }
    let reserve0 = alloy::primitives::U256::from_be_slice(&raw[0..32]).to_string();
    let reserve1 = alloy::primitives::U256::from_be_slice(&raw[32..64]).to_string();
    Some((reserve0, reserve1))
}

fn parse_uint_word(raw: &[u8]) -> Option<String> {
    if raw.len() < 32 {
        return None;
    }
    Some(alloy::primitives::U256::from_be_slice(&raw[0..32]).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot0_parses_price_and_negative_tick() {
        let mut raw = vec![0u8; 224];
        raw[31] = 0x64; // sqrtPriceX96 = 100
        raw[61..64].copy_from_slice(&[0xff, 0xff, 0xf6]); // tick = -10
        let (sqrt_price, tick) = parse_slot0(&raw).unwrap();
        assert_eq!(sqrt_price, "100");
        assert_eq!(tick, -10);
    }

    #[test]
    fn reserves_parse_as_decimal_strings() {
        let mut raw = vec![0u8; 96];
        raw[31] = 5;
        raw[63] = 9;
        let (r0, r1) = parse_reserves(&raw).unwrap();
        assert_eq!((r0.as_str(), r1.as_str()), ("5", "9"));
    }

    #[test]
    fn short_call_results_are_rejected() {
        assert!(parse_slot0(&[0u8; 32]).is_none());
        assert!(parse_reserves(&[0u8; 32]).is_none());
        assert!(parse_uint_word(&[]).is_none());
    }
}
