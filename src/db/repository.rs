use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;

use crate::models::{LiquidityEvent, Pool, PoolStatus, Protocol, SwapEvent, Token};

/// Idempotent pool upsert keyed on `(chain_id, pool_address)`. Indexing
/// bookkeeping fields (`status`, `last_indexed_block`) are preserved on
/// conflict; the descriptive fields follow the newest observation.
pub async fn upsert_pool(pool: &PgPool, p: &Pool) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO pools (chain_id, pool_address, protocol, token0_address, token1_address, \
         factory_address, fee_tier, tick_spacing, hooks_address, sqrt_price_x96, current_tick, \
         liquidity, reserve0, reserve1, creation_block, creation_tx_hash, creation_timestamp, \
         status, last_indexed_block, metadata, state_updated_at, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
                 $18, $19, $20, $21, NOW(), NOW())
         ON CONFLICT (chain_id, pool_address) DO UPDATE SET
             protocol = EXCLUDED.protocol,
             token0_address = EXCLUDED.token0_address,
             token1_address = EXCLUDED.token1_address,
             factory_address = EXCLUDED.factory_address,
             fee_tier = EXCLUDED.fee_tier,
             tick_spacing = EXCLUDED.tick_spacing,
             hooks_address = EXCLUDED.hooks_address,
             sqrt_price_x96 = COALESCE(EXCLUDED.sqrt_price_x96, pools.sqrt_price_x96),
             current_tick = COALESCE(EXCLUDED.current_tick, pools.current_tick),
             liquidity = COALESCE(EXCLUDED.liquidity, pools.liquidity),
             reserve0 = COALESCE(EXCLUDED.reserve0, pools.reserve0),
             reserve1 = COALESCE(EXCLUDED.reserve1, pools.reserve1),
             metadata = EXCLUDED.metadata,
             updated_at = NOW()",
    )
    .bind(p.chain_id)
    .bind(&p.pool_address)
    .bind(p.protocol.as_str())
    .bind(&p.token0_address)
    .bind(&p.token1_address)
    .bind(&p.factory_address)
    .bind(&p.fee_tier)
    .bind(&p.tick_spacing)
    .bind(&p.hooks_address)
    .bind(&p.sqrt_price_x96)
    .bind(&p.current_tick)
    .bind(&p.liquidity)
    .bind(&p.reserve0)
    .bind(&p.reserve1)
    .bind(p.creation_block)
    .bind(&p.creation_tx_hash)
    .bind(p.creation_timestamp)
    .bind(p.status.as_str())
    .bind(p.last_indexed_block)
    .bind(&p.metadata)
    .bind(p.state_updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct PoolRow {
    chain_id: i64,
    pool_address: String,
    protocol: String,
    token0_address: String,
    token1_address: String,
    factory_address: String,
    fee_tier: Option<String>,
    tick_spacing: Option<String>,
    hooks_address: Option<String>,
    sqrt_price_x96: Option<String>,
    current_tick: Option<String>,
    liquidity: Option<String>,
    reserve0: Option<String>,
    reserve1: Option<String>,
    creation_block: i64,
    creation_tx_hash: String,
    creation_timestamp: DateTime<Utc>,
    status: String,
    last_indexed_block: i64,
    metadata: serde_json::Value,
    state_updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<PoolRow> for Pool {
    type Error = eyre::Report;

    fn try_from(row: PoolRow) -> Result<Self, Self::Error> {
        Ok(Pool {
            chain_id: row.chain_id,
            pool_address: row.pool_address,
            protocol: Protocol::from_str(&row.protocol).map_err(|e| eyre::eyre!(e))?,
            token0_address: row.token0_address,
            token1_address: row.token1_address,
            factory_address: row.factory_address,
            fee_tier: row.fee_tier,
            tick_spacing: row.tick_spacing,
            hooks_address: row.hooks_address,
            sqrt_price_x96: row.sqrt_price_x96,
            current_tick: row.current_tick,
            liquidity: row.liquidity,
            reserve0: row.reserve0,
            reserve1: row.reserve1,
            creation_block: row.creation_block,
            creation_tx_hash: row.creation_tx_hash,
            creation_timestamp: row.creation_timestamp,
            status: PoolStatus::from_str(&row.status).map_err(|e| eyre::eyre!(e))?,
            last_indexed_block: row.last_indexed_block,
            metadata: row.metadata,
            state_updated_at: row.state_updated_at,
        })
    }
}

const POOL_COLUMNS: &str = "chain_id, pool_address, protocol, token0_address, token1_address, \
     factory_address, fee_tier, tick_spacing, hooks_address, sqrt_price_x96, current_tick, \
     liquidity, reserve0, reserve1, creation_block, creation_tx_hash, creation_timestamp, \
     status, last_indexed_block, metadata, state_updated_at";

/// Pools of a chain for the swap scheduler, newest first. Rows with a
/// protocol this build does not know are skipped with a warning rather than
/// failing the whole enumeration.
pub async fn pools_by_chain(pool: &PgPool, chain_id: i64, limit: i64) -> eyre::Result<Vec<Pool>> {
    let rows: Vec<PoolRow> = sqlx::query_as(&format!(
        "SELECT {POOL_COLUMNS} FROM pools WHERE chain_id = $1 \
         ORDER BY creation_block DESC LIMIT $2"
    ))
    .bind(chain_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut pools = Vec::with_capacity(rows.len());
    for row in rows {
        let address = row.pool_address.clone();
        match Pool::try_from(row) {
            Ok(p) => pools.push(p),
            Err(e) => {
                tracing::warn!(pool_address = %address, error = %e, "Skipping unreadable pool row")
            }
        }
    }
    Ok(pools)
}

pub async fn get_pool(
    pool: &PgPool,
    chain_id: i64,
    pool_address: &str,
) -> eyre::Result<Option<Pool>> {
    let row: Option<PoolRow> = sqlx::query_as(&format!(
        "SELECT {POOL_COLUMNS} FROM pools WHERE chain_id = $1 AND pool_address = $2"
    ))
    .bind(chain_id)
    .bind(pool_address)
    .fetch_optional(pool)
    .await?;

    row.map(Pool::try_from).transpose()
}

pub async fn update_pool_status(
    pool: &PgPool,
    chain_id: i64,
    pool_address: &str,
    status: PoolStatus,
    last_indexed_block: i64,
) -> eyre::Result<()> {
    sqlx::query(
        "UPDATE pools SET status = $3, last_indexed_block = GREATEST(last_indexed_block, $4), \
         updated_at = NOW() WHERE chain_id = $1 AND pool_address = $2",
    )
    .bind(chain_id)
    .bind(pool_address)
    .bind(status.as_str())
    .bind(last_indexed_block)
    .execute(pool)
    .await?;

    Ok(())
}

/// State refresher write path: only the live-state columns move.
pub async fn update_pool_state(
    pool: &PgPool,
    chain_id: i64,
    pool_address: &str,
    sqrt_price_x96: Option<&str>,
    current_tick: Option<&str>,
    liquidity: Option<&str>,
    reserve0: Option<&str>,
    reserve1: Option<&str>,
) -> eyre::Result<()> {
    sqlx::query(
        "UPDATE pools SET \
             sqrt_price_x96 = COALESCE($3, sqrt_price_x96), \
             current_tick = COALESCE($4, current_tick), \
             liquidity = COALESCE($5, liquidity), \
             reserve0 = COALESCE($6, reserve0), \
             reserve1 = COALESCE($7, reserve1), \
             state_updated_at = NOW(), updated_at = NOW() \
         WHERE chain_id = $1 AND pool_address = $2",
    )
    .bind(chain_id)
    .bind(pool_address)
    .bind(sqrt_price_x96)
    .bind(current_tick)
    .bind(liquidity)
    .bind(reserve0)
    .bind(reserve1)
    .execute(pool)
    .await?;

    Ok(())
}

/// Append-only swap insert; replays hit the `(tx_hash, log_index)` unique key
/// and become no-ops.
pub async fn insert_swap(pool: &PgPool, event: &SwapEvent) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO swap_events (tx_hash, log_index, pool_address, chain_id, block_number, \
         block_timestamp, sender, recipient, amount0_in, amount1_in, amount0_out, amount1_out, \
         created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
         ON CONFLICT (tx_hash, log_index) DO NOTHING",
    )
    .bind(&event.tx_hash)
    .bind(event.log_index)
    .bind(&event.pool_address)
    .bind(event.chain_id)
    .bind(event.block_number)
    .bind(event.block_timestamp)
    .bind(&event.sender)
    .bind(&event.recipient)
    .bind(&event.amount0_in)
    .bind(&event.amount1_in)
    .bind(&event.amount0_out)
    .bind(&event.amount1_out)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn insert_liquidity(pool: &PgPool, event: &LiquidityEvent) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO pool_liquidity (tx_hash, log_index, pool_address, chain_id, block_number, \
         block_timestamp, sender, tick_lower, tick_upper, liquidity_delta, salt, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
         ON CONFLICT (tx_hash, log_index) DO NOTHING",
    )
    .bind(&event.tx_hash)
    .bind(event.log_index)
    .bind(&event.pool_address)
    .bind(event.chain_id)
    .bind(event.block_number)
    .bind(event.block_timestamp)
    .bind(&event.sender)
    .bind(event.tick_lower)
    .bind(event.tick_upper)
    .bind(&event.liquidity_delta)
    .bind(&event.salt)
    .execute(pool)
    .await?;

    Ok(())
}

/// Idempotent token upsert keyed on `(chain_id, token_address)`.
pub async fn upsert_token(pool: &PgPool, t: &Token) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO tokens (chain_id, token_address, source, name, symbol, creator, admin, \
         payout_recipient, platform_referrer, base_currency, paired_token, pool_id, \
         pool_key_hash, fee_tier, tick_spacing, starting_tick, hooks_address, image_url, \
         metadata_uri, metadata_json, context_json, locker_address, mev_module, \
         contract_version, creation_block, creation_tx_hash, creation_timestamp, \
         creation_contract, status, error_message, raw_event, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
                 $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, NOW(), NOW())
         ON CONFLICT (chain_id, token_address) DO UPDATE SET
             name = EXCLUDED.name,
             symbol = EXCLUDED.symbol,
             image_url = EXCLUDED.image_url,
             metadata_uri = EXCLUDED.metadata_uri,
             metadata_json = EXCLUDED.metadata_json,
             context_json = EXCLUDED.context_json,
             raw_event = EXCLUDED.raw_event,
             updated_at = NOW()",
    )
    .bind(t.chain_id)
    .bind(&t.token_address)
    .bind(t.source.as_str())
    .bind(&t.name)
    .bind(&t.symbol)
    .bind(&t.creator)
    .bind(&t.admin)
    .bind(&t.payout_recipient)
    .bind(&t.platform_referrer)
    .bind(&t.base_currency)
    .bind(&t.paired_token)
    .bind(&t.pool_id)
    .bind(&t.pool_key_hash)
    .bind(t.fee_tier)
    .bind(t.tick_spacing)
    .bind(t.starting_tick)
    .bind(&t.hooks_address)
    .bind(&t.image_url)
    .bind(&t.metadata_uri)
    .bind(&t.metadata_json)
    .bind(&t.context_json)
    .bind(&t.locker_address)
    .bind(&t.mev_module)
    .bind(&t.contract_version)
    .bind(t.creation_block)
    .bind(&t.creation_tx_hash)
    .bind(t.creation_timestamp)
    .bind(&t.creation_contract)
    .bind(t.status.as_str())
    .bind(&t.error_message)
    .bind(&t.raw_event)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn update_token_status(
    pool: &PgPool,
    chain_id: i64,
    token_address: &str,
    status: &str,
    error_message: Option<&str>,
) -> eyre::Result<()> {
    sqlx::query(
        "UPDATE tokens SET status = $3, error_message = $4, updated_at = NOW() \
         WHERE chain_id = $1 AND token_address = $2",
    )
    .bind(chain_id)
    .bind(token_address)
    .bind(status)
    .bind(error_message)
    .execute(pool)
    .await?;

    Ok(())
}
