use alloy::primitives::I256;
use alloy::sol;
use chrono::{DateTime, Utc};

use crate::decode::abi::{self, DecodeError, LogParts};
use crate::models::{LiquidityEvent, Pool, PoolStatus, Protocol, SwapEvent};

// Uniswap V4 singleton PoolManager events. Pools have no contract of their
// own; every event carries the bytes32 poolId as its first indexed topic.
sol! {
    event Initialize(
        bytes32 indexed id,
        address indexed currency0,
        address indexed currency1,
        uint24 fee,
        int24 tickSpacing,
        address hooks,
        uint160 sqrtPriceX96,
        int24 tick
    );
    event Swap(
        bytes32 indexed id,
        address indexed sender,
        int128 amount0,
        int128 amount1,
        uint160 sqrtPriceX96,
        uint128 liquidity,
        int24 tick,
        uint24 fee
    );
    event ModifyLiquidity(
        bytes32 indexed id,
        address indexed sender,
        int24 tickLower,
        int24 tickUpper,
        int256 liquidityDelta,
        bytes32 salt
    );
}

/// The synthetic identifier for a V4 pool: the singleton manager address and
/// the poolId, joined with `#`.
pub fn synthetic_pool_id(manager: alloy::primitives::Address, pool_id: &str) -> String {
    format!("{}#{pool_id}", abi::addr_hex(manager))
}

/// Initialize: three indexed params (poolId, currency0, currency1), five data
/// slots (fee, tickSpacing, hooks, sqrtPriceX96, tick).
pub fn parse_initialize(
    parts: &LogParts,
    chain_id: i64,
    block_timestamp: DateTime<Utc>,
) -> Result<Pool, DecodeError> {
    parts.require_topics(4)?;
    let pool_id = hex::encode(parts.topic(1)?);
    let token0 = parts.topic_address(2)?;
    let token1 = parts.topic_address(3)?;

    let fee_tier = parts.u256_at(0)?;
    let tick_spacing = parts.i24_at(1)?;
    let hooks = parts.address_at(2)?;
    let sqrt_price_x96 = parts.u256_at(3)?;
    let current_tick = parts.i24_at(4)?;

    let manager = parts.address;
    let pool_address = synthetic_pool_id(manager, &pool_id);

    Ok(Pool {
        chain_id,
        pool_address,
        protocol: Protocol::UniswapV4,
        token0_address: abi::addr_hex(token0),
        token1_address: abi::addr_hex(token1),
        factory_address: abi::addr_hex(manager),
        fee_tier: Some(fee_tier.to_string()),
        tick_spacing: Some(tick_spacing.to_string()),
        hooks_address: Some(abi::addr_hex(hooks)),
        sqrt_price_x96: Some(sqrt_price_x96.to_string()),
        current_tick: Some(current_tick.to_string()),
        liquidity: None,
        reserve0: None,
        reserve1: None,
        creation_block: parts.block_number as i64,
        creation_tx_hash: parts.tx_hash.clone(),
        creation_timestamp: block_timestamp,
        status: PoolStatus::Active,
        last_indexed_block: 0,
        metadata: serde_json::json!({
            "pool_id": pool_id,
            "hooks_address": abi::addr_hex(hooks),
            "singleton_manager": true,
            "pool_manager": abi::addr_hex(manager),
        }),
        state_updated_at: None,
    })
}

/// V4 Swap: signed int128 amounts, recipient not part of the event.
pub fn parse_swap(
    parts: &LogParts,
    pool: &Pool,
    block_timestamp: DateTime<Utc>,
) -> Result<SwapEvent, DecodeError> {
    parts.require_topics(3)?;
    let pool_id = hex::encode(parts.topic(1)?);
    let sender = parts.topic_address(2)?;

    if let (_, Some(expected)) = pool.log_source() {
        if pool_id != expected {
            tracing::warn!(
                pool_address = %pool.pool_address,
                event_pool_id = %pool_id,
                "poolId mismatch in V4 swap event"
            );
        }
    }

    let amount0 = I256::try_from(parts.i128_at(0)?).unwrap_or_default();
    let amount1 = I256::try_from(parts.i128_at(1)?).unwrap_or_default();
    let (amount0_in, amount0_out) = abi::signed_in_out(amount0);
    let (amount1_in, amount1_out) = abi::signed_in_out(amount1);

    let sender_hex = abi::addr_hex(sender);
    Ok(SwapEvent {
        tx_hash: parts.tx_hash.clone(),
        log_index: parts.log_index,
        pool_address: pool.pool_address.clone(),
        chain_id: pool.chain_id,
        block_number: parts.block_number as i64,
        block_timestamp,
        recipient: sender_hex.clone(),
        sender: sender_hex,
        amount0_in,
        amount1_in,
        amount0_out,
        amount1_out,
    })
}

/// ModifyLiquidity: tick bounds and the signed liquidity delta, plus the
/// position salt.
pub fn parse_modify_liquidity(
    parts: &LogParts,
    pool: &Pool,
    block_timestamp: DateTime<Utc>,
) -> Result<LiquidityEvent, DecodeError> {
    parts.require_topics(3)?;
    let pool_id = hex::encode(parts.topic(1)?);
    let sender = parts.topic_address(2)?;

    if let (_, Some(expected)) = pool.log_source() {
        if pool_id != expected {
            tracing::warn!(
                pool_address = %pool.pool_address,
                event_pool_id = %pool_id,
                "poolId mismatch in V4 ModifyLiquidity event"
            );
        }
    }

    let tick_lower = parts.i24_at(0)?;
    let tick_upper = parts.i24_at(1)?;
    let liquidity_delta = parts.i256_at(2)?;
    let salt = hex::encode(parts.word(3)?);

    Ok(LiquidityEvent {
        tx_hash: parts.tx_hash.clone(),
        log_index: parts.log_index,
        pool_address: pool.pool_address.clone(),
        chain_id: pool.chain_id,
        block_number: parts.block_number as i64,
        block_timestamp,
        sender: abi::addr_hex(sender),
        tick_lower,
        tick_upper,
        liquidity_delta: abi::decimal(&liquidity_delta.to_string()),
        salt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testutil::{address_topic, parts, sample_pool};

    const MANAGER: &str = "0x498581ff718922c3f8e6a244956af099b2652b2b";
    const POOL_ID: &str = "abcd00000000000000000000000000000000000000000000000000000000ef01";

    fn pool_id_topic() -> String {
        format!("0x{POOL_ID}")
    }

    #[test]
    fn initialize_builds_synthetic_pool_address() {
        let mut data = vec![0u8; 160];
        data[30] = 0x0b; // fee = 0x0bb8 = 3000
        data[31] = 0xb8;
        data[63] = 60; // tickSpacing
        data[76..96].copy_from_slice(&[0x99u8; 20]); // hooks
        data[127] = 0x50; // sqrtPriceX96 = 80
        data[157..160].copy_from_slice(&[0xff, 0xff, 0xf6]); // tick = -10

        let parts = parts(
            MANAGER,
            &[
                "0x0000000000000000000000000000000000000000000000000000000000000001",
                &pool_id_topic(),
                &address_topic("000000000000000000000000000000000000dead"),
                &address_topic("000000000000000000000000000000000000beef"),
            ],
            data,
            77,
        );

        let pool = parse_initialize(&parts, 8453, Utc::now()).unwrap();
        assert_eq!(pool.pool_address, format!("{MANAGER}#{POOL_ID}"));
        assert_eq!(pool.protocol, Protocol::UniswapV4);
        assert_eq!(pool.fee_tier.as_deref(), Some("3000"));
        assert_eq!(pool.tick_spacing.as_deref(), Some("60"));
        assert_eq!(pool.sqrt_price_x96.as_deref(), Some("80"));
        assert_eq!(pool.current_tick.as_deref(), Some("-10"));
        assert_eq!(
            pool.hooks_address.as_deref(),
            Some("0x9999999999999999999999999999999999999999")
        );
        assert_eq!(pool.metadata["pool_id"], serde_json::json!(POOL_ID));
    }

    #[test]
    fn v4_swap_decodes_signed_int128_amounts() {
        let mut data = vec![0u8; 192];
        // amount0 = -7 (int128, sign-extended across the full slot)
        data[0..32].copy_from_slice(&[0xffu8; 32]);
        data[16..32].copy_from_slice(&(-7i128).to_be_bytes());
        // amount1 = 9
        data[48..64].copy_from_slice(&9i128.to_be_bytes());

        let parts = parts(
            MANAGER,
            &[
                "0x0000000000000000000000000000000000000000000000000000000000000002",
                &pool_id_topic(),
                &address_topic("00000000000000000000000000000000000000aa"),
            ],
            data,
            88,
        );

        let mut pool = sample_pool(Protocol::UniswapV4);
        pool.pool_address = format!("{MANAGER}#{POOL_ID}");

        let swap = parse_swap(&parts, &pool, Utc::now()).unwrap();
        assert_eq!(swap.amount0_in.to_string(), "7");
        assert_eq!(swap.amount0_out.to_string(), "0");
        assert_eq!(swap.amount1_in.to_string(), "0");
        assert_eq!(swap.amount1_out.to_string(), "9");
        assert_eq!(swap.sender, swap.recipient);
    }

    #[test]
    fn modify_liquidity_decodes_bounds_and_delta() {
        let mut data = vec![0u8; 128];
        data[29..32].copy_from_slice(&[0xff, 0xfe, 0x98]); // tickLower = -360
        data[63] = 0xc8; // tickUpper = 200
        // liquidityDelta = -5000
        data[64..96].copy_from_slice(
            &alloy::primitives::I256::try_from(-5000i64)
                .unwrap()
                .to_be_bytes::<32>(),
        );
        data[96..128].copy_from_slice(&[0x01u8; 32]); // salt

        let parts = parts(
            MANAGER,
            &[
                "0x0000000000000000000000000000000000000000000000000000000000000003",
                &pool_id_topic(),
                &address_topic("00000000000000000000000000000000000000cc"),
            ],
            data,
            99,
        );

        let mut pool = sample_pool(Protocol::UniswapV4);
        pool.pool_address = format!("{MANAGER}#{POOL_ID}");

        let event = parse_modify_liquidity(&parts, &pool, Utc::now()).unwrap();
        assert_eq!(event.tick_lower, -360);
        assert_eq!(event.tick_upper, 200);
        assert_eq!(event.liquidity_delta.to_string(), "-5000");
        assert_eq!(event.salt, "01".repeat(32));
    }
}
