use alloy::sol;
use chrono::{DateTime, Utc};

use crate::decode::abi::{self, DecodeError, LogParts};
use crate::models::{Pool, PoolStatus, Protocol, SwapEvent};

// V3-family event shapes (Uniswap V3, SushiSwap V3, PancakeSwap V3).
sol! {
    event PoolCreated(
        address indexed token0,
        address indexed token1,
        uint24 indexed fee,
        int24 tickSpacing,
        address pool
    );
    event Swap(
        address indexed sender,
        address indexed recipient,
        int256 amount0,
        int256 amount1,
        uint160 sqrtPriceX96,
        uint128 liquidity,
        int24 tick
    );
}

/// PoolCreated: fee is the third indexed topic; tickSpacing and the pool
/// address sit in data.
pub fn parse_pool_created(
    parts: &LogParts,
    protocol: Protocol,
    chain_id: i64,
    block_timestamp: DateTime<Utc>,
) -> Result<Pool, DecodeError> {
    parts.require_topics(4)?;
    let token0 = parts.topic_address(1)?;
    let token1 = parts.topic_address(2)?;
    let fee_tier = alloy::primitives::U256::from_be_slice(parts.topic(3)?.as_slice());

    let tick_spacing = parts.i24_at(0)?;
    let pool_address = parts.address_at(1)?;

    Ok(Pool {
        chain_id,
        pool_address: abi::addr_hex(pool_address),
        protocol,
        token0_address: abi::addr_hex(token0),
        token1_address: abi::addr_hex(token1),
        factory_address: abi::addr_hex(parts.address),
        fee_tier: Some(fee_tier.to_string()),
        tick_spacing: Some(tick_spacing.to_string()),
        hooks_address: None,
        sqrt_price_x96: None,
        current_tick: None,
        liquidity: None,
        reserve0: None,
        reserve1: None,
        creation_block: parts.block_number as i64,
        creation_tx_hash: parts.tx_hash.clone(),
        creation_timestamp: block_timestamp,
        status: PoolStatus::Active,
        last_indexed_block: 0,
        metadata: serde_json::json!({}),
        state_updated_at: None,
    })
}

/// V3-family Swap: signed int256 amounts. Negative values are the inflow
/// side of the record, positive the outflow side.
pub fn parse_swap(
    parts: &LogParts,
    pool: &Pool,
    block_timestamp: DateTime<Utc>,
) -> Result<SwapEvent, DecodeError> {
    parts.require_topics(3)?;
    let sender = parts.topic_address(1)?;
    let recipient = parts.topic_address(2)?;

    let amount0 = parts.i256_at(0)?;
    let amount1 = parts.i256_at(1)?;
    let (amount0_in, amount0_out) = abi::signed_in_out(amount0);
    let (amount1_in, amount1_out) = abi::signed_in_out(amount1);

    Ok(SwapEvent {
        tx_hash: parts.tx_hash.clone(),
        log_index: parts.log_index,
        pool_address: pool.pool_address.clone(),
        chain_id: pool.chain_id,
        block_number: parts.block_number as i64,
        block_timestamp,
        sender: abi::addr_hex(sender),
        recipient: abi::addr_hex(recipient),
        amount0_in,
        amount1_in,
        amount0_out,
        amount1_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testutil::{address_topic, parts, sample_pool};
    use alloy::primitives::I256;
    use alloy::sol_types::SolEvent;
    use std::str::FromStr;

    const POOL_CREATED_TOPIC: &str =
        "0x783cca1c0412dd0d695e784568c96da2e9c22ff989357a2e8b1d9b2b4e6b7118";
    const SWAP_TOPIC: &str = "0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67";

    #[test]
    fn signature_hashes_are_canonical() {
        assert_eq!(format!("{:#x}", PoolCreated::SIGNATURE_HASH), POOL_CREATED_TOPIC);
        assert_eq!(format!("{:#x}", Swap::SIGNATURE_HASH), SWAP_TOPIC);
    }

    #[test]
    fn decodes_pool_created_with_fee_and_tick_spacing() {
        let mut data = vec![0u8; 64];
        data[31] = 60; // tickSpacing = 60
        data[44..64].copy_from_slice(&[0x42u8; 20]);

        let parts = parts(
            "0x33128a8fc17869897dce68ed026d694621f6fdfd",
            &[
                POOL_CREATED_TOPIC,
                &address_topic("000000000000000000000000000000000000dead"),
                &address_topic("000000000000000000000000000000000000beef"),
                "0x0000000000000000000000000000000000000000000000000000000000000bb8",
            ],
            data,
            1_234_567,
        );

        let pool = parse_pool_created(&parts, Protocol::UniswapV3, 8453, Utc::now()).unwrap();
        assert_eq!(pool.fee_tier.as_deref(), Some("3000"));
        assert_eq!(pool.tick_spacing.as_deref(), Some("60"));
        assert_eq!(
            pool.pool_address,
            "0x4242424242424242424242424242424242424242"
        );
    }

    #[test]
    fn negative_tick_spacing_survives_decoding() {
        let mut data = vec![0u8; 64];
        // -10 as int24 in the low 3 bytes
        data[29..32].copy_from_slice(&[0xff, 0xff, 0xf6]);
        let parts = parts(
            "0x33128a8fc17869897dce68ed026d694621f6fdfd",
            &[
                POOL_CREATED_TOPIC,
                &address_topic("000000000000000000000000000000000000dead"),
                &address_topic("000000000000000000000000000000000000beef"),
                "0x0000000000000000000000000000000000000000000000000000000000000001",
            ],
            data,
            1,
        );
        let pool = parse_pool_created(&parts, Protocol::SushiswapV3, 8453, Utc::now()).unwrap();
        assert_eq!(pool.tick_spacing.as_deref(), Some("-10"));
    }

    #[test]
    fn swap_splits_signed_amounts_by_sign() {
        // amount0 = -1000 (user pays token0), amount1 = +2500
        let mut data = vec![0u8; 160];
        data[0..32].copy_from_slice(&I256::from_str("-1000").unwrap().to_be_bytes::<32>());
        data[32..64].copy_from_slice(&I256::from_str("2500").unwrap().to_be_bytes::<32>());

        let parts = parts(
            "0x1111111111111111111111111111111111111111",
            &[
                SWAP_TOPIC,
                &address_topic("00000000000000000000000000000000000000aa"),
                &address_topic("00000000000000000000000000000000000000bb"),
            ],
            data,
            9_000,
        );

        let pool = sample_pool(Protocol::UniswapV3);
        let swap = parse_swap(&parts, &pool, Utc::now()).unwrap();
        assert_eq!(swap.amount0_in.to_string(), "1000");
        assert_eq!(swap.amount0_out.to_string(), "0");
        assert_eq!(swap.amount1_in.to_string(), "0");
        assert_eq!(swap.amount1_out.to_string(), "2500");
    }

    #[test]
    fn missing_topics_is_a_decode_error() {
        let parts = parts(
            "0x1111111111111111111111111111111111111111",
            &[SWAP_TOPIC],
            vec![0u8; 160],
            1,
        );
        let pool = sample_pool(Protocol::UniswapV3);
        assert!(matches!(
            parse_swap(&parts, &pool, Utc::now()),
            Err(DecodeError::MissingTopics { .. })
        ));
    }
}
