use alloy::sol;
use chrono::{DateTime, Utc};

use crate::decode::abi::{self, DecodeError, LogParts};
use crate::models::{Pool, PoolStatus, Protocol, SwapEvent};

// V2-family event shapes. Uniswap V2, SushiSwap and PancakeSwap V2 share the
// PairCreated layout exactly; Aerodrome adds an indexed `stable` flag and its
// Swap hashes differently, but the topic/data layout is the same.
sol! {
    event PairCreated(address indexed token0, address indexed token1, address pair, uint256);
    event Swap(
        address indexed sender,
        uint256 amount0In,
        uint256 amount1In,
        uint256 amount0Out,
        uint256 amount1Out,
        address indexed to
    );
}

/// PairCreated / PoolCreated for the V2 family.
///
/// topics: [sig, token0, token1] (+ `stable` for Aerodrome);
/// data: pool address in slot 0, pair index in slot 1.
pub fn parse_pool_created(
    parts: &LogParts,
    protocol: Protocol,
    chain_id: i64,
    block_timestamp: DateTime<Utc>,
) -> Result<Pool, DecodeError> {
    parts.require_topics(3)?;
    let token0 = parts.topic_address(1)?;
    let token1 = parts.topic_address(2)?;
    let pool_address = parts.address_at(0)?;

    let mut metadata = serde_json::Map::new();
    if protocol == Protocol::Aerodrome {
        if let Ok(stable_topic) = parts.topic(3) {
            let stable = !stable_topic.is_zero();
            metadata.insert("stable".into(), serde_json::json!(stable));
            metadata.insert(
                "pool_type".into(),
                serde_json::json!(if stable { "stable" } else { "volatile" }),
            );
        }
    }

    Ok(Pool {
        chain_id,
        pool_address: abi::addr_hex(pool_address),
        protocol,
        token0_address: abi::addr_hex(token0),
        token1_address: abi::addr_hex(token1),
        factory_address: abi::addr_hex(parts.address),
        fee_tier: None,
        tick_spacing: None,
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
        metadata: serde_json::Value::Object(metadata),
        state_updated_at: None,
    })
}

/// V2-family Swap: four unsigned amounts in data, sender/recipient indexed.
pub fn parse_swap(
    parts: &LogParts,
    pool: &Pool,
    block_timestamp: DateTime<Utc>,
) -> Result<SwapEvent, DecodeError> {
    parts.require_topics(3)?;
    let sender = parts.topic_address(1)?;
    let recipient = parts.topic_address(2)?;

    let amount0_in = parts.u256_at(0)?;
    let amount1_in = parts.u256_at(1)?;
    let amount0_out = parts.u256_at(2)?;
    let amount1_out = parts.u256_at(3)?;

    Ok(SwapEvent {
        tx_hash: parts.tx_hash.clone(),
        log_index: parts.log_index,
        pool_address: pool.pool_address.clone(),
        chain_id: pool.chain_id,
        block_number: parts.block_number as i64,
        block_timestamp,
        sender: abi::addr_hex(sender),
        recipient: abi::addr_hex(recipient),
        amount0_in: abi::decimal(&amount0_in.to_string()),
        amount1_in: abi::decimal(&amount1_in.to_string()),
        amount0_out: abi::decimal(&amount0_out.to_string()),
        amount1_out: abi::decimal(&amount1_out.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testutil::{address_topic, parts, sample_pool};
    use alloy::sol_types::SolEvent;

    #[test]
    fn pair_created_signature_hash_is_canonical() {
        // The well-known PairCreated topic0.
        assert!(format!("{:#x}", PairCreated::SIGNATURE_HASH).starts_with("0x0d3648bd"));
    }

    #[test]
    fn decodes_pair_created() {
        let mut data = vec![0u8; 64];
        data[12..32].copy_from_slice(&[0x70u8; 20]);
        data[63] = 1; // pair index

        // token0 = 0x..dead padded, token1 = 0x..beef padded
        let parts = parts(
            "0x8909dc15e40173ff4699343b6eb8132c65e18ec6",
            &[
                "0x0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9",
                &address_topic("000000000000000000000000000000000000dead"),
                &address_topic("000000000000000000000000000000000000beef"),
            ],
            data,
            6_601_915,
        );

        let pool = parse_pool_created(&parts, Protocol::UniswapV2, 8453, Utc::now()).unwrap();
        assert_eq!(
            pool.pool_address,
            "0x7070707070707070707070707070707070707070"
        );
        assert_eq!(
            pool.token0_address,
            "0x000000000000000000000000000000000000dead"
        );
        assert_eq!(
            pool.token1_address,
            "0x000000000000000000000000000000000000beef"
        );
        assert_eq!(pool.protocol, Protocol::UniswapV2);
        assert_eq!(pool.creation_block, 6_601_915);
        assert_eq!(
            pool.factory_address,
            "0x8909dc15e40173ff4699343b6eb8132c65e18ec6"
        );
    }

    #[test]
    fn decodes_v2_swap_amounts() {
        let mut data = vec![0u8; 128];
        data[31] = 100; // amount0In = 100
        data[127] = 250; // amount1Out = 250

        let parts = parts(
            "0x1111111111111111111111111111111111111111",
            &[
                "0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822",
                &address_topic("00000000000000000000000000000000000000aa"),
                &address_topic("00000000000000000000000000000000000000bb"),
            ],
            data,
            100,
        );

        let pool = sample_pool(Protocol::UniswapV2);
        let swap = parse_swap(&parts, &pool, Utc::now()).unwrap();
        assert_eq!(swap.amount0_in.to_string(), "100");
        assert_eq!(swap.amount1_in.to_string(), "0");
        assert_eq!(swap.amount0_out.to_string(), "0");
        assert_eq!(swap.amount1_out.to_string(), "250");
        assert_eq!(swap.sender, "0x00000000000000000000000000000000000000aa");
        assert_eq!(swap.log_index, 7);
    }

    #[test]
    fn short_data_is_a_decode_error() {
        let parts = parts(
            "0x1111111111111111111111111111111111111111",
            &[
                "0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822",
                &address_topic("00000000000000000000000000000000000000aa"),
                &address_topic("00000000000000000000000000000000000000bb"),
            ],
            vec![0u8; 32],
            100,
        );
        let pool = sample_pool(Protocol::UniswapV2);
        assert!(matches!(
            parse_swap(&parts, &pool, Utc::now()),
            Err(DecodeError::ShortData { .. })
        ));
    }

    #[test]
    fn aerodrome_stable_flag_lands_in_metadata() {
        let mut data = vec![0u8; 64];
        data[12..32].copy_from_slice(&[0x22u8; 20]);
        let parts = parts(
            "0x420dd381b31aef6683db6b902084cb0ffece40da",
            &[
                "0x2128d88d14c80cb081c1252a5acff7a264671bf199ce226b53788fb26065005e",
                &address_topic("000000000000000000000000000000000000dead"),
                &address_topic("000000000000000000000000000000000000beef"),
                "0x0000000000000000000000000000000000000000000000000000000000000001",
            ],
            data,
            55,
        );

        let pool = parse_pool_created(&parts, Protocol::Aerodrome, 8453, Utc::now()).unwrap();
        assert_eq!(pool.metadata["stable"], serde_json::json!(true));
        assert_eq!(pool.metadata["pool_type"], serde_json::json!("stable"));
    }
}
