use alloy::primitives::Address;
use alloy::sol;
use chrono::{DateTime, Utc};

use crate::decode::abi::{self, DecodeError, LogParts};
use crate::models::{Pool, PoolStatus, Protocol, SwapEvent};
use crate::rpc::RpcClient;

sol! {
    event TokenExchange(
        address indexed buyer,
        int128 sold_id,
        uint256 tokens_sold,
        int128 bought_id,
        uint256 tokens_bought
    );
}

/// coins(uint256) selector.
const COINS_SIG: &str = "0xc6610657";

/// Curve pools rarely exceed four coins; eight is a hard stop.
const MAX_COINS: usize = 8;

/// Curve factory deploy event. Layouts differ between factory versions, but
/// the deployed pool address is the final data slot; the coin list comes from
/// iterated `coins(i)` calls against the new pool.
pub async fn parse_pool_deployed(
    rpc: &RpcClient,
    parts: &LogParts,
    chain_id: i64,
    block_timestamp: DateTime<Utc>,
) -> Result<Pool, DecodeError> {
    if parts.data.len() < 32 {
        return Err(DecodeError::ShortData {
            need: 32,
            got: parts.data.len(),
        });
    }
    let last_slot = parts.data.len() / 32 - 1;
    let pool_address = parts.address_at(last_slot)?;

    let coins = fetch_pool_coins(rpc, &abi::addr_hex(pool_address)).await?;
    if coins.len() < 2 {
        return Err(DecodeError::Other(format!(
            "curve pool {} reports {} coins",
            abi::addr_hex(pool_address),
            coins.len()
        )));
    }
    let coin_hexes: Vec<String> = coins.iter().map(|c| abi::addr_hex(*c)).collect();

    Ok(Pool {
        chain_id,
        pool_address: abi::addr_hex(pool_address),
        protocol: Protocol::Curve,
        token0_address: coin_hexes[0].clone(),
        token1_address: coin_hexes[1].clone(),
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
        metadata: serde_json::json!({
            "all_tokens": coin_hexes,
            "pool_type": "stable",
            "token_count": coins.len(),
        }),
        state_updated_at: None,
    })
}

/// Iterate `coins(i)` until the zero address or the coin cap.
pub async fn fetch_pool_coins(
    rpc: &RpcClient,
    pool_address: &str,
) -> Result<Vec<Address>, DecodeError> {
    let mut coins = Vec::new();
    for i in 0..MAX_COINS {
        let call_data = format!("{COINS_SIG}{i:064x}");
        let result = match rpc.call(pool_address, &call_data).await {
            Ok(result) => result,
            Err(_) => break, // index out of range reverts on most pools
        };
        let Some(raw) = abi::hex_bytes(&result) else {
            break;
        };
        if raw.len() < 32 {
            break;
        }
        let coin = abi::word_address(&raw[0..32]);
        if coin.is_zero() {
            break;
        }
        coins.push(coin);
    }
    Ok(coins)
}

/// TokenExchange: coin indices plus unsigned amounts. Indices are mapped onto
/// the primary pair, with index 0 treated as token0 and anything else folded
/// onto the token1 side.
pub fn parse_token_exchange(
    parts: &LogParts,
    pool: &Pool,
    block_timestamp: DateTime<Utc>,
) -> Result<SwapEvent, DecodeError> {
    parts.require_topics(2)?;
    let buyer = abi::addr_hex(parts.topic_address(1)?);

    let sold_id = parts.i128_at(0)?;
    let tokens_sold = parts.u256_at(1)?.to_string();
    let _bought_id = parts.i128_at(2)?;
    let tokens_bought = parts.u256_at(3)?.to_string();

    let zero = abi::decimal("0");
    let (amount0_in, amount0_out, amount1_in, amount1_out) = if sold_id == 0 {
        (
            abi::decimal(&tokens_sold),
            zero.clone(),
            zero,
            abi::decimal(&tokens_bought),
        )
    } else {
        (
            zero.clone(),
            abi::decimal(&tokens_bought),
            abi::decimal(&tokens_sold),
            zero,
        )
    };

    Ok(SwapEvent {
        tx_hash: parts.tx_hash.clone(),
        log_index: parts.log_index,
        pool_address: pool.pool_address.clone(),
        chain_id: pool.chain_id,
        block_number: parts.block_number as i64,
        block_timestamp,
        sender: buyer.clone(),
        recipient: buyer,
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

    const EXCHANGE_TOPIC: &str =
        "0x8b3e96f2b889fa771c53c981b40daf005f63f637f1869f707052d15a3dd97140";

    #[test]
    fn token_exchange_maps_sold_index_zero_to_token0() {
        let mut data = vec![0u8; 128];
        data[63] = 11; // tokens_sold
        data[95] = 1; // bought_id = 1
        data[127] = 13; // tokens_bought

        let parts = parts(
            "0x2222222222222222222222222222222222222222",
            &[
                EXCHANGE_TOPIC,
                &address_topic("00000000000000000000000000000000000000aa"),
            ],
            data,
            42,
        );

        let pool = sample_pool(Protocol::Curve);
        let swap = parse_token_exchange(&parts, &pool, Utc::now()).unwrap();
        assert_eq!(swap.amount0_in.to_string(), "11");
        assert_eq!(swap.amount1_out.to_string(), "13");
        assert_eq!(swap.amount0_out.to_string(), "0");
        assert_eq!(swap.sender, "0x00000000000000000000000000000000000000aa");
    }

    #[test]
    fn token_exchange_maps_nonzero_sold_index_to_token1() {
        let mut data = vec![0u8; 128];
        data[31] = 1; // sold_id = 1
        data[63] = 7;
        data[127] = 9;

        let parts = parts(
            "0x2222222222222222222222222222222222222222",
            &[
                EXCHANGE_TOPIC,
                &address_topic("00000000000000000000000000000000000000aa"),
            ],
            data,
            42,
        );

        let pool = sample_pool(Protocol::Curve);
        let swap = parse_token_exchange(&parts, &pool, Utc::now()).unwrap();
        assert_eq!(swap.amount1_in.to_string(), "7");
        assert_eq!(swap.amount0_out.to_string(), "9");
        assert_eq!(swap.amount1_out.to_string(), "0");
    }

    #[test]
    fn coins_call_data_is_padded_index() {
        // The selector plus a 32-byte big-endian index.
        let call = format!("{COINS_SIG}{:064x}", 3);
        assert_eq!(call.len(), 10 + 64);
        assert!(call.ends_with("03"));
    }
}
