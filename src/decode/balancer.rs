use alloy::primitives::Address;
use alloy::sol;
use chrono::{DateTime, Utc};

use crate::decode::abi::{self, DecodeError, LogParts};
use crate::models::{Pool, PoolStatus, Protocol, SwapEvent};
use crate::rpc::RpcClient;

// Balancer V2 Vault events. PoolRegistered and Swap are both emitted by the
// Vault itself; the pool's token list requires a follow-up getPoolTokens call.
sol! {
    event PoolRegistered(bytes32 indexed poolId, address indexed poolAddress, uint8 specialization);
    event Swap(
        bytes32 indexed poolId,
        address indexed tokenIn,
        address indexed tokenOut,
        uint256 amountIn,
        uint256 amountOut
    );
}

/// getPoolTokens(bytes32) selector.
const GET_POOL_TOKENS_SIG: &str = "0xf94d4668";

/// At most this many tokens are read from a pool.
const MAX_POOL_TOKENS: usize = 8;

/// PoolRegistered. Token addresses are not part of the event, so the Vault
/// (the emitting contract) is asked for the pool's token list.
pub async fn parse_pool_registered(
    rpc: &RpcClient,
    parts: &LogParts,
    chain_id: i64,
    block_timestamp: DateTime<Utc>,
) -> Result<Pool, DecodeError> {
    parts.require_topics(3)?;
    let pool_id = abi::b256_hex(parts.topic(1)?);
    let pool_address = parts.topic_address(2)?;
    let vault = parts.address;

    let call_data = format!("{GET_POOL_TOKENS_SIG}{}", &pool_id[2..]);
    let result = rpc
        .call(&abi::addr_hex(vault), &call_data)
        .await
        .map_err(|e| DecodeError::Other(format!("getPoolTokens call failed: {e}")))?;
    let raw = abi::hex_bytes(&result).ok_or(DecodeError::InvalidHex { field: "eth_call" })?;
    let tokens = decode_token_array(&raw);

    if tokens.len() < 2 {
        return Err(DecodeError::Other(format!(
            "balancer pool {} reports {} tokens",
            abi::addr_hex(pool_address),
            tokens.len()
        )));
    }

    let token_hexes: Vec<String> = tokens.iter().map(|t| abi::addr_hex(*t)).collect();

    Ok(Pool {
        chain_id,
        pool_address: abi::addr_hex(pool_address),
        protocol: Protocol::BalancerV2,
        token0_address: token_hexes[0].clone(),
        token1_address: token_hexes[1].clone(),
        factory_address: abi::addr_hex(vault),
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
            "pool_id": pool_id,
            "all_tokens": token_hexes,
            "token_count": tokens.len(),
        }),
        state_updated_at: None,
    })
}

/// ABI-decode the `address[]` head of a getPoolTokens(bytes32) result:
/// slot 0 holds the byte offset of the array, which starts with its length.
pub fn decode_token_array(raw: &[u8]) -> Vec<Address> {
    let mut tokens = Vec::new();
    if raw.len() < 64 {
        return tokens;
    }

    let offset = be_usize(&raw[0..32]);
    let Some(len_word) = raw.get(offset..offset + 32) else {
        return tokens;
    };
    let len = be_usize(len_word).min(MAX_POOL_TOKENS);

    for i in 0..len {
        let start = offset + 32 + i * 32;
        let Some(word) = raw.get(start..start + 32) else {
            break;
        };
        let address = abi::word_address(word);
        if address.is_zero() {
            break;
        }
        tokens.push(address);
    }
    tokens
}

fn be_usize(word: &[u8]) -> usize {
    // Offsets and lengths in practice fit far below 2^32.
    let mut value = 0usize;
    for &b in &word[24..32] {
        value = (value << 8) | b as usize;
    }
    value
}

/// Balancer Swap. Amounts are mapped onto the pool's primary token pair;
/// swaps touching other tokens of a multi-token pool are skipped. The Vault
/// event carries no sender/recipient, so those fields hold the zero address.
pub fn parse_swap(
    parts: &LogParts,
    pool: &Pool,
    block_timestamp: DateTime<Utc>,
) -> Result<SwapEvent, DecodeError> {
    parts.require_topics(4)?;
    let token_in = abi::addr_hex(parts.topic_address(2)?);
    let token_out = abi::addr_hex(parts.topic_address(3)?);

    let amount_in = parts.u256_at(0)?.to_string();
    let amount_out = parts.u256_at(1)?.to_string();

    let zero = abi::decimal("0");
    let (amount0_in, amount0_out, amount1_in, amount1_out) =
        if token_in.eq_ignore_ascii_case(&pool.token0_address) {
            // Multi-token pools can swap against a token outside the primary
            // pair; the output side must be the complementary token.
            if !token_out.eq_ignore_ascii_case(&pool.token1_address) {
                return Err(DecodeError::Other(format!(
                    "swap with untracked token {token_out} in pool {}",
                    pool.pool_address
                )));
            }
            (
                abi::decimal(&amount_in),
                zero.clone(),
                zero,
                abi::decimal(&amount_out),
            )
        } else if token_in.eq_ignore_ascii_case(&pool.token1_address) {
            if !token_out.eq_ignore_ascii_case(&pool.token0_address) {
                return Err(DecodeError::Other(format!(
                    "swap with untracked token {token_out} in pool {}",
                    pool.pool_address
                )));
            }
            (
                zero.clone(),
                abi::decimal(&amount_out),
                abi::decimal(&amount_in),
                zero,
            )
        } else {
            return Err(DecodeError::Other(format!(
                "swap with untracked token {token_in} in pool {}",
                pool.pool_address
            )));
        };

    let placeholder = abi::addr_hex(Address::ZERO);
    Ok(SwapEvent {
        tx_hash: parts.tx_hash.clone(),
        log_index: parts.log_index,
        pool_address: pool.pool_address.clone(),
        chain_id: pool.chain_id,
        block_number: parts.block_number as i64,
        block_timestamp,
        sender: placeholder.clone(),
        recipient: placeholder,
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
    use std::str::FromStr;

    const SWAP_TOPIC: &str = "0x2170c741c41531aec20e7c107c24eecfdd15e69c9bb0a8dd37b1840b9e0b207b";

    #[test]
    fn decodes_token_array_from_call_result() {
        // (address[] tokens, uint256[] balances, uint256 lastChangeBlock)
        let mut raw = vec![0u8; 32 * 7];
        raw[31] = 0x60; // tokens array at offset 0x60
        raw[32 * 3 + 31] = 2; // len = 2
        raw[32 * 4 + 12..32 * 5].copy_from_slice(&[0x0au8; 20]);
        raw[32 * 5 + 12..32 * 6].copy_from_slice(&[0x0bu8; 20]);

        let tokens = decode_token_array(&raw);
        assert_eq!(tokens.len(), 2);
        assert_eq!(
            tokens[0],
            Address::from_str("0x0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a").unwrap()
        );
    }

    #[test]
    fn token_array_stops_at_zero_address() {
        let mut raw = vec![0u8; 32 * 6];
        raw[31] = 0x60;
        raw[32 * 3 + 31] = 3; // claims 3 entries, second is zero
        raw[32 * 4 + 12..32 * 5].copy_from_slice(&[0x0au8; 20]);
        assert_eq!(decode_token_array(&raw).len(), 1);
    }

    #[test]
    fn swap_maps_token_in_to_pair_side() {
        let mut data = vec![0u8; 64];
        data[31] = 10; // amountIn
        data[63] = 20; // amountOut

        let parts = parts(
            "0xba12222222228d8ba445958a75a0704d566bf2c8",
            &[
                SWAP_TOPIC,
                "0x00000000000000000000000000000000000000000000000000000000000000aa",
                &address_topic("000000000000000000000000000000000000beef"),
                &address_topic("000000000000000000000000000000000000dead"),
            ],
            data,
            12,
        );

        // tokenIn is the pool's token1, so amounts land on the token1 side.
        let pool = sample_pool(Protocol::BalancerV2);
        let swap = parse_swap(&parts, &pool, Utc::now()).unwrap();
        assert_eq!(swap.amount1_in.to_string(), "10");
        assert_eq!(swap.amount0_out.to_string(), "20");
        assert_eq!(swap.amount0_in.to_string(), "0");
        assert_eq!(swap.amount1_out.to_string(), "0");
    }

    #[test]
    fn swap_with_untracked_token_in_is_skipped() {
        let mut data = vec![0u8; 64];
        data[31] = 1;
        let parts = parts(
            "0xba12222222228d8ba445958a75a0704d566bf2c8",
            &[
                SWAP_TOPIC,
                "0x00000000000000000000000000000000000000000000000000000000000000aa",
                &address_topic("0000000000000000000000000000000000001234"),
                &address_topic("000000000000000000000000000000000000dead"),
            ],
            data,
            12,
        );
        let pool = sample_pool(Protocol::BalancerV2);
        assert!(parse_swap(&parts, &pool, Utc::now()).is_err());
    }

    #[test]
    fn swap_with_untracked_token_out_is_skipped() {
        // tokenIn is the pool's token1, but tokenOut is a third pool token
        // rather than the complementary token0.
        let mut data = vec![0u8; 64];
        data[31] = 1;
        let parts = parts(
            "0xba12222222228d8ba445958a75a0704d566bf2c8",
            &[
                SWAP_TOPIC,
                "0x00000000000000000000000000000000000000000000000000000000000000aa",
                &address_topic("000000000000000000000000000000000000beef"),
                &address_topic("0000000000000000000000000000000000005678"),
            ],
            data,
            12,
        );
        let pool = sample_pool(Protocol::BalancerV2);
        assert!(parse_swap(&parts, &pool, Utc::now()).is_err());
    }
}
