//! Shared builders for decoder tests.

use alloy::primitives::{Address, B256};
use chrono::Utc;
use std::str::FromStr;

use crate::decode::abi::LogParts;
use crate::models::{Pool, PoolStatus, Protocol};

pub fn parts(contract: &str, topics: &[&str], data: Vec<u8>, block_number: u64) -> LogParts {
    LogParts {
        address: Address::from_str(contract).unwrap(),
        topics: topics.iter().map(|t| B256::from_str(t).unwrap()).collect(),
        data,
        block_number,
        tx_hash: "0xaaaa000000000000000000000000000000000000000000000000000000000001".to_string(),
        log_index: 7,
    }
}

/// A 32-byte topic carrying an address in its low 20 bytes.
pub fn address_topic(suffix: &str) -> String {
    format!("0x000000000000000000000000{suffix}")
}

pub fn sample_pool(protocol: Protocol) -> Pool {
    Pool {
        chain_id: 8453,
        pool_address: "0x1111111111111111111111111111111111111111".to_string(),
        protocol,
        token0_address: "0x000000000000000000000000000000000000dead".to_string(),
        token1_address: "0x000000000000000000000000000000000000beef".to_string(),
        factory_address: "0x8909dc15e40173ff4699343b6eb8132c65e18ec6".to_string(),
        fee_tier: None,
        tick_spacing: None,
        hooks_address: None,
        sqrt_price_x96: None,
        current_tick: None,
        liquidity: None,
        reserve0: None,
        reserve1: None,
        creation_block: 1,
        creation_tx_hash: "0xtx".to_string(),
        creation_timestamp: Utc::now(),
        status: PoolStatus::Active,
        last_indexed_block: 0,
        metadata: serde_json::json!({}),
        state_updated_at: None,
    }
}
