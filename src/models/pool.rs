use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported DEX protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    UniswapV2,
    UniswapV3,
    UniswapV4,
    Sushiswap,
    SushiswapV3,
    PancakeswapV2,
    PancakeswapV3,
    BalancerV2,
    Curve,
    Aerodrome,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::UniswapV2 => "uniswap_v2",
            Protocol::UniswapV3 => "uniswap_v3",
            Protocol::UniswapV4 => "uniswap_v4",
            Protocol::Sushiswap => "sushiswap",
            Protocol::SushiswapV3 => "sushiswap_v3",
            Protocol::PancakeswapV2 => "pancakeswap_v2",
            Protocol::PancakeswapV3 => "pancakeswap_v3",
            Protocol::BalancerV2 => "balancer_v2",
            Protocol::Curve => "curve",
            Protocol::Aerodrome => "aerodrome",
        }
    }

    /// V2-family protocols share the PairCreated/Swap topic layout and the
    /// unsigned four-amount swap payload.
    pub fn is_v2_family(&self) -> bool {
        matches!(
            self,
            Protocol::UniswapV2
                | Protocol::Sushiswap
                | Protocol::PancakeswapV2
                | Protocol::Aerodrome
        )
    }

    /// V3-family protocols emit signed int256 swap amounts.
    pub fn is_v3_family(&self) -> bool {
        matches!(
            self,
            Protocol::UniswapV3 | Protocol::SushiswapV3 | Protocol::PancakeswapV3
        )
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniswap_v2" => Ok(Protocol::UniswapV2),
            "uniswap_v3" => Ok(Protocol::UniswapV3),
            "uniswap_v4" => Ok(Protocol::UniswapV4),
            "sushiswap" => Ok(Protocol::Sushiswap),
            "sushiswap_v3" => Ok(Protocol::SushiswapV3),
            "pancakeswap_v2" => Ok(Protocol::PancakeswapV2),
            "pancakeswap_v3" => Ok(Protocol::PancakeswapV3),
            "balancer_v2" => Ok(Protocol::BalancerV2),
            "curve" => Ok(Protocol::Curve),
            "aerodrome" => Ok(Protocol::Aerodrome),
            other => Err(format!("unknown protocol '{other}'")),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool indexing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Active,
    Paused,
    Error,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Active => "active",
            PoolStatus::Paused => "paused",
            PoolStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for PoolStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PoolStatus::Active),
            "paused" => Ok(PoolStatus::Paused),
            "error" => Ok(PoolStatus::Error),
            other => Err(format!("unknown pool status '{other}'")),
        }
    }
}

/// A liquidity pool observed via its creation event.
///
/// Addresses are lowercase `0x`-prefixed hex strings; for Uniswap V4 singleton
/// pools `pool_address` is the synthetic `"{manager}#{pool_id}"` identifier.
/// On-chain quantities that may exceed 63 bits are carried as decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub chain_id: i64,
    pub pool_address: String,
    pub protocol: Protocol,
    pub token0_address: String,
    pub token1_address: String,
    pub factory_address: String,

    pub fee_tier: Option<String>,
    pub tick_spacing: Option<String>,
    pub hooks_address: Option<String>,

    // V3/V4 state
    pub sqrt_price_x96: Option<String>,
    pub current_tick: Option<String>,
    pub liquidity: Option<String>,

    // V2-family reserves
    pub reserve0: Option<String>,
    pub reserve1: Option<String>,

    pub creation_block: i64,
    pub creation_tx_hash: String,
    pub creation_timestamp: DateTime<Utc>,

    pub status: PoolStatus,
    pub last_indexed_block: i64,

    pub metadata: serde_json::Value,
    pub state_updated_at: Option<DateTime<Utc>>,
}

impl Pool {
    /// For V4 synthetic identifiers, the on-chain contract to query for logs
    /// plus the poolId topic filter. For every other protocol the pool address
    /// itself is the log source.
    pub fn log_source(&self) -> (&str, Option<&str>) {
        match self.pool_address.split_once('#') {
            Some((manager, pool_id)) => (manager, Some(pool_id)),
            None => (&self.pool_address, None),
        }
    }
}

/// A decoded swap. `(tx_hash, log_index)` is the identity; amounts are
/// non-negative decimals with the in/out split already applied.
#[derive(Debug, Clone)]
pub struct SwapEvent {
    pub tx_hash: String,
    pub log_index: i64,
    pub pool_address: String,
    pub chain_id: i64,
    pub block_number: i64,
    pub block_timestamp: DateTime<Utc>,
    pub sender: String,
    pub recipient: String,
    pub amount0_in: BigDecimal,
    pub amount1_in: BigDecimal,
    pub amount0_out: BigDecimal,
    pub amount1_out: BigDecimal,
}

/// A Uniswap V4 ModifyLiquidity event.
#[derive(Debug, Clone)]
pub struct LiquidityEvent {
    pub tx_hash: String,
    pub log_index: i64,
    pub pool_address: String,
    pub chain_id: i64,
    pub block_number: i64,
    pub block_timestamp: DateTime<Utc>,
    pub sender: String,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity_delta: BigDecimal,
    pub salt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_round_trips_through_str() {
        for p in [
            Protocol::UniswapV2,
            Protocol::UniswapV3,
            Protocol::UniswapV4,
            Protocol::Sushiswap,
            Protocol::SushiswapV3,
            Protocol::PancakeswapV2,
            Protocol::PancakeswapV3,
            Protocol::BalancerV2,
            Protocol::Curve,
            Protocol::Aerodrome,
        ] {
            assert_eq!(p.as_str().parse::<Protocol>().unwrap(), p);
        }
    }

    #[test]
    fn v4_log_source_splits_synthetic_id() {
        let mut pool = sample_pool();
        pool.pool_address = "0xmanager#abcd".to_string();
        assert_eq!(pool.log_source(), ("0xmanager", Some("abcd")));

        pool.pool_address = "0xpool".to_string();
        assert_eq!(pool.log_source(), ("0xpool", None));
    }

    fn sample_pool() -> Pool {
        Pool {
            chain_id: 8453,
            pool_address: "0xpool".to_string(),
            protocol: Protocol::UniswapV2,
            token0_address: "0xt0".to_string(),
            token1_address: "0xt1".to_string(),
            factory_address: "0xfactory".to_string(),
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
}
