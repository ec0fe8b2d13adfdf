pub mod pool;
pub mod token;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use pool::{LiquidityEvent, Pool, PoolStatus, Protocol, SwapEvent};
pub use token::{Token, TokenSource, TokenStatus};

/// A distinct progress domain. Cursors are keyed by `(chain_id, stream, scope)`
/// where scope is a pool address for the pool-scoped streams and absent for
/// the chain-wide ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Pools,
    Swaps,
    Liquidity,
    CoinTokens,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Pools => "pools",
            Stream::Swaps => "swaps",
            Stream::Liquidity => "liquidity",
            Stream::CoinTokens => "coin_tokens",
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-stream indexing cursor.
#[derive(Debug, Clone)]
pub struct ProgressCursor {
    pub chain_id: i64,
    pub stream: Stream,
    pub scope: Option<String>,
    pub last_processed_block: i64,
    pub target_block: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
