pub mod creation;
pub mod refresher;
pub mod scheduler;
pub mod supervisor;
pub mod swaps;
pub mod tokens;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::config::{ChainConfig, Settings};
use crate::db::Database;
use crate::decode::abi;
use crate::decode::EventRegistry;
use crate::rpc::{Log, RpcClient};
use crate::sink::Sinks;

/// Everything a chain's worker loops share. Cheap to clone; the heavyweight
/// members sit behind `Arc` or are pools/managers that clone by handle.
#[derive(Clone)]
pub struct ChainContext {
    pub settings: Arc<Settings>,
    pub chain: Arc<ChainConfig>,
    pub rpc: Arc<RpcClient>,
    pub db: Database,
    pub cache: Cache,
    pub registry: Arc<EventRegistry>,
    pub sinks: Arc<Sinks>,
    pub cancel: CancellationToken,
}

impl ChainContext {
    pub fn chain_id(&self) -> i64 {
        self.chain.chain_id as i64
    }

    pub fn chain_name(&self) -> &str {
        &self.chain.name
    }

    /// Effective per-request block cap: the global setting bounded by the
    /// chain's own `max_block_range`.
    pub fn max_blocks_per_request(&self) -> u64 {
        self.settings
            .max_blocks_per_request
            .min(self.chain.max_block_range)
    }

    /// Sleep that wakes early on shutdown; returns false when cancelled.
    pub async fn sleep(&self, secs: u64) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

/// Group raw logs by block number. Logs whose block number does not parse are
/// dropped with a warning; they cannot be attributed to a window anyway.
pub(crate) fn group_logs_by_block(logs: Vec<Log>) -> BTreeMap<u64, Vec<Log>> {
    let mut by_block: BTreeMap<u64, Vec<Log>> = BTreeMap::new();
    for log in logs {
        match abi::hex_u64(&log.block_number) {
            Some(block) => by_block.entry(block).or_default().push(log),
            None => {
                tracing::warn!(
                    tx_hash = %log.transaction_hash,
                    block_number = %log.block_number,
                    "Dropping log with unparseable block number"
                );
            }
        }
    }
    by_block
}
