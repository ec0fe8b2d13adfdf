pub mod client;
pub mod endpoint;

pub use client::RpcClient;
pub use endpoint::{EndpointStats, RpcEndpoint};

use serde::Deserialize;

/// A raw log entry as returned by `eth_getLogs`. Numeric fields stay in their
/// 0x-hex wire form; the decode layer parses them into byte form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
}
