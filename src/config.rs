use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::decode::ParserId;
use crate::models::Protocol;

/// Global settings, read from `POOLWATCH_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_redis_key_prefix")]
    pub redis_key_prefix: String,

    #[serde(default = "default_worker_interval_seconds")]
    pub worker_interval_seconds: u64,
    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: u64,
    #[serde(default = "default_worker_retry_delay")]
    pub worker_retry_delay: u64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    #[serde(default = "default_rpc_request_timeout")]
    pub rpc_request_timeout: u64,
    #[serde(default = "default_rpc_max_retries")]
    pub rpc_max_retries: u32,
    #[serde(default = "default_rpc_retry_delay")]
    pub rpc_retry_delay: u64,
    #[serde(default = "default_rpc_switch_threshold")]
    pub rpc_switch_threshold: u32,

    #[serde(default = "default_max_blocks_per_request")]
    pub max_blocks_per_request: u64,
    #[serde(default = "default_max_concurrent_contracts")]
    pub max_concurrent_contracts: usize,
    #[serde(default = "default_max_concurrent_blocks")]
    pub max_concurrent_blocks: usize,
    #[serde(default = "default_event_processing_batch_size")]
    pub event_processing_batch_size: usize,

    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,

    #[serde(default = "default_chains_dir")]
    pub chains_dir: String,

    #[serde(default)]
    pub kafka_bootstrap_servers: Option<String>,
    #[serde(default = "default_kafka_topic_prefix")]
    pub kafka_topic_prefix: String,

    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    /// Comma-separated destination chat ids.
    #[serde(default)]
    pub telegram_chat_ids: Option<String>,
}

fn default_database_url() -> String {
    "postgres://localhost:5432/poolwatch".to_string()
}
fn default_database_max_connections() -> u32 {
    10
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_redis_key_prefix() -> String {
    "poolwatch:indexer".to_string()
}
fn default_worker_interval_seconds() -> u64 {
    15
}
fn default_worker_batch_size() -> u64 {
    100
}
fn default_worker_retry_delay() -> u64 {
    30
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_rpc_request_timeout() -> u64 {
    90
}
fn default_rpc_max_retries() -> u32 {
    3
}
fn default_rpc_retry_delay() -> u64 {
    2
}
fn default_rpc_switch_threshold() -> u32 {
    3
}
fn default_max_blocks_per_request() -> u64 {
    2000
}
fn default_max_concurrent_contracts() -> usize {
    4
}
fn default_max_concurrent_blocks() -> usize {
    8
}
fn default_event_processing_batch_size() -> usize {
    10
}
fn default_lock_timeout_seconds() -> u64 {
    300
}
fn default_confirmation_blocks() -> u64 {
    5
}
fn default_chains_dir() -> String {
    "chains".to_string()
}
fn default_kafka_topic_prefix() -> String {
    "poolwatch".to_string()
}

#[cfg(test)]
impl Default for Settings {
    fn default() -> Self {
        // Deserializing an empty object applies every serde field default.
        serde_json::from_value(serde_json::json!({})).expect("settings defaults are complete")
    }
}

impl Settings {
    pub fn from_env() -> eyre::Result<Self> {
        dotenvy::dotenv().ok();
        envy::prefixed("POOLWATCH_")
            .from_env::<Settings>()
            .map_err(|e| eyre::eyre!("invalid environment configuration: {e}"))
    }

    pub fn telegram_destinations(&self) -> Vec<String> {
        self.telegram_chat_ids
            .as_deref()
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Per-chain configuration, one JSON file per chain under `chains/`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    /// Legacy single-URL form; folded into the primary list.
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub backup_rpc_urls: Vec<String>,
    pub block_time: u64,
    pub start_block: u64,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    #[serde(default = "default_max_blocks_per_request")]
    pub max_block_range: u64,
    /// DEX protocol entries driving the pool-creation and swap streams.
    #[serde(default)]
    pub pools: Vec<ProtocolEntry>,
    /// Coin-launch contracts driving the coin-creation stream.
    #[serde(default)]
    pub contracts: HashMap<String, ContractEntry>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub monitoring: serde_json::Value,
    #[serde(default)]
    pub performance: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub pool_state_refresh: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolEntry {
    pub protocol: Protocol,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub factory: Option<String>,
    /// Uniswap V4 singleton; used instead of a factory.
    #[serde(default)]
    pub pool_manager: Option<String>,
    #[serde(default)]
    pub creation_block: Option<u64>,
    #[serde(default)]
    pub pool_created_topic: Option<String>,
    #[serde(default)]
    pub pool_init_topic: Option<String>,
    #[serde(default)]
    pub swap_topic: Option<String>,
    #[serde(default)]
    pub modify_liquidity_topic: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ProtocolEntry {
    /// The contract whose logs announce new pools.
    pub fn creation_contract(&self) -> Option<&str> {
        if self.protocol == Protocol::UniswapV4 {
            self.pool_manager.as_deref()
        } else {
            self.factory.as_deref()
        }
    }

    pub fn creation_topic(&self) -> Option<&str> {
        if self.protocol == Protocol::UniswapV4 {
            self.pool_init_topic.as_deref()
        } else {
            self.pool_created_topic.as_deref()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractEntry {
    pub address: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub creation_block: Option<u64>,
    pub events: HashMap<String, EventSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventSpec {
    /// topic0 hash of the event.
    pub signature: String,
    /// Registered decoder id; validated at startup.
    pub parser: String,
}

impl ChainConfig {
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("failed to read chain config '{}': {e}", path.display()))?;
        let config: ChainConfig = serde_json::from_str(&content)
            .map_err(|e| eyre::eyre!("failed to parse chain config '{}': {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn primary_rpc_urls(&self) -> Vec<String> {
        if !self.rpc_urls.is_empty() {
            self.rpc_urls.clone()
        } else {
            self.rpc_url.clone().into_iter().collect()
        }
    }

    pub fn protocol_entry(&self, protocol: Protocol) -> Option<&ProtocolEntry> {
        self.pools
            .iter()
            .find(|e| e.protocol == protocol && e.enabled)
    }

    pub fn enabled_protocols(&self) -> impl Iterator<Item = &ProtocolEntry> {
        self.pools.iter().filter(|e| e.enabled)
    }

    pub fn enabled_contracts(&self) -> impl Iterator<Item = (&String, &ContractEntry)> {
        self.contracts.iter().filter(|(_, c)| c.enabled)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.chain_id == 0 {
            return Err(eyre::eyre!("chain '{}': chain_id must be set", self.name));
        }
        if self.primary_rpc_urls().is_empty() {
            return Err(eyre::eyre!(
                "chain '{}': at least one RPC URL is required",
                self.name
            ));
        }
        if self.block_time == 0 {
            return Err(eyre::eyre!("chain '{}': block_time must be > 0", self.name));
        }

        for entry in &self.pools {
            if !entry.enabled {
                continue;
            }
            let protocol = entry.protocol.as_str();
            let contract = entry.creation_contract().ok_or_else(|| {
                eyre::eyre!(
                    "chain '{}': protocol '{}' is missing its factory/pool_manager address",
                    self.name,
                    protocol
                )
            })?;
            validate_address(&self.name, protocol, contract)?;
            let topic = entry.creation_topic().ok_or_else(|| {
                eyre::eyre!(
                    "chain '{}': protocol '{}' is missing its creation topic",
                    self.name,
                    protocol
                )
            })?;
            validate_topic(&self.name, protocol, topic)?;
            if let Some(swap_topic) = &entry.swap_topic {
                validate_topic(&self.name, protocol, swap_topic)?;
            }
            if let Some(liq_topic) = &entry.modify_liquidity_topic {
                validate_topic(&self.name, protocol, liq_topic)?;
            }
        }

        for (name, contract) in &self.contracts {
            if !contract.enabled {
                continue;
            }
            validate_address(&self.name, name, &contract.address)?;
            if contract.events.is_empty() {
                return Err(eyre::eyre!(
                    "chain '{}': contract '{}' has no events configured",
                    self.name,
                    name
                ));
            }
            for (event_name, spec) in &contract.events {
                validate_topic(&self.name, event_name, &spec.signature)?;
                spec.parser.parse::<ParserId>().map_err(|_| {
                    eyre::eyre!(
                        "chain '{}': contract '{}' event '{}' names unknown parser '{}'",
                        self.name,
                        name,
                        event_name,
                        spec.parser
                    )
                })?;
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub fn for_tests(chain_id: u64, name: &str) -> Self {
        Self {
            chain_id,
            name: name.to_string(),
            rpc_urls: vec!["http://localhost:8545".to_string()],
            rpc_url: None,
            backup_rpc_urls: Vec::new(),
            block_time: 2,
            start_block: 0,
            confirmation_blocks: 5,
            max_block_range: 2000,
            pools: Vec::new(),
            contracts: HashMap::new(),
            features: Features::default(),
            monitoring: serde_json::Value::Null,
            performance: serde_json::Value::Null,
        }
    }
}

fn validate_address(chain: &str, what: &str, address: &str) -> eyre::Result<()> {
    if !address.starts_with("0x") || address.len() != 42 {
        return Err(eyre::eyre!(
            "chain '{chain}': invalid address '{address}' for {what}"
        ));
    }
    Ok(())
}

fn validate_topic(chain: &str, what: &str, topic: &str) -> eyre::Result<()> {
    if !topic.starts_with("0x") || topic.len() != 66 {
        return Err(eyre::eyre!(
            "chain '{chain}': invalid event topic '{topic}' for {what}"
        ));
    }
    Ok(())
}

/// Load and validate every `*.json` chain file in the configured directory.
pub fn load_chain_configs(dir: &str) -> eyre::Result<Vec<ChainConfig>> {
    let dir_path = Path::new(dir);
    if !dir_path.is_dir() {
        return Err(eyre::eyre!(
            "chain configuration directory not found: {dir} (create it and add per-chain JSON files)"
        ));
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir_path)
        .map_err(|e| eyre::eyre!("failed to list {dir}: {e}"))?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut configs = Vec::new();
    for path in paths {
        let config = ChainConfig::load(&path)?;
        tracing::info!(
            chain = %config.name,
            chain_id = config.chain_id,
            protocols = config.pools.len(),
            contracts = config.contracts.len(),
            "Loaded chain configuration"
        );
        configs.push(config);
    }

    if configs.is_empty() {
        return Err(eyre::eyre!("no chain configuration files found in {dir}"));
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "0x0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9";

    fn chain_json() -> serde_json::Value {
        serde_json::json!({
            "chain_id": 8453,
            "name": "base",
            "rpc_urls": ["http://localhost:8545"],
            "block_time": 2,
            "start_block": 1000,
            "pools": [{
                "protocol": "uniswap_v2",
                "factory": "0x8909dc15e40173ff4699343b6eb8132c65e18ec6",
                "creation_block": 6601915,
                "pool_created_topic": TOPIC,
                "swap_topic": TOPIC
            }],
            "contracts": {
                "clanker_v4": {
                    "address": "0xe85a59c628f7d27878aceb4bf3b35733630083a9",
                    "events": {
                        "TokenCreated": { "signature": TOPIC, "parser": "clanker" }
                    }
                }
            }
        })
    }

    #[test]
    fn parses_and_validates_chain_config() {
        let config: ChainConfig = serde_json::from_value(chain_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chain_id, 8453);
        assert_eq!(config.confirmation_blocks, 5); // default
        assert_eq!(config.max_block_range, 2000); // default
        assert!(config.pools[0].enabled); // default
        assert_eq!(
            config.pools[0].creation_contract(),
            Some("0x8909dc15e40173ff4699343b6eb8132c65e18ec6")
        );
    }

    #[test]
    fn rejects_unknown_parser_id() {
        let mut value = chain_json();
        value["contracts"]["clanker_v4"]["events"]["TokenCreated"]["parser"] =
            serde_json::json!("no_such_parser");
        let config: ChainConfig = serde_json::from_value(value).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("unknown parser"), "{err}");
    }

    #[test]
    fn rejects_malformed_factory_address() {
        let mut value = chain_json();
        value["pools"][0]["factory"] = serde_json::json!("not-an-address");
        let config: ChainConfig = serde_json::from_value(value).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_rpc_urls() {
        let mut value = chain_json();
        value["rpc_urls"] = serde_json::json!([]);
        let config: ChainConfig = serde_json::from_value(value).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn legacy_single_rpc_url_is_accepted() {
        let mut value = chain_json();
        value["rpc_urls"] = serde_json::json!([]);
        value["rpc_url"] = serde_json::json!("http://localhost:9999");
        let config: ChainConfig = serde_json::from_value(value).unwrap();
        config.validate().unwrap();
        assert_eq!(config.primary_rpc_urls(), vec!["http://localhost:9999"]);
    }

    #[test]
    fn v4_entry_uses_pool_manager_and_init_topic() {
        let entry = ProtocolEntry {
            protocol: Protocol::UniswapV4,
            enabled: true,
            factory: None,
            pool_manager: Some("0x498581ff718922c3f8e6a244956af099b2652b2b".to_string()),
            creation_block: None,
            pool_created_topic: None,
            pool_init_topic: Some(TOPIC.to_string()),
            swap_topic: None,
            modify_liquidity_topic: None,
        };
        assert_eq!(
            entry.creation_contract(),
            Some("0x498581ff718922c3f8e6a244956af099b2652b2b")
        );
        assert_eq!(entry.creation_topic(), Some(TOPIC));
    }

    #[test]
    fn settings_defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.worker_interval_seconds, 15);
        assert_eq!(settings.max_blocks_per_request, 2000);
        assert_eq!(settings.lock_timeout_seconds, 300);
        assert_eq!(settings.confirmation_blocks, 5);
        assert!(settings.kafka_bootstrap_servers.is_none());
    }

    #[test]
    fn telegram_destinations_split_and_trim() {
        let settings = Settings {
            telegram_chat_ids: Some(" -100123, -100456 ,".to_string()),
            ..Settings::default()
        };
        assert_eq!(settings.telegram_destinations(), vec!["-100123", "-100456"]);
    }
}
