use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{ChainConfig, Settings};
use crate::rpc::endpoint::{EndpointStats, RpcEndpoint};
use crate::rpc::Log;

/// Latest-block responses are served from memory for this long to absorb
/// bursts of concurrent schedulers.
const LATEST_BLOCK_CACHE: Duration = Duration::from_secs(3);

/// Per-attempt backoff cap inside a single failover pass.
const BACKOFF_CAP_SECS: u64 = 30;

/// Block timestamps already fetched this process; bounded by wholesale reset.
const TIMESTAMP_CACHE_MAX: usize = 4096;

/// Failover + round-robin JSON-RPC client for one chain.
///
/// A single logical call may traverse several endpoints: primaries are tried
/// in round-robin order (up to twice each, at most six attempts), then the
/// backups. Endpoint health is tracked per URL and shared across all tasks of
/// the chain.
pub struct RpcClient {
    chain_id: u64,
    chain_name: String,
    primaries: Vec<Arc<RpcEndpoint>>,
    backups: Vec<Arc<RpcEndpoint>>,
    rr: AtomicUsize,
    http: reqwest::Client,
    request_timeout: Duration,
    switch_threshold: u32,
    max_retries: u32,
    retry_delay: Duration,
    latest_block: Mutex<Option<(Instant, u64)>>,
    timestamps: Mutex<HashMap<u64, DateTime<Utc>>>,
    cancel: CancellationToken,
}

impl RpcClient {
    pub fn new(chain: &ChainConfig, settings: &Settings, cancel: CancellationToken) -> Self {
        // Shuffle primaries so parallel workers spread load across providers.
        let mut primary_urls = chain.primary_rpc_urls();
        primary_urls.shuffle(&mut rand::thread_rng());

        let primaries = primary_urls
            .into_iter()
            .map(|url| Arc::new(RpcEndpoint::new(url, false)))
            .collect();
        let backups = chain
            .backup_rpc_urls
            .iter()
            .map(|url| Arc::new(RpcEndpoint::new(url.clone(), true)))
            .collect();

        Self {
            chain_id: chain.chain_id,
            chain_name: chain.name.clone(),
            primaries,
            backups,
            rr: AtomicUsize::new(0),
            http: reqwest::Client::new(),
            request_timeout: Duration::from_secs(settings.rpc_request_timeout),
            switch_threshold: settings.rpc_switch_threshold,
            max_retries: settings.rpc_max_retries,
            retry_delay: Duration::from_secs(settings.rpc_retry_delay),
            latest_block: Mutex::new(None),
            timestamps: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    /// Probe every endpoint with `eth_chainId`. Endpoints answering for a
    /// different chain are refused for the process lifetime. Succeeds when at
    /// least one endpoint is reachable and matches.
    pub async fn connect(&self) -> eyre::Result<()> {
        let mut reachable = 0usize;

        for ep in self.primaries.iter().chain(self.backups.iter()) {
            if ep.has_placeholder() {
                continue;
            }
            match self.post(ep, "eth_chainId", &json!([])).await {
                Ok(value) => match value.as_str().and_then(hex_to_u64) {
                    Some(id) if id == self.chain_id => {
                        ep.record_success(now_ms());
                        reachable += 1;
                    }
                    Some(id) => {
                        ep.disable();
                        tracing::warn!(
                            chain = %self.chain_name,
                            url = %ep.url,
                            expected = self.chain_id,
                            got = id,
                            "RPC endpoint reports wrong chain id, refusing"
                        );
                    }
                    None => {
                        ep.record_failure(now_ms());
                        tracing::warn!(
                            chain = %self.chain_name,
                            url = %ep.url,
                            "RPC endpoint returned malformed chain id"
                        );
                    }
                },
                Err(e) => {
                    ep.record_failure(now_ms());
                    tracing::warn!(
                        chain = %self.chain_name,
                        url = %ep.url,
                        error = %e,
                        "RPC endpoint unreachable during connect"
                    );
                }
            }
        }

        if reachable == 0 {
            return Err(eyre::eyre!(
                "no usable RPC endpoint for chain {} ({})",
                self.chain_name,
                self.chain_id
            ));
        }

        let latest = self.latest_block().await?;
        tracing::info!(
            chain = %self.chain_name,
            chain_id = self.chain_id,
            endpoints = reachable,
            latest_block = latest,
            "Connected to RPC"
        );
        Ok(())
    }

    pub fn disconnect(&self) {
        tracing::info!(chain = %self.chain_name, "RPC client shut down");
    }

    pub async fn latest_block(&self) -> eyre::Result<u64> {
        {
            let cached = self.latest_block.lock().await;
            if let Some((at, block)) = *cached {
                if at.elapsed() < LATEST_BLOCK_CACHE {
                    return Ok(block);
                }
            }
        }

        let value = self.request("eth_blockNumber", json!([])).await?;
        let block = value
            .as_str()
            .and_then(hex_to_u64)
            .ok_or_else(|| eyre::eyre!("malformed eth_blockNumber result: {value}"))?;

        *self.latest_block.lock().await = Some((Instant::now(), block));
        Ok(block)
    }

    /// Block timestamp with method-level retry (exponential, capped attempts).
    /// One fetch per block per process; repeated asks hit the local cache.
    pub async fn block_timestamp(&self, block_number: u64) -> eyre::Result<DateTime<Utc>> {
        if let Some(ts) = self.timestamps.lock().await.get(&block_number) {
            return Ok(*ts);
        }

        let params = json!([format!("0x{block_number:x}"), false]);
        let mut last_err = None;

        for attempt in 0..self.max_retries {
            match self.request("eth_getBlockByNumber", params.clone()).await {
                Ok(value) => {
                    let ts = value
                        .get("timestamp")
                        .and_then(Value::as_str)
                        .and_then(hex_to_u64)
                        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
                        .ok_or_else(|| {
                            eyre::eyre!("malformed block data for block {block_number}")
                        })?;

                    let mut cache = self.timestamps.lock().await;
                    if cache.len() >= TIMESTAMP_CACHE_MAX {
                        cache.clear();
                    }
                    cache.insert(block_number, ts);
                    return Ok(ts);
                }
                Err(e) => {
                    let delay = self.retry_delay * 2u32.pow(attempt);
                    tracing::warn!(
                        chain = %self.chain_name,
                        block_number,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Failed to fetch block timestamp, retrying"
                    );
                    last_err = Some(e);
                    if attempt + 1 < self.max_retries {
                        self.cancellable_sleep(delay).await?;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| eyre::eyre!("block timestamp fetch failed")))
    }

    pub async fn logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: Option<&str>,
        topics: Option<Vec<String>>,
    ) -> eyre::Result<Vec<Log>> {
        let mut filter = serde_json::Map::new();
        filter.insert("fromBlock".into(), json!(format!("0x{from_block:x}")));
        filter.insert("toBlock".into(), json!(format!("0x{to_block:x}")));
        if let Some(address) = address {
            filter.insert("address".into(), json!(address));
        }
        if let Some(topics) = topics {
            filter.insert("topics".into(), json!(topics));
        }

        let value = self.request("eth_getLogs", json!([filter])).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        let logs: Vec<Log> = serde_json::from_value(value)
            .map_err(|e| eyre::eyre!("malformed eth_getLogs result: {e}"))?;
        Ok(logs)
    }

    /// `eth_call` against latest; returns the raw hex result.
    pub async fn call(&self, to: &str, data: &str) -> eyre::Result<String> {
        let params = json!([{"to": to, "data": data}, "latest"]);
        let value = self.request("eth_call", params).await?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| eyre::eyre!("malformed eth_call result: {value}"))
    }

    /// `eth_getCode`; `None` when the node returns null or empty code.
    pub async fn get_code(&self, address: &str) -> eyre::Result<Option<String>> {
        let value = self
            .request("eth_getCode", json!([address, "latest"]))
            .await?;
        match value.as_str() {
            None | Some("0x") | Some("") => Ok(None),
            Some(code) => Ok(Some(code.to_owned())),
        }
    }

    pub fn stats(&self) -> Vec<EndpointStats> {
        self.primaries
            .iter()
            .chain(self.backups.iter())
            .map(|ep| ep.stats())
            .collect()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// The ordered endpoint list for one logical call: primaries in
    /// round-robin order (each at most twice, capped at six attempts), then
    /// backups without placeholder URLs. Endpoints in cooldown are skipped
    /// unless that would leave nothing to try.
    fn attempt_list(&self, now_ms: i64) -> Vec<Arc<RpcEndpoint>> {
        let mut list: Vec<Arc<RpcEndpoint>> = Vec::new();

        if !self.primaries.is_empty() {
            let attempts = (self.primaries.len() * 2).min(6);
            for _ in 0..attempts {
                let idx = self.rr.fetch_add(1, Ordering::Relaxed) % self.primaries.len();
                list.push(self.primaries[idx].clone());
            }
        }
        for ep in &self.backups {
            if !ep.has_placeholder() {
                list.push(ep.clone());
            }
        }

        let eligible: Vec<Arc<RpcEndpoint>> = list
            .iter()
            .filter(|ep| ep.eligible(now_ms))
            .cloned()
            .collect();
        if eligible.is_empty() {
            // Everything is cooling down; trying anyway beats stalling.
            list.retain(|ep| !ep.is_disabled());
            list
        } else {
            eligible
        }
    }

    /// One failover pass over the attempt list.
    async fn request(&self, method: &str, params: Value) -> eyre::Result<Value> {
        let attempts = self.attempt_list(now_ms());
        if attempts.is_empty() {
            return Err(eyre::eyre!("no usable RPC endpoints"));
        }

        let mut last_err: Option<eyre::Report> = None;

        for (i, ep) in attempts.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(eyre::eyre!("RPC call cancelled"));
            }

            match self.post(ep, method, &params).await {
                Ok(value) => {
                    ep.record_success(now_ms());
                    if i > 0 {
                        tracing::info!(
                            chain = %self.chain_name,
                            method,
                            attempt = i + 1,
                            url = %ep.url,
                            "RPC call succeeded after failover"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    ep.record_failure(now_ms());
                    tracing::warn!(
                        chain = %self.chain_name,
                        method,
                        url = %ep.url,
                        attempt = i + 1,
                        remaining = attempts.len() - i - 1,
                        error = %e,
                        "RPC call failed, trying next endpoint"
                    );
                    if ep.consecutive_failures() >= self.switch_threshold {
                        tracing::warn!(
                            chain = %self.chain_name,
                            url = %ep.url,
                            failures = ep.consecutive_failures(),
                            "Endpoint past failure threshold, rotating to next"
                        );
                        self.rr.fetch_add(1, Ordering::Relaxed);
                    }
                    last_err = Some(e);

                    if i + 1 < attempts.len() {
                        let delay =
                            Duration::from_secs(2u64.pow(i.min(5) as u32).min(BACKOFF_CAP_SECS));
                        self.cancellable_sleep(delay).await?;
                    }
                }
            }
        }

        Err(eyre::eyre!(
            "all {} RPC endpoints failed for {}: {}",
            attempts.len(),
            method,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ))
    }

    /// Single JSON-RPC POST to one endpoint. HTTP errors, JSON-RPC errors and
    /// unexpected null results all count as endpoint failures.
    async fn post(&self, ep: &RpcEndpoint, method: &str, params: &Value) -> eyre::Result<Value> {
        ep.note_request();

        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let response = self
            .http
            .post(&ep.url)
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| eyre::eyre!("request error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(eyre::eyre!("HTTP {status}"));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| eyre::eyre!("invalid JSON response: {e}"))?;

        if let Some(error) = body.get("error") {
            if !error.is_null() {
                return Err(eyre::eyre!("RPC error: {error}"));
            }
        }

        let result = body.get("result").cloned().unwrap_or(Value::Null);
        if result.is_null() && method != "eth_getCode" && method != "eth_getLogs" {
            return Err(eyre::eyre!("null result for {method}"));
        }
        Ok(result)
    }

    async fn cancellable_sleep(&self, delay: Duration) -> eyre::Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.cancel.cancelled() => Err(eyre::eyre!("RPC call cancelled")),
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn hex_to_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;

    fn client_with(primaries: &[&str], backups: &[&str]) -> RpcClient {
        let mut chain = ChainConfig::for_tests(8453, "base");
        chain.rpc_urls = primaries.iter().map(|s| s.to_string()).collect();
        chain.backup_rpc_urls = backups.iter().map(|s| s.to_string()).collect();
        RpcClient::new(&chain, &Settings::default(), CancellationToken::new())
    }

    #[test]
    fn attempt_list_tries_primaries_before_backups() {
        let client = client_with(&["http://p1", "http://p2"], &["http://b1"]);
        let list = client.attempt_list(now_ms());

        // Two primaries, each tried at most twice, then the backup.
        assert_eq!(list.len(), 5);
        assert!(list[..4].iter().all(|ep| !ep.is_backup));
        assert!(list[4].is_backup);
    }

    #[test]
    fn attempt_list_caps_primary_attempts_at_six() {
        let urls: Vec<String> = (0..8).map(|i| format!("http://p{i}")).collect();
        let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
        let client = client_with(&refs, &[]);
        assert_eq!(client.attempt_list(now_ms()).len(), 6);
    }

    #[test]
    fn attempt_list_round_robin_rotates_between_calls() {
        let client = client_with(&["http://p1", "http://p2", "http://p3"], &[]);
        let first = client.attempt_list(now_ms());
        let second = client.attempt_list(now_ms());
        // Six primary attempts consumed per call over three endpoints, so the
        // rotation lands back on the same start; the lists cycle rather than
        // always starting at index zero mid-call.
        assert_eq!(first[0].url, first[3].url);
        assert_eq!(second[0].url, first[0].url);
        assert_ne!(first[0].url, first[1].url);
    }

    #[test]
    fn attempt_list_skips_placeholder_backups() {
        let client = client_with(&["http://p1"], &["https://x/${API_KEY}", "http://b2"]);
        let list = client.attempt_list(now_ms());
        assert!(list.iter().all(|ep| !ep.url.contains("${")));
        assert!(list.iter().any(|ep| ep.url == "http://b2"));
    }

    #[test]
    fn attempt_list_falls_back_when_all_endpoints_cooling_down() {
        let client = client_with(&["http://p1"], &[]);
        let now = now_ms();
        for _ in 0..3 {
            client.primaries[0].record_failure(now);
        }
        assert!(!client.primaries[0].eligible(now));
        // Still returned so a call can be attempted at all.
        assert!(!client.attempt_list(now).is_empty());
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(hex_to_u64("0x1b4"), Some(436));
        assert_eq!(hex_to_u64("1b4"), Some(436));
        assert_eq!(hex_to_u64("0xzz"), None);
    }
}
