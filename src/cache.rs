use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Dedup markers: pools/tokens live a day, swaps a week. The in-flight token
/// guard only needs to outlast one processing attempt.
pub const POOL_MARKER_TTL: u64 = 86_400;
pub const SWAP_MARKER_TTL: u64 = 604_800;
pub const TOKEN_GUARD_TTL: u64 = 300;

/// Key builders for the flat-key schema shared with other workers.
pub mod keys {
    pub fn pool_processed(chain_id: i64, pool_address: &str) -> String {
        format!("pool_processed:{chain_id}:{pool_address}")
    }

    pub fn swap_processed(tx_hash: &str, log_index: i64) -> String {
        format!("swap_processed:{tx_hash}:{log_index}")
    }

    pub fn token_processing(chain_id: i64, token_address: &str) -> String {
        format!("token_processing:{chain_id}:{token_address}")
    }

    pub fn pool_indexer_lock(chain_id: i64) -> String {
        format!("pool_indexer:{chain_id}")
    }

    pub fn coin_indexer_lock(chain_id: i64) -> String {
        format!("coin_indexer:{chain_id}")
    }

    pub fn swap_indexer_lock(chain_id: i64, pool_address: &str) -> String {
        format!("swap_indexer:{chain_id}:{pool_address}")
    }

    pub fn pool_state_refresh_lock(chain_id: i64) -> String {
        format!("pool_state_updater:{chain_id}")
    }

    pub fn stats_counter(chain_id: i64, name: &str) -> String {
        format!("stats:{chain_id}:{name}")
    }
}

/// Redis-backed dedup cache and distributed locks.
///
/// All keys are namespaced under the configured prefix; locks additionally
/// live under `lock:` so a marker and a lock can never collide.
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
    prefix: String,
}

impl Cache {
    pub async fn connect(url: &str, prefix: &str) -> eyre::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| eyre::eyre!("invalid Redis URL: {e}"))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| eyre::eyre!("failed to connect to Redis: {e}"))?;

        let cache = Self {
            conn,
            prefix: prefix.to_string(),
        };
        if !cache.ping().await {
            return Err(eyre::eyre!("Redis did not answer PING"));
        }
        tracing::info!(url, "Connected to Redis");
        Ok(cache)
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }

    /// Write a dedup marker. Callers invoke this only after the entity-store
    /// write has committed.
    pub async fn set_marker(&self, key: &str, ttl_secs: u64) -> eyre::Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(key), "1", ttl_secs).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> eyre::Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(self.key(key)).await?)
    }

    pub async fn delete(&self, key: &str) -> eyre::Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key)).await?;
        Ok(())
    }

    /// In-flight guard: `SET key NX EX ttl`. Returns whether this worker won.
    pub async fn try_set_guard(&self, key: &str, ttl_secs: u64) -> eyre::Result<bool> {
        let mut conn = self.conn.clone();
        let outcome: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(outcome.is_some())
    }

    /// Distributed mutex over a stream tick.
    pub async fn acquire_lock(&self, name: &str, ttl_secs: u64) -> eyre::Result<bool> {
        let mut conn = self.conn.clone();
        let outcome: Option<String> = redis::cmd("SET")
            .arg(self.key(&format!("lock:{name}")))
            .arg(format!("locked_{name}"))
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        let acquired = outcome.is_some();
        tracing::debug!(lock = name, acquired, "Lock acquisition");
        Ok(acquired)
    }

    pub async fn release_lock(&self, name: &str) -> eyre::Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(&format!("lock:{name}"))).await?;
        tracing::debug!(lock = name, "Lock released");
        Ok(())
    }

    /// Refresh a held lock's TTL; false when the lock has already expired.
    pub async fn extend_lock(&self, name: &str, ttl_secs: u64) -> eyre::Result<bool> {
        let mut conn = self.conn.clone();
        let key = self.key(&format!("lock:{name}"));
        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Ok(false);
        }
        conn.expire::<_, ()>(&key, ttl_secs as i64).await?;
        Ok(true)
    }

    pub async fn increment(&self, key: &str, by: i64) -> eyre::Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(self.key(key), by).await?)
    }

    pub async fn add_to_set(&self, key: &str, member: &str) -> eyre::Result<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(self.key(key), member).await?;
        Ok(())
    }

    pub async fn is_in_set(&self, key: &str, member: &str) -> eyre::Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(self.key(key), member).await?)
    }

    pub async fn remove_from_set(&self, key: &str, member: &str) -> eyre::Result<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(self.key(key), member).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_keys_follow_shared_schema() {
        assert_eq!(
            keys::pool_processed(8453, "0xabc"),
            "pool_processed:8453:0xabc"
        );
        assert_eq!(keys::swap_processed("0xdef", 3), "swap_processed:0xdef:3");
        assert_eq!(
            keys::token_processing(8453, "0xabc"),
            "token_processing:8453:0xabc"
        );
    }

    #[test]
    fn lock_keys_follow_shared_schema() {
        assert_eq!(keys::pool_indexer_lock(1), "pool_indexer:1");
        assert_eq!(keys::coin_indexer_lock(1), "coin_indexer:1");
        assert_eq!(
            keys::swap_indexer_lock(8453, "0xpool"),
            "swap_indexer:8453:0xpool"
        );
        assert_eq!(keys::pool_state_refresh_lock(10), "pool_state_updater:10");
    }

    #[test]
    fn marker_ttls_match_retention_policy() {
        assert_eq!(POOL_MARKER_TTL, 24 * 60 * 60);
        assert_eq!(SWAP_MARKER_TTL, 7 * 24 * 60 * 60);
        assert_eq!(TOKEN_GUARD_TTL, 5 * 60);
    }
}
