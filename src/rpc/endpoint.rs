use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

/// Consecutive failures after which an endpoint is considered unhealthy.
pub const UNHEALTHY_AFTER: u32 = 3;

/// Cooldown grows linearly with the failure streak, capped at five minutes.
const COOLDOWN_BASE_SECS: i64 = 30;
const COOLDOWN_CAP_SECS: i64 = 300;

/// Runtime health state for a single RPC URL. Shared across tasks, so every
/// counter is an atomic; the struct itself never needs a lock.
#[derive(Debug)]
pub struct RpcEndpoint {
    pub url: String,
    pub is_backup: bool,
    disabled: AtomicBool,
    consecutive_failures: AtomicU32,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    last_success_ms: AtomicI64,
    last_failure_ms: AtomicI64,
}

impl RpcEndpoint {
    pub fn new(url: impl Into<String>, is_backup: bool) -> Self {
        Self {
            url: url.into(),
            is_backup,
            disabled: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            last_success_ms: AtomicI64::new(0),
            last_failure_ms: AtomicI64::new(0),
        }
    }

    pub fn note_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, now_ms: i64) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_success_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self, now_ms: i64) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn healthy(&self) -> bool {
        self.consecutive_failures() < UNHEALTHY_AFTER
    }

    /// Permanently exclude this endpoint (chain-id mismatch).
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn cooldown_secs(&self) -> i64 {
        (self.consecutive_failures() as i64 * COOLDOWN_BASE_SECS).min(COOLDOWN_CAP_SECS)
    }

    /// Healthy, or its cooldown since the last failure has elapsed.
    pub fn eligible(&self, now_ms: i64) -> bool {
        if self.is_disabled() {
            return false;
        }
        if self.healthy() {
            return true;
        }
        let last_failure = self.last_failure_ms.load(Ordering::Relaxed);
        now_ms - last_failure >= self.cooldown_secs() * 1000
    }

    /// URLs carrying an unexpanded `${...}` placeholder are never dialed.
    pub fn has_placeholder(&self) -> bool {
        self.url.contains("${")
    }

    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            url: self.url.clone(),
            is_backup: self.is_backup,
            healthy: self.healthy(),
            disabled: self.is_disabled(),
            consecutive_failures: self.consecutive_failures(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            last_success: millis_to_datetime(self.last_success_ms.load(Ordering::Relaxed)),
            last_failure: millis_to_datetime(self.last_failure_ms.load(Ordering::Relaxed)),
        }
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        None
    } else {
        DateTime::from_timestamp_millis(ms)
    }
}

/// Point-in-time snapshot of an endpoint's counters.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub url: String,
    pub is_backup: bool,
    pub healthy: bool,
    pub disabled: bool,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_unhealthy_after_three_failures() {
        let ep = RpcEndpoint::new("http://a", false);
        assert!(ep.healthy());
        ep.record_failure(0);
        ep.record_failure(0);
        assert!(ep.healthy());
        ep.record_failure(0);
        assert!(!ep.healthy());
    }

    #[test]
    fn success_resets_failure_streak() {
        let ep = RpcEndpoint::new("http://a", false);
        for _ in 0..5 {
            ep.record_failure(0);
        }
        assert!(!ep.healthy());
        ep.record_success(1_000);
        assert!(ep.healthy());
        assert_eq!(ep.stats().total_failures, 5);
    }

    #[test]
    fn cooldown_grows_linearly_and_caps() {
        let ep = RpcEndpoint::new("http://a", false);
        for _ in 0..3 {
            ep.record_failure(0);
        }
        assert_eq!(ep.cooldown_secs(), 90);
        for _ in 0..20 {
            ep.record_failure(0);
        }
        assert_eq!(ep.cooldown_secs(), 300);
    }

    #[test]
    fn unhealthy_endpoint_becomes_eligible_after_cooldown() {
        let ep = RpcEndpoint::new("http://a", false);
        let t0 = 1_000_000;
        for _ in 0..3 {
            ep.record_failure(t0);
        }
        assert!(!ep.eligible(t0 + 1));
        assert!(ep.eligible(t0 + 90 * 1000));
    }

    #[test]
    fn disabled_endpoint_is_never_eligible() {
        let ep = RpcEndpoint::new("http://a", false);
        ep.disable();
        assert!(!ep.eligible(i64::MAX));
    }

    #[test]
    fn placeholder_detection() {
        assert!(RpcEndpoint::new("https://rpc.example/${API_KEY}", true).has_placeholder());
        assert!(!RpcEndpoint::new("https://rpc.example/v1", true).has_placeholder());
    }
}
