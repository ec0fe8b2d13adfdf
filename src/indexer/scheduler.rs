use chrono::{DateTime, Utc};

use crate::models::Pool;

/// First-run scans never reach back past this many blocks before head.
const MAX_REASONABLE_AGE: u64 = 10_000_000;

/// Cap on the very first creation scan when no creation blocks are known.
const FIRST_SCAN_CAP: u64 = 10_000;

/// An inclusive block range for one stream tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: u64,
    pub to: u64,
}

impl Window {
    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }
}

/// Clamp a window to the request cap and the confirmation horizon.
/// `None` means there is nothing to do this tick.
pub fn clamp_window(
    from: u64,
    head: u64,
    max_blocks_per_request: u64,
    confirmation_blocks: u64,
) -> Option<Window> {
    let horizon = head.saturating_sub(confirmation_blocks);
    let to = from
        .saturating_add(max_blocks_per_request.saturating_sub(1))
        .min(horizon);
    if from > to {
        None
    } else {
        Some(Window { from, to })
    }
}

pub fn max_scan_window(max_blocks_per_request: u64) -> u64 {
    (max_blocks_per_request * 10).min(FIRST_SCAN_CAP)
}

/// First-run start block for the creation streams.
///
/// Prefers the oldest enabled contract creation block that is no more than
/// ten million blocks behind head; when every creation block is older than
/// that, the newest one; with nothing configured, a recent-history scan
/// floored at the configured start block. Creation blocks after head are
/// misconfiguration and must be filtered by the caller.
pub fn first_run_start(
    creation_blocks: &[u64],
    head: u64,
    configured_start: u64,
    max_scan_window: u64,
) -> u64 {
    let oldest_reasonable = head.saturating_sub(MAX_REASONABLE_AGE);
    let in_range: Vec<u64> = creation_blocks
        .iter()
        .copied()
        .filter(|&b| b >= oldest_reasonable)
        .collect();

    if let Some(&start) = in_range.iter().min() {
        start
    } else if let Some(&newest) = creation_blocks.iter().max() {
        newest
    } else {
        head.saturating_sub(max_scan_window).max(configured_start)
    }
}

/// Resume point for the per-pool swap/liquidity streams: never before the
/// pool existed, never a full request window behind head.
pub fn pool_stream_start(
    cursor: Option<i64>,
    creation_block: i64,
    head: u64,
    max_blocks_per_request: u64,
) -> u64 {
    match cursor {
        Some(last) => last as u64 + 1,
        None => (creation_block.max(0) as u64).max(head.saturating_sub(max_blocks_per_request)),
    }
}

/// Order pools for the swap loop: newly created pools first, and within the
/// same age the pools lagging head the most.
pub fn prioritize_pools(pools: &mut [Pool], head: u64, now: DateTime<Utc>) {
    pools.sort_by_key(|pool| {
        let age_secs = (now - pool.creation_timestamp).num_seconds().max(0);
        let behind = head.saturating_sub(pool.last_indexed_block.max(0) as u64);
        (age_secs, -(behind as i64))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testutil::sample_pool;
    use crate::models::Protocol;
    use chrono::Duration;

    #[test]
    fn resume_windows_walk_to_the_confirmation_horizon() {
        // Cursor at 1_000_000, head 1_002_500, cap 1000, confirmations 5.
        let head = 1_002_500;

        let w1 = clamp_window(1_000_001, head, 1000, 5).unwrap();
        assert_eq!((w1.from, w1.to), (1_000_001, 1_001_000));

        let w2 = clamp_window(w1.to + 1, head, 1000, 5).unwrap();
        assert_eq!((w2.from, w2.to), (1_001_001, 1_002_000));

        let w3 = clamp_window(w2.to + 1, head, 1000, 5).unwrap();
        assert_eq!((w3.from, w3.to), (1_002_001, 1_002_495));

        // Caught up: nothing further until head moves.
        assert_eq!(clamp_window(w3.to + 1, head, 1000, 5), None);
    }

    #[test]
    fn windows_never_exceed_the_request_cap() {
        for (from, head, cap, conf) in [
            (0u64, 10_000u64, 2000u64, 5u64),
            (1, 1_000_000, 1, 0),
            (999, 1_000, 2000, 0),
            (500, 20_000, 777, 12),
        ] {
            if let Some(w) = clamp_window(from, head, cap, conf) {
                assert!(w.len() <= cap, "window {w:?} exceeds cap {cap}");
                assert!(w.to <= head - conf);
            }
        }
    }

    #[test]
    fn window_is_skipped_when_inside_confirmation_horizon() {
        assert_eq!(clamp_window(996, 1000, 2000, 5), None);
        assert!(clamp_window(995, 1000, 2000, 5).is_some());
    }

    #[test]
    fn first_run_prefers_oldest_in_range_creation_block() {
        // Head 2_000_000: everything is within the ten-million-block range,
        // so the oldest wins (futures were already filtered by the caller).
        let start = first_run_start(&[1_750_000, 1_800_000], 2_000_000, 0, 10_000);
        assert_eq!(start, 1_750_000);
        assert_eq!(
            clamp_window(start, 2_000_000, 5000, 5).unwrap(),
            Window {
                from: 1_750_000,
                to: 1_754_999
            }
        );
    }

    #[test]
    fn first_run_falls_back_to_newest_when_all_ancient() {
        let head = 30_000_000;
        let blocks = [1_000, 5_000];
        // Both are more than ten million blocks old.
        assert_eq!(first_run_start(&blocks, head, 0, 10_000), 5_000);
    }

    #[test]
    fn first_run_without_creation_blocks_scans_recent_history() {
        assert_eq!(first_run_start(&[], 2_000_000, 0, 10_000), 1_990_000);
        // The configured start block floors the scan.
        assert_eq!(first_run_start(&[], 2_000_000, 1_995_000, 10_000), 1_995_000);
    }

    #[test]
    fn max_scan_window_is_capped() {
        assert_eq!(max_scan_window(500), 5_000);
        assert_eq!(max_scan_window(2_000), 10_000);
        assert_eq!(max_scan_window(50_000), 10_000);
    }

    #[test]
    fn pool_stream_start_resumes_or_looks_back() {
        assert_eq!(pool_stream_start(Some(120), 50, 1_000, 200), 121);
        // New pool created recently: start at creation.
        assert_eq!(pool_stream_start(None, 950, 1_000, 200), 950);
        // Old pool first seen now: look back one request window only.
        assert_eq!(pool_stream_start(None, 10, 10_000, 200), 9_800);
    }

    #[test]
    fn pools_sorted_newest_then_most_behind() {
        let now = Utc::now();
        let mut fresh_caught_up = sample_pool(Protocol::UniswapV2);
        fresh_caught_up.pool_address = "0xfresh-caught-up".to_string();
        fresh_caught_up.creation_timestamp = now - Duration::minutes(5);
        fresh_caught_up.last_indexed_block = 990;

        let mut fresh_behind = sample_pool(Protocol::UniswapV2);
        fresh_behind.pool_address = "0xfresh-behind".to_string();
        fresh_behind.creation_timestamp = now - Duration::minutes(5);
        fresh_behind.last_indexed_block = 100;

        let mut old = sample_pool(Protocol::UniswapV2);
        old.pool_address = "0xold".to_string();
        old.creation_timestamp = now - Duration::days(30);
        old.last_indexed_block = 0;

        let mut pools = vec![old, fresh_caught_up, fresh_behind];
        prioritize_pools(&mut pools, 1_000, now);

        let order: Vec<&str> = pools.iter().map(|p| p.pool_address.as_str()).collect();
        assert_eq!(order, vec!["0xfresh-behind", "0xfresh-caught-up", "0xold"]);
    }
}
