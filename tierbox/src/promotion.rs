//! L2-to-L1 promotion policy.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tierbox_core::CacheKey;
use tokio::time::Instant;

/// Counts L2 reads per key in a sliding window.
///
/// A key is promoted on the read that brings its count within the window up
/// to the threshold. One-off reads therefore never reach L1.
#[derive(Debug)]
pub(crate) struct PromotionTracker {
    threshold: u32,
    window: Duration,
    reads: DashMap<CacheKey, VecDeque<Instant>>,
}

impl PromotionTracker {
    pub(crate) fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold,
            window,
            reads: DashMap::new(),
        }
    }

    /// Records an L2 read of `key` and returns `true` if it should now be
    /// copied into L1.
    pub(crate) fn record_read(&self, key: &CacheKey, now: Instant) -> bool {
        if self.threshold <= 1 {
            return true;
        }
        let promote = {
            let mut reads = self.reads.entry(key.clone()).or_default();
            Self::evict_old(&mut reads, now, self.window);
            reads.push_back(now);
            reads.len() >= self.threshold as usize
        };
        if promote {
            self.reads.remove(key);
        }
        promote
    }

    /// Drops the read history of `key`.
    pub(crate) fn forget(&self, key: &CacheKey) {
        self.reads.remove(key);
    }

    pub(crate) fn clear(&self) {
        self.reads.clear();
    }

    /// Removes keys whose every recorded read left the window.
    pub(crate) fn prune(&self, now: Instant) {
        let window = self.window;
        self.reads.retain(|_, reads| {
            Self::evict_old(reads, now, window);
            !reads.is_empty()
        });
    }

    fn evict_old(reads: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while reads
            .front()
            .is_some_and(|read| now.saturating_duration_since(*read) >= window)
        {
            reads.pop_front();
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.reads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn promotes_on_threshold_read() {
        let tracker = PromotionTracker::new(3, Duration::from_secs(60));
        let key = CacheKey::new("hot");
        let now = Instant::now();
        assert!(!tracker.record_read(&key, now));
        assert!(!tracker.record_read(&key, now));
        assert!(tracker.record_read(&key, now));
        assert_eq!(tracker.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_outside_window_do_not_count() {
        let tracker = PromotionTracker::new(2, Duration::from_secs(10));
        let key = CacheKey::new("cold");
        let start = Instant::now();
        assert!(!tracker.record_read(&key, start));
        assert!(!tracker.record_read(&key, start + Duration::from_secs(11)));
        assert!(tracker.record_read(&key, start + Duration::from_secs(12)));
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_of_one_promotes_immediately() {
        let tracker = PromotionTracker::new(1, Duration::from_secs(10));
        assert!(tracker.record_read(&CacheKey::new("k"), Instant::now()));
        assert_eq!(tracker.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_expired_history() {
        let tracker = PromotionTracker::new(5, Duration::from_secs(10));
        let start = Instant::now();
        tracker.record_read(&CacheKey::new("a"), start);
        tracker.record_read(&CacheKey::new("b"), start + Duration::from_secs(8));
        tracker.prune(start + Duration::from_secs(12));
        assert_eq!(tracker.tracked(), 1);
    }
}
