//! Moka tier capacity metrics.
//!
//! Enable the `metrics` feature to use these metrics.
//!
//! - `tierbox_moka_entries` - current number of entries (gauge)
//! - `tierbox_moka_size_bytes` - current weighted size in bytes (gauge)
//! - `tierbox_moka_evictions_total` - entries removed by the size bound (counter)
//!
//! All metrics carry a `tier` label naming the Moka instance.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Metric name for cache entry count gauge.
    pub static ref MOKA_ENTRIES: &'static str = {
        metrics::describe_gauge!(
            "tierbox_moka_entries",
            "Current number of entries in the Moka tier."
        );
        "tierbox_moka_entries"
    };

    /// Metric name for cache size gauge.
    pub static ref MOKA_SIZE_BYTES: &'static str = {
        metrics::describe_gauge!(
            "tierbox_moka_size_bytes",
            "Current weighted size of the Moka tier."
        );
        "tierbox_moka_size_bytes"
    };

    /// Metric name for capacity evictions counter.
    pub static ref MOKA_EVICTIONS: &'static str = {
        metrics::describe_counter!(
            "tierbox_moka_evictions_total",
            "Entries evicted from the Moka tier because it was at capacity."
        );
        "tierbox_moka_evictions_total"
    };
}

/// Record current cache capacity metrics.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_capacity(tier: &str, entries: u64, size: u64) {
    metrics::gauge!(*MOKA_ENTRIES, "tier" => tier.to_string()).set(entries as f64);
    metrics::gauge!(*MOKA_SIZE_BYTES, "tier" => tier.to_string()).set(size as f64);
}

/// Record current cache capacity metrics (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_capacity(_tier: &str, _entries: u64, _size: u64) {}

/// Record one capacity eviction.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_eviction(tier: &str) {
    metrics::counter!(*MOKA_EVICTIONS, "tier" => tier.to_string()).increment(1);
}

/// Record one capacity eviction (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_eviction(_tier: &str) {}
