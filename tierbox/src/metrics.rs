//! Engine metrics.
//!
//! The [`MetricsCollector`] is always on: it keeps atomic counters per tier
//! and for the load and reload paths, and hands out read-only
//! [`MetricsSnapshot`]s. With the `metrics` feature every event is also
//! emitted through the `metrics` facade under the names declared below.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tierbox_core::TierLevel;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    // Cache status metrics

    /// Track number of cache hit events per tier.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_cache_hit_total",
            "Total number of cache hit events per tier."
        );
        "tierbox_cache_hit_total"
    };
    /// Track number of cache miss events per tier.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_cache_miss_total",
            "Total number of cache miss events per tier."
        );
        "tierbox_cache_miss_total"
    };
    /// Track number of values written per tier.
    pub static ref CACHE_SET_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_cache_set_total",
            "Total number of values written per tier."
        );
        "tierbox_cache_set_total"
    };
    /// Track number of deletions per tier.
    pub static ref CACHE_DELETE_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_cache_delete_total",
            "Total number of deletions per tier."
        );
        "tierbox_cache_delete_total"
    };
    /// Track number of absorbed or surfaced tier errors.
    pub static ref CACHE_ERROR_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_cache_error_total",
            "Total number of tier errors per tier."
        );
        "tierbox_cache_error_total"
    };
    /// Track number of L2 values promoted into L1.
    pub static ref CACHE_PROMOTION_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_cache_promotion_total",
            "Total number of values promoted from L2 into L1."
        );
        "tierbox_cache_promotion_total"
    };

    // Load path metrics

    /// Track number of backing-store loads.
    pub static ref LOAD_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_load_total",
            "Total number of backing-store loads."
        );
        "tierbox_load_total"
    };
    /// Track number of failed backing-store loads.
    pub static ref LOAD_ERROR_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_load_error_total",
            "Total number of failed backing-store loads."
        );
        "tierbox_load_error_total"
    };
    /// Track number of callers that joined an in-flight load.
    pub static ref STAMPEDE_JOIN_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_stampede_join_total",
            "Total number of callers that awaited another caller's load."
        );
        "tierbox_stampede_join_total"
    };

    // Background work metrics

    /// Track number of reloads by outcome.
    pub static ref RELOAD_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_reload_total",
            "Total number of scheduled or manual reloads by outcome."
        );
        "tierbox_reload_total"
    };
    /// Track number of failed write-behind persistence tasks.
    pub static ref WRITE_BEHIND_ERROR_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tierbox_write_behind_error_total",
            "Total number of write-behind writes the persistent store rejected."
        );
        "tierbox_write_behind_error_total"
    };

    // Offload manager metrics

    /// Track number of offload tasks spawned.
    pub static ref OFFLOAD_TASKS_SPAWNED: &'static str = {
        metrics::describe_counter!(
            "tierbox_offload_tasks_spawned_total",
            "Total number of offload tasks spawned."
        );
        "tierbox_offload_tasks_spawned_total"
    };
    /// Track number of offload tasks completed.
    pub static ref OFFLOAD_TASKS_COMPLETED: &'static str = {
        metrics::describe_counter!(
            "tierbox_offload_tasks_completed_total",
            "Total number of offload tasks completed."
        );
        "tierbox_offload_tasks_completed_total"
    };
    /// Track number of offload tasks that timed out.
    pub static ref OFFLOAD_TASKS_TIMEOUT: &'static str = {
        metrics::describe_counter!(
            "tierbox_offload_tasks_timeout_total",
            "Total number of offload tasks that timed out."
        );
        "tierbox_offload_tasks_timeout_total"
    };
    /// Track number of offload tasks skipped because one was in flight.
    pub static ref OFFLOAD_TASKS_DEDUPLICATED: &'static str = {
        metrics::describe_counter!(
            "tierbox_offload_tasks_deduplicated_total",
            "Total number of offload tasks skipped because the same key was in flight."
        );
        "tierbox_offload_tasks_deduplicated_total"
    };
    /// Gauge of currently active offload tasks.
    pub static ref OFFLOAD_TASKS_ACTIVE: &'static str = {
        metrics::describe_gauge!(
            "tierbox_offload_tasks_active",
            "Number of currently active offload tasks."
        );
        "tierbox_offload_tasks_active"
    };
    /// Histogram of offload task duration.
    pub static ref OFFLOAD_TASK_DURATION: &'static str = {
        metrics::describe_histogram!(
            "tierbox_offload_task_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of offload tasks in seconds."
        );
        "tierbox_offload_task_duration_seconds"
    };
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    promotions: AtomicU64,
}

impl TierCounters {
    fn stats(&self) -> TierStats {
        TierStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
            self.promotions.load(Ordering::Relaxed),
        )
    }

    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.errors,
            &self.promotions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Counters of a single tier, or of both tiers combined.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TierStats {
    /// Reads served.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Values written.
    pub sets: u64,
    /// Deletions issued.
    pub deletes: u64,
    /// Failed operations.
    pub errors: u64,
    /// `hits / (hits + misses)`, zero before the first read.
    pub hit_rate: f64,
    /// Values copied into L1 after repeated L2 reads.
    pub promotions: u64,
}

impl TierStats {
    fn new(hits: u64, misses: u64, sets: u64, deletes: u64, errors: u64, promotions: u64) -> Self {
        let reads = hits + misses;
        let hit_rate = if reads == 0 {
            0.0
        } else {
            hits as f64 / reads as f64
        };
        Self {
            hits,
            misses,
            sets,
            deletes,
            errors,
            hit_rate,
            promotions,
        }
    }
}

/// Point-in-time copy of every engine counter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricsSnapshot {
    /// In-process tier.
    pub l1: TierStats,
    /// Remote tier.
    pub l2: TierStats,
    /// Both tiers as one cache. A read that falls through L1 and is served
    /// by L2 is a single hit; only reads missing both tiers are misses.
    pub aggregate: TierStats,
    /// Backing-store loads started.
    pub loads: u64,
    /// Loads that failed or timed out.
    pub load_errors: u64,
    /// Callers that awaited a load started by another caller.
    pub stampede_joins: u64,
    /// Successful reloads.
    pub reloads: u64,
    /// Failed reloads.
    pub reload_errors: u64,
    /// Write-behind writes the persistent store rejected.
    pub write_behind_errors: u64,
}

/// Atomic counters behind [`MetricsSnapshot`].
#[derive(Debug, Default)]
pub struct MetricsCollector {
    l1: TierCounters,
    l2: TierCounters,
    loads: AtomicU64,
    load_errors: AtomicU64,
    stampede_joins: AtomicU64,
    reloads: AtomicU64,
    reload_errors: AtomicU64,
    write_behind_errors: AtomicU64,
}

impl MetricsCollector {
    fn tier(&self, tier: TierLevel) -> &TierCounters {
        match tier {
            TierLevel::L1 => &self.l1,
            TierLevel::L2 => &self.l2,
        }
    }

    pub(crate) fn hit(&self, tier: TierLevel) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
        record_tier_event(TierEvent::Hit, tier);
    }

    pub(crate) fn miss(&self, tier: TierLevel) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
        record_tier_event(TierEvent::Miss, tier);
    }

    pub(crate) fn set(&self, tier: TierLevel) {
        self.tier(tier).sets.fetch_add(1, Ordering::Relaxed);
        record_tier_event(TierEvent::Set, tier);
    }

    pub(crate) fn delete(&self, tier: TierLevel) {
        self.tier(tier).deletes.fetch_add(1, Ordering::Relaxed);
        record_tier_event(TierEvent::Delete, tier);
    }

    pub(crate) fn error(&self, tier: TierLevel) {
        self.tier(tier).errors.fetch_add(1, Ordering::Relaxed);
        record_tier_event(TierEvent::Error, tier);
    }

    pub(crate) fn promotion(&self) {
        self.l1.promotions.fetch_add(1, Ordering::Relaxed);
        record_tier_event(TierEvent::Promotion, TierLevel::L1);
    }

    pub(crate) fn load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        record_engine_event(EngineEvent::Load);
    }

    pub(crate) fn load_error(&self) {
        self.load_errors.fetch_add(1, Ordering::Relaxed);
        record_engine_event(EngineEvent::LoadError);
    }

    pub(crate) fn stampede_join(&self) {
        self.stampede_joins.fetch_add(1, Ordering::Relaxed);
        record_engine_event(EngineEvent::StampedeJoin);
    }

    pub(crate) fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
        record_engine_event(EngineEvent::Reload);
    }

    pub(crate) fn reload_error(&self) {
        self.reload_errors.fetch_add(1, Ordering::Relaxed);
        record_engine_event(EngineEvent::ReloadError);
    }

    pub(crate) fn write_behind_error(&self) {
        self.write_behind_errors.fetch_add(1, Ordering::Relaxed);
        record_engine_event(EngineEvent::WriteBehindError);
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let l1 = self.l1.stats();
        let l2 = self.l2.stats();
        let aggregate = TierStats::new(
            l1.hits + l2.hits,
            l2.misses,
            l1.sets + l2.sets,
            l1.deletes + l2.deletes,
            l1.errors + l2.errors,
            l1.promotions,
        );
        MetricsSnapshot {
            l1,
            l2,
            aggregate,
            loads: self.loads.load(Ordering::Relaxed),
            load_errors: self.load_errors.load(Ordering::Relaxed),
            stampede_joins: self.stampede_joins.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            reload_errors: self.reload_errors.load(Ordering::Relaxed),
            write_behind_errors: self.write_behind_errors.load(Ordering::Relaxed),
        }
    }

    /// Sets every counter back to zero.
    pub fn reset(&self) {
        self.l1.reset();
        self.l2.reset();
        for counter in [
            &self.loads,
            &self.load_errors,
            &self.stampede_joins,
            &self.reloads,
            &self.reload_errors,
            &self.write_behind_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TierEvent {
    Hit,
    Miss,
    Set,
    Delete,
    Error,
    Promotion,
}

#[derive(Debug, Clone, Copy)]
enum EngineEvent {
    Load,
    LoadError,
    StampedeJoin,
    Reload,
    ReloadError,
    WriteBehindError,
}

#[cfg(feature = "metrics")]
#[inline]
fn record_tier_event(event: TierEvent, tier: TierLevel) {
    let name = match event {
        TierEvent::Hit => *CACHE_HIT_COUNTER,
        TierEvent::Miss => *CACHE_MISS_COUNTER,
        TierEvent::Set => *CACHE_SET_COUNTER,
        TierEvent::Delete => *CACHE_DELETE_COUNTER,
        TierEvent::Error => *CACHE_ERROR_COUNTER,
        TierEvent::Promotion => *CACHE_PROMOTION_COUNTER,
    };
    metrics::counter!(name, "tier" => tier.as_str()).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
fn record_tier_event(_event: TierEvent, _tier: TierLevel) {}

#[cfg(feature = "metrics")]
#[inline]
fn record_engine_event(event: EngineEvent) {
    match event {
        EngineEvent::Load => metrics::counter!(*LOAD_COUNTER).increment(1),
        EngineEvent::LoadError => metrics::counter!(*LOAD_ERROR_COUNTER).increment(1),
        EngineEvent::StampedeJoin => metrics::counter!(*STAMPEDE_JOIN_COUNTER).increment(1),
        EngineEvent::Reload => {
            metrics::counter!(*RELOAD_COUNTER, "outcome" => "success").increment(1)
        }
        EngineEvent::ReloadError => {
            metrics::counter!(*RELOAD_COUNTER, "outcome" => "error").increment(1)
        }
        EngineEvent::WriteBehindError => {
            metrics::counter!(*WRITE_BEHIND_ERROR_COUNTER).increment(1)
        }
    }
}

#[cfg(not(feature = "metrics"))]
#[inline]
fn record_engine_event(_event: EngineEvent) {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn aggregate_counts_l2_misses_only() {
        let collector = MetricsCollector::default();
        // L1 hit.
        collector.hit(TierLevel::L1);
        // L1 miss served by L2.
        collector.miss(TierLevel::L1);
        collector.hit(TierLevel::L2);
        // Miss in both tiers.
        collector.miss(TierLevel::L1);
        collector.miss(TierLevel::L2);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.l1.hits, 1);
        assert_eq!(snapshot.l1.misses, 2);
        assert_eq!(snapshot.aggregate.hits, 2);
        assert_eq!(snapshot.aggregate.misses, 1);
        assert!((snapshot.aggregate.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!((snapshot.l2.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_collector_has_zero_hit_rate() {
        let snapshot = MetricsCollector::default().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
    }

    #[test]
    fn reset_clears_every_counter() {
        let collector = MetricsCollector::default();
        collector.promotion();
        collector.load();
        collector.write_behind_error();
        collector.error(TierLevel::L2);
        collector.reset();
        assert_eq!(collector.snapshot(), MetricsSnapshot::default());
    }
}
