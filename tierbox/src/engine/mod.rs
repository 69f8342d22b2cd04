//! The multi-level cache engine.
//!
//! A [`CacheEngine`] composes an in-process [`LocalTier`] (L1), a shared
//! [`RemoteTier`] (L2) and, for the store-writing strategies, a
//! [`PersistentStore`]. Reads go L1, then L2, then the loader through the
//! stampede guard. Writes follow the configured [`StrategyKind`].
//!
//! Cloning an engine is cheap and every clone shares the same state, so an
//! engine is passed by value to whoever needs caching.
//!
//! [`StrategyKind`]: tierbox_core::StrategyKind

mod read;
mod write;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tierbox_backend::metrics::{
    Timer, record_read, record_read_error, record_write, record_write_error,
};
use tierbox_backend::{BackendError, BackendResult, Codec, LocalTier, RemoteTier};
use tierbox_core::{CacheEntry, CacheKey, KeyPattern, Raw, TierLevel};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::CacheError;
use crate::concurrency::{LoadFence, StampedeGuard};
use crate::config::CacheConfig;
use crate::invalidation::{DependencyGraph, EventTable};
use crate::listener::{EventListener, ListenerChain};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::offload::{OffloadConfig, OffloadManager};
use crate::promotion::PromotionTracker;
use crate::registry::LoaderRegistry;
use crate::reload::ReloadTable;
use crate::store::PersistentStore;

pub(crate) struct EngineInner {
    pub(crate) config: CacheConfig,
    pub(crate) l1: Arc<dyn LocalTier>,
    pub(crate) l2: Arc<dyn RemoteTier>,
    pub(crate) store: Option<Arc<dyn PersistentStore>>,
    pub(crate) codec: Codec,
    pub(crate) guard: StampedeGuard,
    pub(crate) fence: LoadFence,
    pub(crate) promotion: PromotionTracker,
    pub(crate) graph: DependencyGraph,
    pub(crate) events: EventTable,
    pub(crate) registry: LoaderRegistry,
    pub(crate) reloads: ReloadTable,
    pub(crate) metrics: MetricsCollector,
    pub(crate) listeners: ListenerChain,
    pub(crate) offload: OffloadManager,
    /// Version of the newest pending write-behind persistence per key.
    pub(crate) write_behind: DashMap<CacheKey, u64>,
    version: AtomicU64,
}

/// Multi-level cache engine.
///
/// ```ignore
/// use std::time::Duration;
/// use tierbox::CacheEngine;
/// use tierbox_redis::RedisTier;
///
/// let engine = CacheEngine::builder()
///     .l2(RedisTier::builder().prefix("app:").build()?)
///     .build()?;
///
/// engine.set("user:1", &"alice", Some(Duration::from_secs(60))).await?;
/// assert_eq!(engine.get::<String>("user:1").await.as_deref(), Some("alice"));
///
/// engine.delete("user:1").await?;
/// assert_eq!(engine.get::<String>("user:1").await, None);
/// ```
#[derive(Clone)]
pub struct CacheEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("l1", &self.inner.l1.name())
            .field("l2", &self.inner.l2.name())
            .field("store", &self.inner.store.is_some())
            .field("strategy", &self.inner.config.default_strategy)
            .field("listeners", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

impl CacheEngine {
    /// Creates a builder with the default configuration.
    pub fn builder() -> CacheEngineBuilder {
        CacheEngineBuilder::default()
    }

    /// Returns the configuration the engine was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the value codec shared by both tiers.
    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    /// Returns the manager running write-behind and reload tasks.
    pub fn offload(&self) -> &OffloadManager {
        &self.inner.offload
    }

    /// Read-only snapshot of every counter.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Sets every counter back to zero.
    pub fn reset_metrics(&self) {
        self.inner.metrics.reset();
    }

    /// Returns `true` if `key` is cached in either tier.
    ///
    /// Tier failures are logged and reported as absence.
    pub async fn exists(&self, key: impl Into<CacheKey>) -> bool {
        let key = key.into();
        match self.inner.l1.get(&key).await {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(err) => warn!(key = %key, error = %err, "l1 lookup failed"),
        }
        match self.remote(self.inner.l2.read(&key)).await {
            Ok(found) => found.is_some(),
            Err(err) => {
                warn!(key = %key, error = %err, "l2 lookup failed");
                self.inner.metrics.error(TierLevel::L2);
                false
            }
        }
    }

    /// Remaining lifetime of `key`, L1 first, then L2.
    pub async fn ttl_remaining(&self, key: impl Into<CacheKey>) -> Option<Duration> {
        let key = key.into();
        if let Ok(Some(entry)) = self.inner.l1.get(&key).await {
            return entry.ttl();
        }
        match self.remote(self.inner.l2.ttl_remaining(&key)).await {
            Ok(ttl) => ttl,
            Err(err) => {
                warn!(key = %key, error = %err, "l2 ttl lookup failed");
                self.inner.metrics.error(TierLevel::L2);
                None
            }
        }
    }

    /// Removes every entry from both tiers. Returns the number of L2 keys
    /// deleted.
    ///
    /// Loads in flight when `clear` starts do not publish their values.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        self.inner.fence.supersede_all();
        self.inner.guard.forget_all();
        self.inner.promotion.clear();

        let mut first_error = None;
        let mut removed = 0;
        match self.remote(self.inner.l2.scan(&KeyPattern::any())).await {
            Ok(keys) => {
                for key in &keys {
                    match self.delete_l2(key).await {
                        Ok(true) => removed += 1,
                        Ok(false) => {}
                        Err(err) => {
                            first_error.get_or_insert(err);
                        }
                    }
                }
            }
            Err(err) => {
                self.inner.metrics.error(TierLevel::L2);
                first_error = Some(CacheError::tier(TierLevel::L2, err));
            }
        }

        // Promotions of values read from L2 before the deletes evict themselves.
        self.inner.fence.supersede_all();
        if let Err(err) = self.inner.l1.clear().await {
            self.inner.metrics.error(TierLevel::L1);
            first_error.get_or_insert(CacheError::tier(TierLevel::L1, err));
        }
        debug!(removed, "cleared cache");
        match first_error {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }

    /// Checks both tiers. L2 is probed with a round trip.
    pub async fn health_check(&self) -> HealthReport {
        let l1 = TierHealth {
            name: self.inner.l1.name().to_owned(),
            healthy: true,
            latency: Duration::ZERO,
            entries: Some(self.inner.l1.len()),
            error: None,
        };
        let start = Instant::now();
        let ping = self.remote(self.inner.l2.ping()).await;
        let l2 = TierHealth {
            name: self.inner.l2.name().to_owned(),
            healthy: ping.is_ok(),
            latency: start.elapsed(),
            entries: None,
            error: ping.err().map(|err| err.to_string()),
        };
        HealthReport { l1, l2 }
    }

    /// Waits for pending write-behind persistence and running reloads.
    ///
    /// Tasks still running after `timeout` are cancelled and `false` is
    /// returned. A cancelled write-behind value never reaches the store.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if self.inner.offload.wait_all_within(timeout).await {
            return true;
        }
        warn!(
            pending = self.inner.offload.active_task_count(),
            "background tasks did not finish in time, cancelling"
        );
        self.inner.offload.cancel_all();
        self.inner.write_behind.clear();
        false
    }

    // Tier plumbing shared by the read, write, invalidation and reload paths.

    pub(crate) fn next_version(&self) -> u64 {
        self.inner.version.fetch_add(1, Ordering::Relaxed)
    }

    /// Issues a remote tier call under the configured timeout.
    pub(crate) async fn remote<T>(
        &self,
        call: impl Future<Output = BackendResult<T>>,
    ) -> BackendResult<T> {
        let limit = self.inner.config.remote_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(limit)),
        }
    }

    pub(crate) fn encode<T>(&self, key: &CacheKey, value: &T) -> Result<Raw, CacheError>
    where
        T: Serialize + ?Sized,
    {
        self.inner
            .codec
            .encode(value)
            .map_err(|err| CacheError::serialization(key, err))
    }

    pub(crate) fn decode<T>(&self, key: &CacheKey, data: &[u8]) -> Result<T, CacheError>
    where
        T: DeserializeOwned,
    {
        self.inner
            .codec
            .decode(data)
            .map_err(|err| CacheError::serialization(key, err))
    }

    pub(crate) async fn write_l1(
        &self,
        key: &CacheKey,
        raw: Raw,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let tier = self.inner.l1.name();
        let bytes = raw.len();
        let entry = CacheEntry::new(key.clone(), raw, ttl, self.next_version());
        let timer = Timer::new();
        match self.inner.l1.set(entry).await {
            Ok(()) => {
                record_write(tier, timer.elapsed(), bytes);
                self.inner.metrics.set(TierLevel::L1);
                self.inner.graph.touch(key, ttl);
                Ok(())
            }
            Err(err) => {
                record_write_error(tier);
                self.inner.metrics.error(TierLevel::L1);
                Err(CacheError::tier(TierLevel::L1, err))
            }
        }
    }

    pub(crate) async fn write_l2(
        &self,
        key: &CacheKey,
        raw: Raw,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let tier = self.inner.l2.name();
        let bytes = raw.len();
        let timer = Timer::new();
        match self.remote(self.inner.l2.write(key, raw, ttl)).await {
            Ok(()) => {
                record_write(tier, timer.elapsed(), bytes);
                self.inner.metrics.set(TierLevel::L2);
                self.inner.graph.touch(key, ttl);
                Ok(())
            }
            Err(err) => {
                record_write_error(tier);
                self.inner.metrics.error(TierLevel::L2);
                Err(CacheError::tier(TierLevel::L2, err))
            }
        }
    }

    /// Writes L2 then L1. Tier failures are logged and absorbed.
    pub(crate) async fn populate(
        &self,
        key: &CacheKey,
        raw: Raw,
        l1_ttl: Duration,
        l2_ttl: Duration,
    ) {
        if let Err(err) = self.write_l2(key, raw.clone(), l2_ttl).await {
            warn!(key = %key, error = %err, "l2 write failed, continuing with l1 only");
        }
        if let Err(err) = self.write_l1(key, raw, l1_ttl).await {
            warn!(key = %key, error = %err, "l1 write failed");
        }
    }

    pub(crate) async fn delete_l1(&self, key: &CacheKey) -> Result<bool, CacheError> {
        match self.inner.l1.delete(key).await {
            Ok(status) => {
                self.inner.metrics.delete(TierLevel::L1);
                Ok(status.count() > 0)
            }
            Err(err) => {
                self.inner.metrics.error(TierLevel::L1);
                Err(CacheError::tier(TierLevel::L1, err))
            }
        }
    }

    pub(crate) async fn delete_l2(&self, key: &CacheKey) -> Result<bool, CacheError> {
        match self.remote(self.inner.l2.remove(key)).await {
            Ok(status) => {
                self.inner.metrics.delete(TierLevel::L2);
                Ok(status.count() > 0)
            }
            Err(err) => {
                self.inner.metrics.error(TierLevel::L2);
                Err(CacheError::tier(TierLevel::L2, err))
            }
        }
    }

    /// Deletes `key` from L2, then L1. Both deletes are attempted; the first
    /// failure is returned.
    pub(crate) async fn delete_cached(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let l2 = self.delete_l2(key).await;
        let l1 = self.delete_l1(key).await;
        Ok(l2? | l1?)
    }

    /// Fences off loads in flight for `key` and detaches waiters from them.
    pub(crate) fn supersede(&self, key: &CacheKey) {
        self.inner.fence.supersede(key);
        self.inner.guard.forget(key);
        self.inner.promotion.forget(key);
    }

    /// Supersedes in-flight loads, then deletes from both tiers.
    ///
    /// A reader that got past L1 before the L2 delete may still hold the old
    /// value, so the fence is bumped again before L1 is cleared: its
    /// promotion either lands before the L1 delete or evicts itself.
    pub(crate) async fn remove_everywhere(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.supersede(key);
        let l2 = self.delete_l2(key).await;
        self.inner.fence.supersede(key);
        let l1 = self.delete_l1(key).await;
        Ok(l2? | l1?)
    }

    /// Best-effort removal used to undo a write that lost a race.
    pub(crate) async fn evict_quietly(&self, key: &CacheKey) {
        if let Err(err) = self.delete_cached(key).await {
            warn!(key = %key, error = %err, "failed to evict superseded value");
        }
    }

    pub(crate) async fn read_l1(&self, key: &CacheKey) -> Option<CacheEntry> {
        let tier = self.inner.l1.name();
        let timer = Timer::new();
        match self.inner.l1.get(key).await {
            Ok(entry) => {
                record_read(tier, timer.elapsed());
                entry
            }
            Err(err) => {
                record_read_error(tier);
                warn!(key = %key, error = %err, "l1 read failed");
                self.inner.metrics.error(TierLevel::L1);
                None
            }
        }
    }

    pub(crate) async fn read_l2(&self, key: &CacheKey) -> Option<Raw> {
        let tier = self.inner.l2.name();
        let timer = Timer::new();
        match self.remote(self.inner.l2.read(key)).await {
            Ok(raw) => {
                record_read(tier, timer.elapsed());
                raw
            }
            Err(err) => {
                record_read_error(tier);
                warn!(key = %key, error = %err, "l2 unavailable, degrading to l1");
                self.inner.metrics.error(TierLevel::L2);
                None
            }
        }
    }
}

/// Health of a single tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierHealth {
    /// Tier name as reported by the tier.
    pub name: String,
    /// Whether the tier answered.
    pub healthy: bool,
    /// Round-trip time of the probe.
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    /// Entry count, for tiers that know it cheaply.
    pub entries: Option<u64>,
    /// Probe failure, if any.
    pub error: Option<String>,
}

/// Result of [`CacheEngine::health_check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// In-process tier.
    pub l1: TierHealth,
    /// Remote tier.
    pub l2: TierHealth,
}

impl HealthReport {
    /// `true` when both tiers are healthy.
    pub fn is_healthy(&self) -> bool {
        self.l1.healthy && self.l2.healthy
    }
}

/// Builder for [`CacheEngine`].
#[derive(Default)]
pub struct CacheEngineBuilder {
    config: CacheConfig,
    l1: Option<Arc<dyn LocalTier>>,
    l2: Option<Arc<dyn RemoteTier>>,
    store: Option<Arc<dyn PersistentStore>>,
    listeners: ListenerChain,
    offload: OffloadConfig,
}

impl CacheEngineBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the in-process tier. Without one, a Moka tier sized by
    /// `l1_max_entries` is used.
    pub fn l1(mut self, tier: impl LocalTier + 'static) -> Self {
        self.l1 = Some(Arc::new(tier));
        self
    }

    /// Set the remote tier.
    pub fn l2(mut self, tier: impl RemoteTier + 'static) -> Self {
        self.l2 = Some(Arc::new(tier));
        self
    }

    /// Set the persistent store used by store-writing strategies.
    pub fn store(mut self, store: impl PersistentStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Register a listener for background outcomes.
    pub fn listener(mut self, listener: impl EventListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Set the policy of the background task manager.
    pub fn offload(mut self, config: OffloadConfig) -> Self {
        self.offload = config;
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<CacheEngine, CacheError> {
        let config = self.config;
        config.validate()?;
        if config.default_strategy.writes_store() && self.store.is_none() {
            return Err(CacheError::InvalidConfiguration(format!(
                "strategy {} requires a persistent store",
                config.default_strategy
            )));
        }
        let l2 = self.l2.ok_or_else(|| {
            CacheError::InvalidConfiguration("a remote tier is required".to_owned())
        })?;
        let l1 = match self.l1 {
            Some(l1) => l1,
            None => default_l1(&config)?,
        };
        let codec = config.codec.to_codec()?;

        Ok(CacheEngine {
            inner: Arc::new(EngineInner {
                guard: StampedeGuard::new(config.stampede_prevention_enabled),
                fence: LoadFence::default(),
                promotion: PromotionTracker::new(
                    config.promotion_threshold,
                    config.promotion_window,
                ),
                graph: DependencyGraph::default(),
                events: EventTable::default(),
                registry: LoaderRegistry::default(),
                reloads: ReloadTable::new(config.reload_max_concurrency),
                metrics: MetricsCollector::default(),
                listeners: self.listeners,
                offload: OffloadManager::new(self.offload),
                write_behind: DashMap::new(),
                version: AtomicU64::new(1),
                store: self.store,
                codec,
                l1,
                l2,
                config,
            }),
        })
    }
}

#[cfg(feature = "moka")]
fn default_l1(config: &CacheConfig) -> Result<Arc<dyn LocalTier>, CacheError> {
    let tier = tierbox_moka::MokaTier::builder()
        .max_entries(config.l1_max_entries)
        .build();
    Ok(Arc::new(tier))
}

#[cfg(not(feature = "moka"))]
fn default_l1(_config: &CacheConfig) -> Result<Arc<dyn LocalTier>, CacheError> {
    Err(CacheError::InvalidConfiguration(
        "no local tier configured and the 'moka' feature is disabled".to_owned(),
    ))
}
