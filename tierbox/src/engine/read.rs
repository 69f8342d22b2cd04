//! Read path: L1, then L2 with promotion, then the stampede-guarded loader.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tierbox_core::{BoxError, CacheKey, Raw, TierLevel};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::CacheEngine;
use crate::CacheError;
use crate::concurrency::LoadRole;

impl CacheEngine {
    /// Returns the cached value of `key`, or `None` on a miss.
    ///
    /// Never fails: an unreachable or corrupt tier is logged and treated as a
    /// miss.
    pub async fn get<T>(&self, key: impl Into<CacheKey>) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let key = key.into();
        self.lookup(&key).await.map(|(value, _)| value)
    }

    /// Like [`get`](Self::get), also reporting which tier served the value.
    pub async fn get_with_level<T>(&self, key: impl Into<CacheKey>) -> Option<(T, TierLevel)>
    where
        T: DeserializeOwned,
    {
        let key = key.into();
        self.lookup(&key).await
    }

    /// Returns the cached values of every key found. Missing keys are
    /// absent from the map.
    pub async fn get_many<T, K>(&self, keys: impl IntoIterator<Item = K>) -> HashMap<CacheKey, T>
    where
        T: DeserializeOwned,
        K: Into<CacheKey>,
    {
        let keys: Vec<CacheKey> = keys.into_iter().map(Into::into).collect();
        let lookups = keys.iter().map(|key| self.lookup::<T>(key));
        let found = futures::future::join_all(lookups).await;
        keys.into_iter()
            .zip(found)
            .filter_map(|(key, hit)| hit.map(|(value, _)| (key, value)))
            .collect()
    }

    /// Returns the cached value of `key`, loading and caching it with the
    /// default TTLs on a miss.
    pub async fn get_with<T, F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        loader: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.read_through(key, None, loader).await
    }

    /// Read-through access.
    ///
    /// On a miss in both tiers `loader` runs through the stampede guard, so
    /// concurrent callers for the same key share a single invocation and its
    /// result. The loaded value is written to L2 and then L1, unless `ttl` is
    /// zero or the key was invalidated while loading. A loader failure or
    /// timeout is returned to every waiting caller and nothing is cached.
    pub async fn read_through<T, F, Fut>(
        &self,
        key: impl Into<CacheKey>,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let key = key.into();
        if !self.inner.reloads.take_refresh(&key) {
            if let Some((value, _)) = self.lookup(&key).await {
                return Ok(value);
            }
        } else {
            debug!(key = %key, "entry marked for refresh, bypassing tiers");
        }

        let codec = self.inner.codec.clone();
        let load_key = key.clone();
        let raw = self
            .load_through(&key, ttl, move || {
                let pending = loader();
                async move {
                    let value = pending.await.map_err(|source| CacheError::LoaderFailure {
                        key: load_key.clone(),
                        source: Arc::from(source),
                    })?;
                    codec
                        .encode(&value)
                        .map_err(|err| CacheError::serialization(&load_key, err))
                }
            })
            .await?;
        self.decode(&key, &raw)
    }

    /// Looks `key` up in L1, then L2. An L2 hit counts toward promotion.
    pub(crate) async fn lookup<T>(&self, key: &CacheKey) -> Option<(T, TierLevel)>
    where
        T: DeserializeOwned,
    {
        let inner = &self.inner;
        if let Some(entry) = self.read_l1(key).await {
            match self.decode::<T>(key, entry.data()) {
                Ok(value) => {
                    trace!(key = %key, "l1 hit");
                    inner.metrics.hit(TierLevel::L1);
                    inner.graph.touch(key, Duration::ZERO);
                    return Some((value, TierLevel::L1));
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "undecodable l1 entry, treating as miss");
                    inner.metrics.error(TierLevel::L1);
                }
            }
        }
        inner.metrics.miss(TierLevel::L1);

        // Registered before the L2 read so a promotion racing an
        // invalidation is discarded.
        let ticket = inner.fence.enter(key);
        if let Some(raw) = self.read_l2(key).await {
            match self.decode::<T>(key, &raw) {
                Ok(value) => {
                    trace!(key = %key, "l2 hit");
                    inner.metrics.hit(TierLevel::L2);
                    inner.graph.touch(key, Duration::ZERO);
                    if inner.promotion.record_read(key, Instant::now()) && ticket.is_current() {
                        self.promote(key, raw).await;
                        if !ticket.is_current() {
                            self.evict_quietly(key).await;
                        }
                    }
                    return Some((value, TierLevel::L2));
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "undecodable l2 value, treating as miss");
                    inner.metrics.error(TierLevel::L2);
                }
            }
        }
        inner.metrics.miss(TierLevel::L2);
        None
    }

    async fn promote(&self, key: &CacheKey, raw: Raw) {
        let l1_ttl = self
            .inner
            .config
            .l1_default_ttl
            .min(self.inner.config.l1_max_ttl);
        match self.write_l1(key, raw, l1_ttl).await {
            Ok(()) => {
                debug!(key = %key, "promoted into l1");
                self.inner.metrics.promotion();
            }
            Err(err) => warn!(key = %key, error = %err, "promotion into l1 failed"),
        }
    }

    /// Runs `load` through the stampede guard and publishes its result.
    ///
    /// `load` is only called when this caller leads the load.
    pub(crate) async fn load_through<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        load: F,
    ) -> Result<Raw, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Raw, CacheError>> + Send + 'static,
    {
        let engine = self.clone();
        let owned_key = key.clone();
        let (result, role) = self
            .inner
            .guard
            .run_exclusive(key, move || {
                let work = load();
                async move { engine.load_and_store(owned_key, ttl, work).await }
            })
            .await;
        if role == LoadRole::Joined {
            self.inner.metrics.stampede_join();
        }
        result
    }

    async fn load_and_store<Fut>(
        self,
        key: CacheKey,
        ttl: Option<Duration>,
        work: Fut,
    ) -> Result<Raw, CacheError>
    where
        Fut: Future<Output = Result<Raw, CacheError>> + Send,
    {
        let ticket = self.inner.fence.enter(&key);
        self.inner.metrics.load();
        let limit = self.inner.config.load_timeout;
        let raw = match tokio::time::timeout(limit, work).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                warn!(key = %key, error = %err, "load failed");
                self.inner.metrics.load_error();
                return Err(err);
            }
            Err(_) => {
                warn!(key = %key, timeout = ?limit, "load timed out");
                self.inner.metrics.load_error();
                return Err(CacheError::LoaderTimeout {
                    key,
                    timeout: limit,
                });
            }
        };

        let Some((l1_ttl, l2_ttl)) = self.inner.config.tier_ttls(ttl) else {
            return Ok(raw);
        };
        if !ticket.is_current() {
            debug!(key = %key, "invalidated while loading, result not cached");
            return Ok(raw);
        }
        self.populate(&key, raw.clone(), l1_ttl, l2_ttl).await;
        if !ticket.is_current() {
            debug!(key = %key, "invalidated while storing, evicting loaded value");
            self.evict_quietly(&key).await;
        }
        Ok(raw)
    }
}
