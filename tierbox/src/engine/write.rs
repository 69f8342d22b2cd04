//! Write path: strategy-driven writes, tier-targeted writes and deletes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tierbox_backend::BackendError;
use tierbox_core::{CacheKey, Raw, StrategyKind, TierLevel};
use tracing::{debug, error, trace};

use super::CacheEngine;
use crate::CacheError;
use crate::listener::CacheEvent;
use crate::store::PersistentStore;

impl CacheEngine {
    /// Writes `value` under the configured strategy.
    ///
    /// `ttl` of `None` uses the per-tier defaults. A zero `ttl` means "do not
    /// cache": the store is still written when the strategy writes it, and
    /// any cached copy of `key` is removed.
    pub async fn set<T>(
        &self,
        key: impl Into<CacheKey>,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = key.into();
        let raw = self.encode(&key, value)?;
        let config = &self.inner.config;
        self.write_with(config.default_strategy, &key, raw, ttl, config.write_behind_delay)
            .await
    }

    /// Writes the persistent store, then L2, then L1. The first failure
    /// aborts the write and is returned.
    pub async fn write_through<T>(
        &self,
        key: impl Into<CacheKey>,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = key.into();
        let raw = self.encode(&key, value)?;
        self.write_with(StrategyKind::WriteThrough, &key, raw, ttl, Duration::ZERO)
            .await
    }

    /// Writes L1 and L2 now and persists after `delay`.
    ///
    /// The persistent store write happens in the background. A crash or a
    /// cancelled [`shutdown`](Self::shutdown) before it runs loses the write,
    /// and a store failure is only reported through metrics and
    /// [`CacheEvent::WriteBehindFailed`]. A newer write-behind for the same
    /// key replaces a pending older one.
    pub async fn write_behind<T>(
        &self,
        key: impl Into<CacheKey>,
        value: &T,
        ttl: Option<Duration>,
        delay: Duration,
    ) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = key.into();
        let raw = self.encode(&key, value)?;
        self.write_with(StrategyKind::WriteBehind, &key, raw, ttl, delay)
            .await
    }

    /// Writes the persistent store only and removes cached copies, so the
    /// next read goes through the load path.
    pub async fn write_around<T>(
        &self,
        key: impl Into<CacheKey>,
        value: &T,
    ) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = key.into();
        let raw = self.encode(&key, value)?;
        self.write_with(StrategyKind::WriteAround, &key, raw, None, Duration::ZERO)
            .await
    }

    /// Writes L1 and L2 only. The caller persists separately. An unreachable
    /// L2 is logged and the value is still cached in L1.
    pub async fn cache_aside<T>(
        &self,
        key: impl Into<CacheKey>,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = key.into();
        let raw = self.encode(&key, value)?;
        self.write_with(StrategyKind::CacheAside, &key, raw, ttl, Duration::ZERO)
            .await
    }

    /// Writes a single tier. Failures are returned.
    pub async fn set_in<T>(
        &self,
        level: TierLevel,
        key: impl Into<CacheKey>,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = key.into();
        let raw = self.encode(&key, value)?;
        self.supersede(&key);
        match (level, self.inner.config.tier_ttls(ttl)) {
            (TierLevel::L1, Some((l1_ttl, _))) => self.write_l1(&key, raw, l1_ttl).await,
            (TierLevel::L2, Some((_, l2_ttl))) => self.write_l2(&key, raw, l2_ttl).await,
            (TierLevel::L1, None) => self.delete_l1(&key).await.map(drop),
            (TierLevel::L2, None) => self.delete_l2(&key).await.map(drop),
        }
    }

    /// Writes every entry under the configured strategy. All entries are
    /// attempted; the first failure is returned.
    pub async fn set_many<K, T>(
        &self,
        entries: impl IntoIterator<Item = (K, T)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        K: Into<CacheKey>,
        T: Serialize,
    {
        let mut first_error = None;
        for (key, value) in entries {
            if let Err(err) = self.set(key, &value, ttl).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Removes `key` from both tiers. Deleting an absent key is not an
    /// error. Returns `true` if either tier held the key.
    ///
    /// Dependents are left alone; use [`invalidate`](Self::invalidate) to
    /// cascade.
    pub async fn delete(&self, key: impl Into<CacheKey>) -> Result<bool, CacheError> {
        let key = key.into();
        let removed = self.remove_everywhere(&key).await?;
        trace!(key = %key, removed, "deleted");
        Ok(removed)
    }

    /// Resets the lifetime of `key` in both tiers to `ttl`, clamped to
    /// `l1_max_ttl` in L1. Returns `true` if either tier held the key.
    ///
    /// A zero `ttl` removes the key. Both tiers are attempted; the first
    /// failure is returned.
    pub async fn extend_ttl(
        &self,
        key: impl Into<CacheKey>,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let key = key.into();
        let Some((l1_ttl, l2_ttl)) = self.inner.config.tier_ttls(Some(ttl)) else {
            return self.remove_everywhere(&key).await;
        };

        let ticket = self.inner.fence.enter(&key);
        let l2 = match self.remote(self.inner.l2.extend_ttl(&key, l2_ttl)).await {
            Ok(found) => {
                if found {
                    self.inner.graph.touch(&key, l2_ttl);
                }
                Ok(found)
            }
            Err(err) => {
                self.inner.metrics.error(TierLevel::L2);
                Err(CacheError::tier(TierLevel::L2, err))
            }
        };
        let l1 = match self.read_l1(&key).await {
            Some(entry) if ticket.is_current() => {
                let written = self.write_l1(&key, entry.into_inner(), l1_ttl).await;
                if !ticket.is_current() {
                    self.evict_quietly(&key).await;
                }
                written.map(|()| true)
            }
            _ => Ok(false),
        };
        let (l2, l1) = (l2?, l1?);
        debug!(key = %key, ?ttl, l1, l2, "extended ttl");
        Ok(l1 || l2)
    }

    pub(crate) async fn write_with(
        &self,
        strategy: StrategyKind,
        key: &CacheKey,
        raw: Raw,
        ttl: Option<Duration>,
        delay: Duration,
    ) -> Result<(), CacheError> {
        if strategy.writes_store() && self.inner.store.is_none() {
            return Err(CacheError::InvalidConfiguration(format!(
                "{strategy} requires a persistent store"
            )));
        }
        self.supersede(key);
        if matches!(strategy, StrategyKind::WriteThrough | StrategyKind::WriteAround) {
            // A synchronous store write makes any pending write-behind stale.
            self.inner.write_behind.remove(key);
        }
        let ttls = self.inner.config.tier_ttls(ttl);
        trace!(key = %key, %strategy, cached = ttls.is_some(), "write");

        match strategy {
            StrategyKind::WriteThrough => {
                self.persist(key, raw.clone()).await?;
                match ttls {
                    Some((l1_ttl, l2_ttl)) => {
                        self.write_l2(key, raw.clone(), l2_ttl).await?;
                        self.write_l1(key, raw, l1_ttl).await
                    }
                    None => self.delete_cached(key).await.map(drop),
                }
            }
            StrategyKind::WriteBehind => {
                match ttls {
                    Some((l1_ttl, l2_ttl)) => self.populate(key, raw.clone(), l1_ttl, l2_ttl).await,
                    None => self.evict_quietly(key).await,
                }
                self.schedule_persist(key, raw, delay);
                Ok(())
            }
            StrategyKind::WriteAround => {
                self.persist(key, raw).await?;
                self.delete_cached(key).await.map(drop)
            }
            StrategyKind::CacheAside | StrategyKind::ReadThrough => {
                match ttls {
                    Some((l1_ttl, l2_ttl)) => self.populate(key, raw, l1_ttl, l2_ttl).await,
                    None => self.evict_quietly(key).await,
                }
                Ok(())
            }
        }
    }

    fn store(&self, key: &CacheKey) -> Result<&Arc<dyn PersistentStore>, CacheError> {
        self.inner.store.as_ref().ok_or_else(|| {
            CacheError::InvalidConfiguration(format!(
                "no persistent store configured to persist `{key}`"
            ))
        })
    }

    /// Writes the persistent store under the remote call timeout.
    pub(crate) async fn persist(&self, key: &CacheKey, raw: Raw) -> Result<(), CacheError> {
        let store = self.store(key)?;
        let limit = self.inner.config.remote_timeout;
        match tokio::time::timeout(limit, store.persist(key, raw)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(CacheError::Store {
                key: key.clone(),
                source: Arc::from(source),
            }),
            Err(_) => Err(CacheError::Store {
                key: key.clone(),
                source: Arc::new(BackendError::Timeout(limit)),
            }),
        }
    }

    fn schedule_persist(&self, key: &CacheKey, raw: Raw, delay: Duration) {
        let version = self.next_version();
        self.inner.write_behind.insert(key.clone(), version);
        let engine = self.clone();
        let key = key.clone();
        self.inner.offload.spawn("write_behind", async move {
            let pending = PendingPersist {
                engine: &engine,
                key: &key,
                version,
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let superseded = engine
                .inner
                .write_behind
                .get(&key)
                .is_none_or(|latest| *latest != version);
            if superseded {
                debug!(key = %key, "write-behind superseded by a newer write");
                return;
            }
            let result = engine.persist(&key, raw).await;
            drop(pending);
            match result {
                Ok(()) => trace!(key = %key, "write-behind persisted"),
                Err(err) => {
                    error!(key = %key, error = %err, "write-behind persistence failed");
                    engine.inner.metrics.write_behind_error();
                    engine
                        .inner
                        .listeners
                        .notify(CacheEvent::WriteBehindFailed { key, error: err })
                        .await;
                }
            }
        });
    }

    /// Number of write-behind values not yet handed to the store.
    pub fn pending_write_behind(&self) -> usize {
        let pending = self.inner.write_behind.len();
        if pending > 0 {
            debug!(pending, "write-behind values pending");
        }
        pending
    }
}

/// Clears the pending mark of a write-behind when its task ends, including
/// when the task is aborted.
struct PendingPersist<'a> {
    engine: &'a CacheEngine,
    key: &'a CacheKey,
    version: u64,
}

impl Drop for PendingPersist<'_> {
    fn drop(&mut self) {
        self.engine
            .inner
            .write_behind
            .remove_if(self.key, |_, latest| *latest == self.version);
    }
}
