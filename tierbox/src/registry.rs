//! Named loader registrations.
//!
//! Instead of wrapping functions implicitly, callers register a [`Loader`]
//! under a name and keep the returned [`LoaderHandle`]. Loading through the
//! handle derives the cache key from the name and the [`LoadArgs`], so
//! `register("user", ..)` loaded with args `[42]` caches under `user:42`.
//!
//! ```
//! use std::time::Duration;
//! use tierbox::{CacheEngine, LoadArgs, StrategyKind, loader_fn};
//!
//! # async fn demo(engine: CacheEngine) -> Result<(), tierbox::CacheError> {
//! let users = engine.register(
//!     "user",
//!     loader_fn(|args: LoadArgs| async move {
//!         Ok::<_, tierbox::BoxError>(format!("user #{}", args.get(0).unwrap_or("?")))
//!     }),
//!     Some(Duration::from_secs(300)),
//!     StrategyKind::ReadThrough,
//! )?;
//!
//! let name: String = engine.load(&users, &LoadArgs::new().arg(42)).await?;
//! assert_eq!(name, "user #42");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use smol_str::SmolStr;
use tierbox_backend::Codec;
use tierbox_core::{CacheKey, KeyPattern, LoadArgs, Loader, Raw, StrategyKind};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::CacheError;
use crate::engine::CacheEngine;
use crate::reload::WarmItem;

/// Typed reference to a registered loader.
///
/// The handle only carries the name: re-registering the name replaces the
/// loader behind every existing handle.
pub struct LoaderHandle<T> {
    name: SmolStr,
    _output: PhantomData<fn() -> T>,
}

impl<T> LoaderHandle<T> {
    fn new(name: SmolStr) -> Self {
        Self {
            name,
            _output: PhantomData,
        }
    }

    /// Name the loader was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache key a load with `args` uses.
    pub fn key(&self, args: &LoadArgs) -> CacheKey {
        args.cache_key(&self.name)
    }

    /// Describes an initial load for [`CacheEngine::warm`].
    pub fn warm(&self, args: LoadArgs) -> WarmItem {
        WarmItem::new(self.name.clone(), args)
    }
}

impl<T> Clone for LoaderHandle<T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<T> fmt::Debug for LoaderHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderHandle")
            .field("name", &self.name)
            .field("output", &std::any::type_name::<T>())
            .finish()
    }
}

/// Loader with its output type erased to encoded bytes.
#[async_trait]
pub(crate) trait ErasedLoader: Send + Sync {
    async fn load_raw(
        &self,
        key: &CacheKey,
        args: &LoadArgs,
        codec: &Codec,
    ) -> Result<Raw, CacheError>;
}

struct Encoding<L>(L);

#[async_trait]
impl<L> ErasedLoader for Encoding<L>
where
    L: Loader,
{
    async fn load_raw(
        &self,
        key: &CacheKey,
        args: &LoadArgs,
        codec: &Codec,
    ) -> Result<Raw, CacheError> {
        let value = self
            .0
            .load(args)
            .await
            .map_err(|source| CacheError::LoaderFailure {
                key: key.clone(),
                source: Arc::from(source),
            })?;
        codec
            .encode(&value)
            .map_err(|err| CacheError::serialization(key, err))
    }
}

/// Counters of a single registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    /// Calls to [`CacheEngine::load`].
    pub load_count: u64,
    /// Loads served from a tier.
    pub hit_count: u64,
    /// Loads that invoked the loader.
    pub miss_count: u64,
}

pub(crate) struct Registration {
    pub(crate) name: SmolStr,
    pub(crate) ttl: Option<Duration>,
    pub(crate) strategy: StrategyKind,
    pub(crate) loader: Arc<dyn ErasedLoader>,
    loads: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Registration {
    /// TTL of loaded values in the tiers. Write-around loaders never
    /// populate the tiers.
    pub(crate) fn cache_ttl(&self) -> Option<Duration> {
        if self.strategy.populates_tiers() {
            self.ttl
        } else {
            Some(Duration::ZERO)
        }
    }

    fn stats(&self) -> LoaderStats {
        LoaderStats {
            load_count: self.loads.load(Ordering::Relaxed),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Registrations by name.
#[derive(Default)]
pub(crate) struct LoaderRegistry {
    loaders: DashMap<SmolStr, Arc<Registration>>,
}

impl LoaderRegistry {
    pub(crate) fn get(&self, name: &str) -> Result<Arc<Registration>, CacheError> {
        self.loaders
            .get(name)
            .map(|reg| reg.clone())
            .ok_or_else(|| CacheError::UnknownLoader(SmolStr::new(name)))
    }
}

impl CacheEngine {
    /// Registers `loader` under `name` and returns a handle to load through.
    ///
    /// `ttl` of `None` uses the per-tier defaults. `strategy` decides how
    /// reloaded values are written; a write-around registration never
    /// populates the tiers. Registering an existing name replaces it.
    pub fn register<L>(
        &self,
        name: impl Into<SmolStr>,
        loader: L,
        ttl: Option<Duration>,
        strategy: StrategyKind,
    ) -> Result<LoaderHandle<L::Output>, CacheError>
    where
        L: Loader,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(CacheError::InvalidConfiguration(
                "loader name must not be empty".to_owned(),
            ));
        }
        if name.contains(['*', '?']) {
            return Err(CacheError::InvalidConfiguration(format!(
                "loader name `{name}` must not contain glob wildcards"
            )));
        }
        if strategy.writes_store() && self.inner.store.is_none() {
            return Err(CacheError::InvalidConfiguration(format!(
                "loader `{name}` uses {strategy}, which requires a persistent store"
            )));
        }
        let registration = Registration {
            name: name.clone(),
            ttl,
            strategy,
            loader: Arc::new(Encoding(loader)),
            loads: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        if self
            .inner
            .registry
            .loaders
            .insert(name.clone(), Arc::new(registration))
            .is_some()
        {
            debug!(loader = %name, "replaced loader registration");
        }
        Ok(LoaderHandle::new(name))
    }

    /// Removes the registration and every reload task using it.
    pub fn deregister(&self, name: &str) -> bool {
        let removed = self.inner.registry.loaders.remove(name).is_some();
        if removed {
            let tasks = self.inner.reloads.remove_for_loader(name);
            debug!(loader = name, tasks, "deregistered loader");
        }
        removed
    }

    /// Removes every entry the loader registered as `name` cached, from both
    /// tiers: the key loaded without arguments and every `name:*` key.
    /// Returns the number of keys removed.
    ///
    /// Loads of those keys in flight do not publish their result. Dependents
    /// are not cascaded to.
    pub async fn invalidate_loader(&self, name: &str) -> Result<usize, CacheError> {
        self.inner.registry.get(name)?;
        let pattern = KeyPattern::new(format!("{name}:*"))
            .map_err(|err| CacheError::InvalidConfiguration(err.to_string()))?;
        let bare = self.remove_everywhere(&CacheKey::new(name)).await?;
        let derived = self.invalidate_pattern(&pattern).await?;
        let removed = derived + usize::from(bare);
        debug!(loader = name, removed, "invalidated loader entries");
        Ok(removed)
    }

    /// Names of every registered loader, sorted.
    pub fn loaders(&self) -> Vec<SmolStr> {
        let mut names: Vec<SmolStr> = self
            .inner
            .registry
            .loaders
            .iter()
            .map(|reg| reg.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Counters of the loader registered as `name`.
    pub fn loader_stats(&self, name: &str) -> Option<LoaderStats> {
        self.inner.registry.loaders.get(name).map(|reg| reg.stats())
    }

    /// Returns the cached value for `args`, loading it on a miss.
    ///
    /// Concurrent misses share one loader call. Write-around registrations
    /// always call the loader and cache nothing.
    pub async fn load<T>(
        &self,
        handle: &LoaderHandle<T>,
        args: &LoadArgs,
    ) -> Result<T, CacheError>
    where
        T: DeserializeOwned,
    {
        let reg = self.inner.registry.get(handle.name())?;
        reg.loads.fetch_add(1, Ordering::Relaxed);
        let key = handle.key(args);

        if reg.strategy.populates_tiers() && !self.inner.reloads.take_refresh(&key) {
            if let Some((value, _)) = self.lookup(&key).await {
                reg.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
        }
        reg.misses.fetch_add(1, Ordering::Relaxed);
        let raw = self.load_registered(reg, &key, args).await?;
        self.decode(&key, &raw)
    }

    /// Loads through the stampede guard and caches per the registration.
    pub(crate) async fn load_registered(
        &self,
        reg: Arc<Registration>,
        key: &CacheKey,
        args: &LoadArgs,
    ) -> Result<Raw, CacheError> {
        let codec = self.inner.codec.clone();
        let load_key = key.clone();
        let args = args.clone();
        let ttl = reg.cache_ttl();
        self.load_through(key, ttl, move || async move {
            reg.loader.load_raw(&load_key, &args, &codec).await
        })
        .await
    }

    /// Calls the loader directly under the load timeout, bypassing the
    /// tiers and the stampede guard.
    pub(crate) async fn invoke_loader(
        &self,
        reg: &Registration,
        key: &CacheKey,
        args: &LoadArgs,
    ) -> Result<Raw, CacheError> {
        self.inner.metrics.load();
        let limit = self.inner.config.load_timeout;
        let start = Instant::now();
        let load = reg.loader.load_raw(key, args, &self.inner.codec);
        let result = match tokio::time::timeout(limit, load).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::LoaderTimeout {
                key: key.clone(),
                timeout: limit,
            }),
        };
        if let Err(err) = &result {
            warn!(
                key = %key,
                loader = %reg.name,
                elapsed = ?start.elapsed(),
                error = %err,
                "load failed"
            );
            self.inner.metrics.load_error();
        }
        result
    }
}
