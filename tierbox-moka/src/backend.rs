//! Moka tier implementation.

use async_trait::async_trait;
use moka::future::Cache;
use smol_str::SmolStr;
use tierbox_backend::{BackendResult, DeleteStatus, LocalTier};
use tierbox_core::{CacheEntry, CacheKey, KeyPattern};

use crate::builder::{MokaTierBuilder, NoCapacity};

/// In-process L1 tier powered by Moka.
///
/// Reads are lock-free and writes use Moka's fine-grained locking, so the
/// tier is safe to share between any number of tasks. Pending maintenance
/// (eviction, expiry bookkeeping) is applied on every `set`, which keeps the
/// entry bound exact at the cost of some write throughput.
///
/// Expiry is checked against each entry's own `expires_at`: an entry that is
/// past it is never returned, even if Moka has not reclaimed it yet, and is
/// removed by the read that finds it.
#[derive(Clone)]
pub struct MokaTier {
    cache: Cache<CacheKey, CacheEntry>,
    label: SmolStr,
}

impl std::fmt::Debug for MokaTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaTier")
            .field("label", &self.label)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl MokaTier {
    /// Creates a builder. Capacity must be configured before `build()`.
    pub fn builder() -> MokaTierBuilder<NoCapacity> {
        MokaTierBuilder::new()
    }

    pub(crate) fn new(cache: Cache<CacheKey, CacheEntry>, label: SmolStr) -> Self {
        Self { cache, label }
    }

    /// The underlying Moka cache.
    pub fn cache(&self) -> &Cache<CacheKey, CacheEntry> {
        &self.cache
    }

    async fn sync(&self) {
        self.cache.run_pending_tasks().await;
        crate::metrics::record_capacity(
            &self.label,
            self.cache.entry_count(),
            self.cache.weighted_size(),
        );
    }
}

#[async_trait]
impl LocalTier for MokaTier {
    async fn get(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry>> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_expired() => {
                tracing::trace!(tier = %self.label, %key, "dropping expired entry");
                self.cache.invalidate(key).await;
                Ok(None)
            }
            found => Ok(found),
        }
    }

    async fn set(&self, entry: CacheEntry) -> BackendResult<()> {
        self.cache.insert(entry.key().clone(), entry).await;
        self.sync().await;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        Ok(match self.cache.remove(key).await {
            Some(entry) if !entry.is_expired() => DeleteStatus::Deleted(1),
            _ => DeleteStatus::Missing,
        })
    }

    async fn scan(&self, pattern: &KeyPattern) -> BackendResult<Vec<CacheKey>> {
        Ok(self
            .cache
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && pattern.matches(key.as_str()))
            .map(|(key, _)| CacheKey::clone(&key))
            .collect())
    }

    async fn clear(&self) -> BackendResult<()> {
        self.cache.invalidate_all();
        self.sync().await;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    fn name(&self) -> &str {
        &self.label
    }
}
