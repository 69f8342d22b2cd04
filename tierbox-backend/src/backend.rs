use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tierbox_core::{CacheEntry, CacheKey, KeyPattern, Raw};

use crate::{BackendError, DeleteStatus};

pub type BackendResult<T> = Result<T, BackendError>;

/// Bounded in-process tier (L1).
///
/// Implementations must be safe under concurrent callers. Entries are stored
/// decoded-to-bytes together with their timestamps, so expiry is checked
/// against [`CacheEntry::expires_at`] and an expired entry is reported as
/// absent and removed on `get`.
#[async_trait]
pub trait LocalTier: Send + Sync {
    /// Returns the live entry for `key`, if any.
    async fn get(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry>>;

    /// Inserts or replaces the entry, evicting the least recently used entry
    /// when the tier is at capacity.
    async fn set(&self, entry: CacheEntry) -> BackendResult<()>;

    async fn delete(&self, key: &CacheKey) -> BackendResult<DeleteStatus>;

    /// Lists keys of live entries matching `pattern`.
    async fn scan(&self, pattern: &KeyPattern) -> BackendResult<Vec<CacheKey>>;

    /// Removes every entry.
    async fn clear(&self) -> BackendResult<()>;

    /// Approximate number of stored entries.
    fn len(&self) -> u64;

    /// Returns `true` when the tier holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the name of this tier for logs and metric labels.
    fn name(&self) -> &str {
        "l1"
    }
}

/// Shared network tier (L2).
///
/// Connectivity failures are reported as errors, distinct from a missing key
/// which is `Ok(None)`.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<Raw>>;

    /// Stores `value` under `key` for `ttl`.
    async fn write(&self, key: &CacheKey, value: Raw, ttl: Duration) -> BackendResult<()>;

    /// Stores `value` only if `key` is absent. Returns `true` when written.
    async fn set_if_absent(&self, key: &CacheKey, value: Raw, ttl: Duration)
    -> BackendResult<bool>;

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus>;

    /// Enumerates keys matching `pattern`.
    async fn scan(&self, pattern: &KeyPattern) -> BackendResult<Vec<CacheKey>>;

    /// Remaining lifetime of `key`, or `None` if absent or without expiry.
    async fn ttl_remaining(&self, key: &CacheKey) -> BackendResult<Option<Duration>>;

    /// Resets the lifetime of `key` to `ttl` without touching its value.
    /// Returns `false` if the key is absent.
    ///
    /// The default rewrites the value read back from the tier; tiers with a
    /// native expiry command should override it.
    async fn extend_ttl(&self, key: &CacheKey, ttl: Duration) -> BackendResult<bool> {
        match self.read(key).await? {
            Some(value) => {
                self.write(key, value, ttl).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Round-trip check used by health reporting.
    async fn ping(&self) -> BackendResult<()> {
        self.read(&CacheKey::new_static("tierbox:health"))
            .await
            .map(|_| ())
    }

    /// Returns the name of this tier for logs and metric labels.
    fn name(&self) -> &str {
        "l2"
    }
}

#[async_trait]
impl<T> LocalTier for Arc<T>
where
    T: LocalTier + ?Sized,
{
    async fn get(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry>> {
        (**self).get(key).await
    }

    async fn set(&self, entry: CacheEntry) -> BackendResult<()> {
        (**self).set(entry).await
    }

    async fn delete(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        (**self).delete(key).await
    }

    async fn scan(&self, pattern: &KeyPattern) -> BackendResult<Vec<CacheKey>> {
        (**self).scan(pattern).await
    }

    async fn clear(&self) -> BackendResult<()> {
        (**self).clear().await
    }

    fn len(&self) -> u64 {
        (**self).len()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T> LocalTier for Box<T>
where
    T: LocalTier + ?Sized,
{
    async fn get(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry>> {
        (**self).get(key).await
    }

    async fn set(&self, entry: CacheEntry) -> BackendResult<()> {
        (**self).set(entry).await
    }

    async fn delete(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        (**self).delete(key).await
    }

    async fn scan(&self, pattern: &KeyPattern) -> BackendResult<Vec<CacheKey>> {
        (**self).scan(pattern).await
    }

    async fn clear(&self) -> BackendResult<()> {
        (**self).clear().await
    }

    fn len(&self) -> u64 {
        (**self).len()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T> RemoteTier for Arc<T>
where
    T: RemoteTier + ?Sized,
{
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<Raw>> {
        (**self).read(key).await
    }

    async fn write(&self, key: &CacheKey, value: Raw, ttl: Duration) -> BackendResult<()> {
        (**self).write(key, value, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &CacheKey,
        value: Raw,
        ttl: Duration,
    ) -> BackendResult<bool> {
        (**self).set_if_absent(key, value, ttl).await
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        (**self).remove(key).await
    }

    async fn scan(&self, pattern: &KeyPattern) -> BackendResult<Vec<CacheKey>> {
        (**self).scan(pattern).await
    }

    async fn ttl_remaining(&self, key: &CacheKey) -> BackendResult<Option<Duration>> {
        (**self).ttl_remaining(key).await
    }

    async fn extend_ttl(&self, key: &CacheKey, ttl: Duration) -> BackendResult<bool> {
        (**self).extend_ttl(key, ttl).await
    }

    async fn ping(&self) -> BackendResult<()> {
        (**self).ping().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T> RemoteTier for Box<T>
where
    T: RemoteTier + ?Sized,
{
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<Raw>> {
        (**self).read(key).await
    }

    async fn write(&self, key: &CacheKey, value: Raw, ttl: Duration) -> BackendResult<()> {
        (**self).write(key, value, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &CacheKey,
        value: Raw,
        ttl: Duration,
    ) -> BackendResult<bool> {
        (**self).set_if_absent(key, value, ttl).await
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        (**self).remove(key).await
    }

    async fn scan(&self, pattern: &KeyPattern) -> BackendResult<Vec<CacheKey>> {
        (**self).scan(pattern).await
    }

    async fn ttl_remaining(&self, key: &CacheKey) -> BackendResult<Option<Duration>> {
        (**self).ttl_remaining(key).await
    }

    async fn extend_ttl(&self, key: &CacheKey, ttl: Duration) -> BackendResult<bool> {
        (**self).extend_ttl(key, ttl).await
    }

    async fn ping(&self) -> BackendResult<()> {
        (**self).ping().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
