//! In-memory remote tier on the tokio clock, so paused-time tests see expiry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tierbox::{BackendError, CacheKey, KeyPattern, Raw, RemoteTier};
use tierbox_backend::{BackendResult, DeleteStatus};
use tokio::time::Instant;

/// Cloning is cheap and clones share storage.
#[derive(Clone, Default)]
pub struct MemoryTier {
    store: Arc<DashMap<CacheKey, (Raw, Instant)>>,
    offline: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
    remove_delay_ms: Arc<AtomicU64>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes every `remove` wait this long before deleting.
    pub fn set_remove_delay(&self, delay: Duration) {
        self.remove_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.live(&CacheKey::new(key)).is_some()
    }

    pub fn raw(&self, key: &str) -> Option<Raw> {
        self.live(&CacheKey::new(key)).map(|(raw, _)| raw)
    }

    fn check(&self) -> BackendResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(BackendError::ConnectionError(Box::new(
                std::io::Error::other("simulated outage"),
            )))
        } else {
            Ok(())
        }
    }

    fn live(&self, key: &CacheKey) -> Option<(Raw, Instant)> {
        let entry = self.store.get(key)?;
        if entry.1 <= Instant::now() {
            drop(entry);
            self.store.remove(key);
            return None;
        }
        Some(entry.clone())
    }
}

#[async_trait]
impl RemoteTier for MemoryTier {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<Raw>> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.live(key).map(|(raw, _)| raw))
    }

    async fn write(&self, key: &CacheKey, value: Raw, ttl: Duration) -> BackendResult<()> {
        self.check()?;
        let now = Instant::now();
        let expires = now
            .checked_add(ttl)
            .unwrap_or(now + Duration::from_secs(86_400 * 365));
        self.store.insert(key.clone(), (value, expires));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &CacheKey,
        value: Raw,
        ttl: Duration,
    ) -> BackendResult<bool> {
        self.check()?;
        if self.live(key).is_some() {
            return Ok(false);
        }
        self.write(key, value, ttl).await?;
        Ok(true)
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        self.check()?;
        let delay = self.remove_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(match self.store.remove(key) {
            Some(_) => DeleteStatus::Deleted(1),
            None => DeleteStatus::Missing,
        })
    }

    async fn scan(&self, pattern: &KeyPattern) -> BackendResult<Vec<CacheKey>> {
        self.check()?;
        Ok(self
            .store
            .iter()
            .filter(|entry| pattern.matches(entry.key().as_str()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn ttl_remaining(&self, key: &CacheKey) -> BackendResult<Option<Duration>> {
        self.check()?;
        Ok(self
            .live(key)
            .map(|(_, expires)| expires.saturating_duration_since(Instant::now())))
    }

    async fn extend_ttl(&self, key: &CacheKey, ttl: Duration) -> BackendResult<bool> {
        self.check()?;
        if self.live(key).is_none() {
            return Ok(false);
        }
        let expires = Instant::now() + ttl;
        Ok(self
            .store
            .get_mut(key)
            .map(|mut entry| entry.1 = expires)
            .is_some())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
