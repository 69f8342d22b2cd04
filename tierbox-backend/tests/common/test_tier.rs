//! Simple in-memory remote tier implementation using DashMap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tierbox_backend::{BackendError, BackendResult, DeleteStatus, RemoteTier};
use tierbox_core::{CacheKey, KeyPattern, Raw};

/// In-memory remote tier for testing.
///
/// Cloning is cheap and clones share storage. `set_offline(true)` makes every
/// call fail with a connection error.
#[derive(Clone, Default)]
pub struct TestTier {
    store: Arc<DashMap<CacheKey, (Raw, DateTime<Utc>)>>,
    offline: Arc<AtomicBool>,
}

impl TestTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
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

    fn live(&self, key: &CacheKey) -> Option<(Raw, DateTime<Utc>)> {
        let entry = self.store.get(key)?;
        if entry.1 <= Utc::now() {
            drop(entry);
            self.store.remove(key);
            return None;
        }
        Some(entry.clone())
    }
}

#[async_trait]
impl RemoteTier for TestTier {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<Raw>> {
        self.check()?;
        Ok(self.live(key).map(|(raw, _)| raw))
    }

    async fn write(&self, key: &CacheKey, value: Raw, ttl: Duration) -> BackendResult<()> {
        self.check()?;
        let expires = chrono::TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
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
            .and_then(|(_, expires)| (expires - Utc::now()).to_std().ok()))
    }

    fn name(&self) -> &str {
        "test"
    }
}
