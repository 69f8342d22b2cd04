//! In-memory persistent store with a failure switch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tierbox::{BoxError, CacheKey, Codec, PersistentStore, Raw};

#[derive(Clone, Default)]
pub struct MemoryStore {
    rows: Arc<DashMap<CacheKey, Raw>>,
    failing: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get<T: serde::de::DeserializeOwned>(&self, codec: &Codec, key: &str) -> Option<T> {
        let raw = self.rows.get(key)?.clone();
        codec.decode(&raw).ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn persist(&self, key: &CacheKey, value: Raw) -> Result<(), BoxError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err("store rejected the write".into());
        }
        self.rows.insert(key.clone(), value);
        Ok(())
    }
}
