#![allow(dead_code)]

pub mod memory_store;
pub mod memory_tier;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tierbox::{CacheConfig, CacheEngine, CacheEvent, StrategyKind};
use tierbox_moka::MokaTier;

pub use memory_store::MemoryStore;
pub use memory_tier::MemoryTier;

/// Engine over a Moka L1, the given L2 and store, with `promotion_threshold`
/// of one so every L2 hit lands in L1.
pub fn engine(l2: &MemoryTier, store: &MemoryStore) -> CacheEngine {
    engine_with(l2, store, config().build().unwrap())
}

pub fn config() -> tierbox::CacheConfigBuilder {
    CacheConfig::builder()
        .promotion_threshold(1)
        .default_strategy(StrategyKind::CacheAside)
}

pub fn engine_with(l2: &MemoryTier, store: &MemoryStore, config: CacheConfig) -> CacheEngine {
    CacheEngine::builder()
        .config(config)
        .l1(MokaTier::builder().max_entries(1_000).build())
        .l2(l2.clone())
        .store(store.clone())
        .build()
        .unwrap()
}

/// Collects every event an engine emits.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<CacheEvent>>>,
}

impl Recorder {
    pub fn listener(&self) -> impl Fn(&CacheEvent) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event: &CacheEvent| events.lock().unwrap().push(event.clone())
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().unwrap().clone()
    }
}

pub fn secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
