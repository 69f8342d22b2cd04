#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Engine configuration.
///
/// [`CacheConfig`](config::CacheConfig) holds every tunable with its default
/// and loads from YAML with human readable durations.
pub mod config;

mod concurrency;

/// The [`CacheEngine`] and its builder.
pub mod engine;

/// Error types for engine operations.
pub mod error;

/// Key, pattern, dependency and event invalidation.
pub mod invalidation;

/// Callbacks for reload and write-behind outcomes.
pub mod listener;

/// Hit, miss and error counters.
///
/// The [`MetricsCollector`](metrics::MetricsCollector) is always on and
/// feeds [`CacheEngine::metrics`]. With the `metrics` feature the same
/// events are also exported through the `metrics` crate facade.
pub mod metrics;

/// Background task execution for write-behind persistence and reloads.
pub mod offload;

mod promotion;

/// Named loader registrations.
pub mod registry;

/// Background reloads of registered entries.
pub mod reload;

/// Persistent store capability.
pub mod store;

pub use config::{CacheConfig, CacheConfigBuilder, CodecConfig, Compression, ReloadConcurrency};
pub use engine::{CacheEngine, CacheEngineBuilder, HealthReport, TierHealth};
pub use error::CacheError;
pub use listener::{CacheEvent, EventListener};
pub use metrics::{MetricsSnapshot, TierStats};
pub use registry::{LoaderHandle, LoaderStats};
pub use reload::{
    ReloadMode, ReloadOutcome, ReloadTaskInfo, ReloaderHandle, TaskState, WarmItem, WarmReport,
};
pub use store::PersistentStore;

pub use tierbox_backend::{BackendError, Codec, Format, LocalTier, RemoteTier};
pub use tierbox_core::{
    BoxError, CacheEntry, CacheKey, FnLoader, KeyPattern, LoadArgs, Loader, Raw, StrategyKind,
    TierLevel, loader_fn,
};

/// The `tierbox` prelude.
///
/// ```rust
/// use tierbox::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{CacheEngine, CacheError, CacheKey, LoadArgs, Loader, StrategyKind, loader_fn};
}
