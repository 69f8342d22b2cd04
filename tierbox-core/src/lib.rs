#![warn(missing_docs)]
//! # tierbox-core
//!
//! Core types and capabilities for the tierbox multi-level caching engine.
//!
//! This crate holds the vocabulary shared by every other tierbox crate:
//!
//! - [`CacheKey`] and [`KeyPattern`] identify entries and groups of entries
//! - [`CacheEntry`] is what a tier stores: encoded bytes plus timestamps
//! - [`TierLevel`] names the in-process (L1) and remote (L2) tiers
//! - [`StrategyKind`] selects the write/read strategy of an engine
//! - [`Loader`] is the backing-store capability invoked on a cache miss
//!
//! Tier implementations live in `tierbox-backend` (traits), `tierbox-moka`
//! (L1) and `tierbox-redis` (L2). The engine itself lives in `tierbox`.

pub mod entry;
pub mod key;
pub mod loader;
pub mod pattern;
pub mod strategy;
pub mod tier;

pub use entry::CacheEntry;
pub use key::CacheKey;
pub use loader::{BoxError, FnLoader, LoadArgs, Loader, loader_fn};
pub use pattern::{KeyPattern, PatternError};
pub use strategy::StrategyKind;
pub use tier::TierLevel;

#[doc(hidden)]
pub use smol_str::SmolStr;

/// Raw byte data type used for encoded cache values.
/// Using `Bytes` provides efficient zero-copy cloning via reference counting.
pub type Raw = bytes::Bytes;
