//! Builder for configuring [`MokaTier`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use moka::Expiry;
use moka::future::{Cache, CacheBuilder};
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use smol_str::SmolStr;
use tierbox_core::{CacheEntry, CacheKey};

use crate::backend::MokaTier;

/// Expiration policy reading the TTL from [`CacheEntry::expires_at`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Expiration;

impl Expiry<CacheKey, CacheEntry> for Expiration {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(Self::remaining(value))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // The replacing entry carries its own expiry; never keep the old one.
        Some(Self::remaining(value))
    }
}

impl Expiration {
    fn remaining(value: &CacheEntry) -> Duration {
        let millis = (value.expires_at() - Utc::now()).num_milliseconds();
        if millis <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(millis as u64)
        }
    }
}

/// Marker type: capacity has not been configured yet.
///
/// Call either [`max_entries()`](MokaTierBuilder::max_entries) or
/// [`max_bytes()`](MokaTierBuilder::max_bytes) before `build()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapacity;

/// Marker type: entry-count capacity has been configured.
#[derive(Debug, Clone, Copy)]
pub struct EntryCapacity(pub(crate) u64);

/// Marker type: byte-based capacity has been configured.
#[derive(Debug, Clone, Copy)]
pub struct ByteCapacity(pub(crate) u64);

/// Builder for creating and configuring a [`MokaTier`].
///
/// Capacity is mandatory and enforced with the typestate pattern: `build()`
/// only exists once [`max_entries`](Self::max_entries) or
/// [`max_bytes`](Self::max_bytes) was called.
///
/// ```
/// use tierbox_moka::MokaTier;
///
/// let by_count = MokaTier::builder().max_entries(10_000).build();
/// let by_size = MokaTier::builder().label("sessions").max_bytes(64 * 1024 * 1024).build();
/// ```
///
/// Both variants default to pure least-recently-used eviction.
pub struct MokaTierBuilder<Cap> {
    capacity: Cap,
    label: SmolStr,
    eviction_policy: Option<EvictionPolicy>,
}

impl MokaTierBuilder<NoCapacity> {
    /// Creates a new builder with no capacity configured.
    pub fn new() -> Self {
        Self {
            capacity: NoCapacity,
            label: SmolStr::new_static("moka"),
            eviction_policy: None,
        }
    }

    /// Bounds the tier by entry count.
    pub fn max_entries(self, capacity: u64) -> MokaTierBuilder<EntryCapacity> {
        MokaTierBuilder {
            capacity: EntryCapacity(capacity),
            label: self.label,
            eviction_policy: self.eviction_policy,
        }
    }

    /// Bounds the tier by approximate memory use in bytes.
    ///
    /// The weight of an entry is [`CacheEntry::memory_size`].
    pub fn max_bytes(self, bytes: u64) -> MokaTierBuilder<ByteCapacity> {
        MokaTierBuilder {
            capacity: ByteCapacity(bytes),
            label: self.label,
            eviction_policy: self.eviction_policy,
        }
    }
}

impl Default for MokaTierBuilder<NoCapacity> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Cap> MokaTierBuilder<Cap> {
    /// Sets the label used in logs and metrics.
    ///
    /// Defaults to `"moka"`.
    pub fn label(mut self, label: impl Into<SmolStr>) -> Self {
        self.label = label.into();
        self
    }

    /// Overrides the eviction policy.
    ///
    /// Defaults to [`EvictionPolicy::lru()`]. TinyLFU may reject a new entry
    /// instead of evicting an old one, which breaks the guarantee that a `set`
    /// is readable right after it returns.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    fn base(
        &self,
        capacity: u64,
    ) -> CacheBuilder<CacheKey, CacheEntry, Cache<CacheKey, CacheEntry>> {
        let label = self.label.clone();
        CacheBuilder::new(capacity)
            .eviction_policy(self.eviction_policy.clone().unwrap_or_else(EvictionPolicy::lru))
            .expire_after(Expiration)
            .eviction_listener(move |key: Arc<CacheKey>, _value, cause| {
                if cause == RemovalCause::Size {
                    tracing::trace!(tier = %label, key = %key, "evicted least recently used entry");
                    crate::metrics::record_eviction(&label);
                }
            })
    }
}

impl MokaTierBuilder<EntryCapacity> {
    /// Builds the tier with entry-count based capacity.
    pub fn build(self) -> MokaTier {
        let cache = self.base(self.capacity.0).build();
        MokaTier::new(cache, self.label)
    }
}

impl MokaTierBuilder<ByteCapacity> {
    /// Builds the tier with byte-based capacity.
    pub fn build(self) -> MokaTier {
        let cache = self
            .base(self.capacity.0)
            .weigher(Self::byte_weigher)
            .build();
        MokaTier::new(cache, self.label)
    }

    fn byte_weigher(_key: &CacheKey, value: &CacheEntry) -> u32 {
        value.memory_size().min(u32::MAX as usize) as u32
    }
}
