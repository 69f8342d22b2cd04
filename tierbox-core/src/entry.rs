//! Cache entries with expiration metadata.
//!
//! A [`CacheEntry`] is what a tier stores for a key: the encoded value
//! together with the instant it was created, the instant it expires and a
//! monotonically increasing version assigned by the writer.
//!
//! Entries are never partially updated. A refreshed value replaces the entry
//! wholesale and resets both timestamps.
//!
//! ```
//! use std::time::Duration;
//! use tierbox_core::{CacheEntry, CacheKey};
//!
//! let entry = CacheEntry::new(CacheKey::new("user:1"), "payload", Duration::from_secs(60), 1);
//! assert!(!entry.is_expired());
//! assert!(entry.expires_at() >= entry.created_at());
//! assert_eq!(entry.data(), &"payload");
//! ```

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::{CacheKey, Raw};

/// A cached value with its key, timestamps and version.
///
/// The invariant `expires_at >= created_at` always holds: constructors clamp
/// an expiry that would precede creation. An entry whose expiry is not in the
/// future is logically absent and must not be returned by a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T = Raw> {
    key: CacheKey,
    data: T,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    version: u64,
}

impl<T> CacheEntry<T> {
    /// Creates an entry that lives for `ttl` from now.
    pub fn new(key: CacheKey, data: T, ttl: Duration, version: u64) -> Self {
        let created_at = Utc::now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| created_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key,
            data,
            created_at,
            expires_at,
            version,
        }
    }

    /// Creates an entry from explicit timestamps.
    ///
    /// An `expires_at` earlier than `created_at` is clamped to `created_at`,
    /// producing an entry that is already expired.
    pub fn with_timestamps(
        key: CacheKey,
        data: T,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            key,
            data,
            created_at,
            expires_at: expires_at.max(created_at),
            version,
        }
    }

    /// Returns the entry key.
    #[inline]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns a reference to the cached data.
    #[inline]
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Returns when the entry was written.
    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the entry stops being served.
    #[inline]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the writer-assigned version.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns `true` if the entry is expired at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Returns `true` if the entry is expired now.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Remaining lifetime, or `None` once the entry has expired.
    pub fn ttl(&self) -> Option<Duration> {
        self.expires_at
            .signed_duration_since(Utc::now())
            .to_std()
            .ok()
            .filter(|remaining| !remaining.is_zero())
    }

    /// Consumes the entry and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data
    }

    /// Maps the data while keeping key, timestamps and version.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            key: self.key,
            data: f(self.data),
            created_at: self.created_at,
            expires_at: self.expires_at,
            version: self.version,
        }
    }
}

impl CacheEntry<Raw> {
    /// Estimated memory footprint of the entry in bytes.
    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.key.len() + self.data.len()
    }
}
