//! Cache key type.
//!
//! Keys are plain strings matched case-sensitively against glob patterns
//! (see [`KeyPattern`](crate::KeyPattern)). By convention they are built from
//! colon-separated segments, e.g. `user:42` or `orders:recent:eu`.
//!
//! ```
//! use tierbox_core::CacheKey;
//!
//! let key = CacheKey::from_parts("user", ["42", "profile"]);
//! assert_eq!(key.as_str(), "user:42:profile");
//!
//! let key: CacheKey = "order:1".into();
//! assert_eq!(format!("{}", key), "order:1");
//! ```
//!
//! [`CacheKey`] wraps a [`SmolStr`]: keys up to 23 bytes are stored inline and
//! longer keys are reference counted, so cloning is always cheap.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Separator used between key segments.
pub const KEY_SEPARATOR: char = ':';

/// A cache key identifying an entry in every tier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(SmolStr);

impl CacheKey {
    /// Creates a key from any string-like value.
    pub fn new(key: impl Into<SmolStr>) -> Self {
        Self(key.into())
    }

    /// Creates a key from a static string without allocating.
    pub const fn new_static(key: &'static str) -> Self {
        Self(SmolStr::new_static(key))
    }

    /// Builds a key from a prefix and colon-joined parts.
    ///
    /// An empty part list yields the bare prefix.
    pub fn from_parts<I, P>(prefix: &str, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let mut key = String::from(prefix);
        for part in parts {
            key.push(KEY_SEPARATOR);
            key.push_str(part.as_ref());
        }
        Self(SmolStr::from(key))
    }

    /// Returns the key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the key length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the empty key.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(SmolStr::from(value))
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(SmolStr::from(value))
    }
}

impl From<&String> for CacheKey {
    fn from(value: &String) -> Self {
        Self(SmolStr::from(value.as_str()))
    }
}

impl From<SmolStr> for CacheKey {
    fn from(value: SmolStr) -> Self {
        Self(value)
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(value: &CacheKey) -> Self {
        value.clone()
    }
}
