//! Persistent store capability.

use std::sync::Arc;

use async_trait::async_trait;
use tierbox_core::{BoxError, CacheKey, Raw};

/// The backing store written by write-through, write-behind and write-around
/// strategies.
///
/// The engine hands over the same encoded bytes it stores in the tiers, so a
/// store decodes them with the engine's [`Codec`](tierbox_backend::Codec) if
/// it needs the typed value. Reads from the store go through a
/// [`Loader`](tierbox_core::Loader) instead.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Durably writes `value` under `key`.
    async fn persist(&self, key: &CacheKey, value: Raw) -> Result<(), BoxError>;
}

#[async_trait]
impl<T> PersistentStore for Arc<T>
where
    T: PersistentStore + ?Sized,
{
    async fn persist(&self, key: &CacheKey, value: Raw) -> Result<(), BoxError> {
        (**self).persist(key, value).await
    }
}
