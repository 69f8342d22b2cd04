//! Engine error model.

use std::sync::Arc;
use std::time::Duration;

use smol_str::SmolStr;
use thiserror::Error;
use tierbox_backend::BackendError;
use tierbox_core::{CacheKey, TierLevel};

/// Opaque error shared between every caller that observed it.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Error returned by engine operations.
///
/// The type is `Clone` so a single load failure can be handed to every
/// caller waiting on the same key.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// A tier could not be reached or failed the operation.
    ///
    /// Reads absorb this and fall back toward the backing store. Writes that
    /// promise durability in a tier surface it.
    #[error("{tier} tier unavailable: {source}")]
    TierUnavailable {
        /// Failing tier.
        tier: TierLevel,
        /// Underlying tier error.
        #[source]
        source: Arc<BackendError>,
    },

    /// The backing-store loader failed. Nothing was cached.
    #[error("loader failed for key `{key}`: {source}")]
    LoaderFailure {
        /// Key being loaded.
        key: CacheKey,
        /// Error raised by the loader.
        #[source]
        source: SharedError,
    },

    /// The backing-store loader did not finish in time.
    #[error("loader for key `{key}` timed out after {timeout:?}")]
    LoaderTimeout {
        /// Key being loaded.
        key: CacheKey,
        /// Configured load timeout.
        timeout: Duration,
    },

    /// A value could not be encoded or decoded. Nothing was cached.
    #[error("serialization failed for key `{key}`: {source}")]
    Serialization {
        /// Key of the value.
        key: CacheKey,
        /// Codec error.
        #[source]
        source: Arc<BackendError>,
    },

    /// The persistent store rejected a synchronous write.
    #[error("persistent store write failed for key `{key}`: {source}")]
    Store {
        /// Key being persisted.
        key: CacheKey,
        /// Error raised by the store.
        #[source]
        source: SharedError,
    },

    /// The engine was configured inconsistently.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No loader is registered under this name.
    #[error("no loader registered as `{0}`")]
    UnknownLoader(SmolStr),

    /// No reload task exists for this key.
    #[error("no reload task scheduled for key `{0}`")]
    UnknownReloadTask(CacheKey),
}

impl CacheError {
    pub(crate) fn tier(tier: TierLevel, source: BackendError) -> Self {
        CacheError::TierUnavailable {
            tier,
            source: Arc::new(source),
        }
    }

    pub(crate) fn serialization(key: &CacheKey, source: BackendError) -> Self {
        CacheError::Serialization {
            key: key.clone(),
            source: Arc::new(source),
        }
    }

    /// Returns `true` for failures that originate in the load path: loader
    /// errors, load timeouts and serialization errors.
    pub fn is_loader_failure(&self) -> bool {
        matches!(
            self,
            CacheError::LoaderFailure { .. }
                | CacheError::LoaderTimeout { .. }
                | CacheError::Serialization { .. }
        )
    }

    /// Returns `true` if a tier could not be reached.
    pub fn is_tier_unavailable(&self) -> bool {
        matches!(self, CacheError::TierUnavailable { .. })
    }
}
