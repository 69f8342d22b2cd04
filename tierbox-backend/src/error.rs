//! Error types for tier operations.

use std::time::Duration;

use thiserror::Error;

use crate::compressor::CompressionError;
use crate::format::FormatError;

/// Error type for tier operations.
///
/// A missing key is never an error: reads report absence as `Ok(None)`. This
/// enum only describes failures, grouped so that callers can tell an
/// unreachable tier apart from a corrupt value.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Internal tier error, state or computation error.
    ///
    /// Any error not related to network interaction.
    #[error(transparent)]
    InternalError(Box<dyn std::error::Error + Send + Sync>),

    /// Network interaction error.
    ///
    /// Errors occurring during communication with remote tiers (e.g., Redis).
    #[error(transparent)]
    ConnectionError(Box<dyn std::error::Error + Send + Sync>),

    /// The tier did not answer in time.
    #[error("tier operation timed out after {0:?}")]
    Timeout(Duration),

    /// Serialization or deserialization error.
    #[error(transparent)]
    FormatError(#[from] FormatError),

    /// Compression or decompression error.
    #[error(transparent)]
    CompressionError(#[from] CompressionError),
}

impl BackendError {
    /// Returns `true` when the tier could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            BackendError::ConnectionError(_) | BackendError::Timeout(_)
        )
    }
}
