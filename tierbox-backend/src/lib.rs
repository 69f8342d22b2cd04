//! Traits and structs for tierbox tier interaction.
//!
//! A tierbox engine composes two tiers:
//!
//! - a [`LocalTier`] (L1), an in-process bounded store of decoded
//!   [`CacheEntry`](tierbox_core::CacheEntry) values
//! - a [`RemoteTier`] (L2), a network store of encoded bytes with TTL support
//!
//! Values cross the tier boundary as [`Raw`](tierbox_core::Raw) bytes produced
//! by a [`Codec`]. If you want to plug in your own tier, you are in the right
//! place.
mod backend;
pub mod codec;
pub mod compressor;
mod error;
pub mod format;
pub mod metrics;

pub use backend::{BackendResult, LocalTier, RemoteTier};
pub use codec::Codec;
#[cfg(feature = "gzip")]
pub use compressor::GzipCompressor;
#[cfg(feature = "zstd")]
pub use compressor::ZstdCompressor;
pub use compressor::{CompressionError, Compressor, PassthroughCompressor};
pub use error::BackendError;
pub use format::{Format, FormatError};

/// Status of deleting result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Record successfully deleted.
    Deleted(u32),
    /// Record already missing.
    Missing,
}

impl DeleteStatus {
    /// Number of records removed.
    pub fn count(&self) -> u32 {
        match self {
            DeleteStatus::Deleted(count) => *count,
            DeleteStatus::Missing => 0,
        }
    }
}
