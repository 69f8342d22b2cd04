//! Compression of encoded values.
//!
//! Compression is applied after serialization and before a value reaches the
//! remote tier. [`PassthroughCompressor`] is the default; gzip and zstd are
//! available behind the `gzip` and `zstd` features.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("compression failed: {0}")]
    Compress(Box<dyn std::error::Error + Send + Sync>),

    #[error("decompression failed: {0}")]
    Decompress(Box<dyn std::error::Error + Send + Sync>),
}

/// Capability compressing and decompressing encoded values.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    /// Returns the compressor name used in logs.
    fn name(&self) -> &'static str;
}

/// Compressor that leaves data untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCompressor;

impl Compressor for PassthroughCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Gzip compressor.
#[cfg(feature = "gzip")]
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

#[cfg(feature = "gzip")]
impl GzipCompressor {
    /// Creates a compressor with the given level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

#[cfg(feature = "gzip")]
impl Default for GzipCompressor {
    fn default() -> Self {
        Self::with_level(6)
    }
}

#[cfg(feature = "gzip")]
impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| CompressionError::Compress(Box::new(e)))?;
        encoder
            .finish()
            .map_err(|e| CompressionError::Compress(Box::new(e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CompressionError::Decompress(Box::new(e)))?;
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}

/// Zstd compressor.
#[cfg(feature = "zstd")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

#[cfg(feature = "zstd")]
impl ZstdCompressor {
    /// Creates a compressor with the given level.
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

#[cfg(feature = "zstd")]
impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::with_level(3)
    }
}

#[cfg(feature = "zstd")]
impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::encode_all(data, self.level).map_err(|e| CompressionError::Compress(Box::new(e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::decode_all(data).map_err(|e| CompressionError::Decompress(Box::new(e)))
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}
