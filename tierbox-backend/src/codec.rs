//! Serialization composed with compression.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use tierbox_core::Raw;

use crate::metrics::{self, CodecStage};
use crate::{BackendError, Compressor, Format, PassthroughCompressor};

/// Value codec shared by both tiers.
///
/// Encoding serializes with the configured [`Format`] and then compresses;
/// decoding reverses the two steps. Any failure is reported as a
/// [`BackendError::FormatError`] or [`BackendError::CompressionError`] and
/// the value is never stored.
#[derive(Debug, Clone)]
pub struct Codec {
    format: Format,
    compressor: Arc<dyn Compressor>,
}

impl Codec {
    pub fn new(format: Format, compressor: Arc<dyn Compressor>) -> Self {
        Self { format, compressor }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn compressor(&self) -> &dyn Compressor {
        self.compressor.as_ref()
    }

    pub fn encode<T>(&self, value: &T) -> Result<Raw, BackendError>
    where
        T: Serialize + ?Sized,
    {
        let timer = metrics::Timer::new();
        let encoded = self.format.encode(value)?;
        metrics::record_codec(CodecStage::Serialize, self.format.as_str(), timer.elapsed());

        let timer = metrics::Timer::new();
        let compressed = self.compressor.compress(&encoded)?;
        metrics::record_codec(CodecStage::Compress, self.compressor.name(), timer.elapsed());
        Ok(Bytes::from(compressed))
    }

    pub fn decode<T>(&self, data: &[u8]) -> Result<T, BackendError>
    where
        T: DeserializeOwned,
    {
        let timer = metrics::Timer::new();
        let decompressed = self.compressor.decompress(data)?;
        metrics::record_codec(CodecStage::Decompress, self.compressor.name(), timer.elapsed());

        let timer = metrics::Timer::new();
        let value = self.format.decode(&decompressed)?;
        metrics::record_codec(CodecStage::Deserialize, self.format.as_str(), timer.elapsed());
        Ok(value)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(Format::Json, Arc::new(PassthroughCompressor))
    }
}
