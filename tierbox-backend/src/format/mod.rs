//! Value serialization formats.
//!
//! A [`Format`] turns a typed value into [`Raw`] bytes and back. Tiers never
//! see typed values; the engine encodes once before writing to L2 and stores
//! the same bytes in L1.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tierbox_core::Raw;

mod bincode;
mod json;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error(transparent)]
    Serialize(Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Deserialize(Box<dyn std::error::Error + Send + Sync>),
}

/// Serialization format of cached values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON via `serde_json`.
    #[default]
    Json,
    /// Compact binary via `bincode` with its standard configuration.
    Bincode,
}

impl Format {
    pub fn encode<T>(&self, value: &T) -> Result<Raw, FormatError>
    where
        T: Serialize + ?Sized,
    {
        let buf = match self {
            Format::Json => json::encode(value)?,
            Format::Bincode => bincode::encode(value)?,
        };
        Ok(Bytes::from(buf))
    }

    pub fn decode<T>(&self, data: &[u8]) -> Result<T, FormatError>
    where
        T: DeserializeOwned,
    {
        match self {
            Format::Json => json::decode(data),
            Format::Bincode => bincode::decode(data),
        }
    }

    /// Returns the format name used in logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Bincode => "bincode",
        }
    }
}
