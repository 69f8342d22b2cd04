use serde::{Serialize, de::DeserializeOwned};

use super::FormatError;

// Bincode 2 through its serde compatibility layer, standard configuration.
pub(super) fn encode<T>(value: &T) -> Result<Vec<u8>, FormatError>
where
    T: Serialize + ?Sized,
{
    ::bincode::serde::encode_to_vec(value, ::bincode::config::standard())
        .map_err(|e| FormatError::Serialize(Box::new(e)))
}

pub(super) fn decode<T>(data: &[u8]) -> Result<T, FormatError>
where
    T: DeserializeOwned,
{
    let (value, _read) =
        ::bincode::serde::decode_from_slice(data, ::bincode::config::standard())
            .map_err(|e| FormatError::Deserialize(Box::new(e)))?;
    Ok(value)
}
