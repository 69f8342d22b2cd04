use serde::{Serialize, de::DeserializeOwned};

use super::FormatError;

pub(super) fn encode<T>(value: &T) -> Result<Vec<u8>, FormatError>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(value).map_err(|e| FormatError::Serialize(Box::new(e)))
}

pub(super) fn decode<T>(data: &[u8]) -> Result<T, FormatError>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(data).map_err(|e| FormatError::Deserialize(Box::new(e)))
}
