//! JSON serdes backed by `serde_json`.

use bytes::Bytes;
use serde_json::Value;

use super::{Deserializer, SerdesError, Serializer};

/// `application/json` and `application/*+json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerdes;

impl Serializer for JsonSerdes {
    fn serialize(&self, value: &Value, media_type: &str) -> Result<Bytes, SerdesError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|source| SerdesError::Serialize {
                media_type: media_type.to_string(),
                message: "invalid JSON value".to_string(),
                source: Some(Box::new(source)),
            })
    }
}

impl Deserializer for JsonSerdes {
    fn deserialize(&self, body: &[u8], media_type: &str) -> Result<Value, SerdesError> {
        serde_json::from_slice(body)
            .map_err(|source| SerdesError::deserialize_with(media_type, "malformed JSON", source))
    }
}
