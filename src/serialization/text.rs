//! Plain text serdes for `text/*`.

use bytes::Bytes;
use serde_json::Value;

use super::{Deserializer, SerdesError, Serializer};

/// Strings in, strings out. Scalars are written in their display form.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSerdes;

impl Serializer for TextSerdes {
    fn serialize(&self, value: &Value, media_type: &str) -> Result<Bytes, SerdesError> {
        match value {
            Value::String(text) => Ok(Bytes::from(text.clone())),
            Value::Null => Ok(Bytes::new()),
            Value::Bool(_) | Value::Number(_) => Ok(Bytes::from(value.to_string())),
            Value::Array(_) | Value::Object(_) => Err(SerdesError::serialize(
                media_type,
                "structured values have no plain text form",
            )),
        }
    }
}

impl Deserializer for TextSerdes {
    fn deserialize(&self, body: &[u8], _media_type: &str) -> Result<Value, SerdesError> {
        Ok(Value::String(String::from_utf8_lossy(body).into_owned()))
    }
}
