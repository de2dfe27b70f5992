//! `application/x-www-form-urlencoded` serdes.

use bytes::Bytes;
use serde_json::{Map, Value};
use url::form_urlencoded;

use super::{Deserializer, SerdesError, Serializer};

/// Flat objects as `key=value&...`. Arrays repeat their key.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormSerdes;

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

impl Serializer for FormSerdes {
    fn serialize(&self, value: &Value, media_type: &str) -> Result<Bytes, SerdesError> {
        let Value::Object(fields) = value else {
            return Err(SerdesError::serialize(
                media_type,
                "form bodies must be objects",
            ));
        };

        let mut encoder = form_urlencoded::Serializer::new(String::new());
        for (key, field) in fields {
            let values: Vec<&Value> = match field {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for item in values {
                let text = scalar(item).ok_or_else(|| {
                    SerdesError::serialize(media_type, format!("field '{key}' is not a scalar"))
                })?;
                encoder.append_pair(key, &text);
            }
        }
        Ok(Bytes::from(encoder.finish()))
    }
}

impl Deserializer for FormSerdes {
    fn deserialize(&self, body: &[u8], _media_type: &str) -> Result<Value, SerdesError> {
        let mut fields = Map::new();
        for (key, value) in form_urlencoded::parse(body) {
            let value = Value::String(value.into_owned());
            match fields.get_mut(key.as_ref()) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    fields.insert(key.into_owned(), value);
                }
            }
        }
        Ok(Value::Object(fields))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    const FORM: &str = "application/x-www-form-urlencoded";

    #[test]
    fn test_serialize_flat_object() {
        let body = FormSerdes
            .serialize(&json!({"q": "a b", "n": 2, "tag": ["x", "y"]}), FORM)
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("q=a+b"), "got {text}");
        assert!(text.contains("n=2"), "got {text}");
        assert!(text.contains("tag=x&tag=y"), "got {text}");
    }

    #[test]
    fn test_nested_values_are_rejected() {
        assert!(FormSerdes.serialize(&json!({"a": {"b": 1}}), FORM).is_err());
        assert!(FormSerdes.serialize(&json!([1, 2]), FORM).is_err());
    }

    #[test]
    fn test_deserialize_groups_repeated_keys() {
        let value = FormSerdes.deserialize(b"a=1&b=two%20words&a=3", FORM).unwrap();
        assert_eq!(value, json!({"a": ["1", "3"], "b": "two words"}));
    }
}
