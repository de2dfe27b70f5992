//! Pluggable serialization with media-type negotiation.
//!
//! Serializers and deserializers work on [`serde_json::Value`] as the
//! interchange model; typed payloads are converted with serde on either side.
//! A [`SerdesManager`] maps media-type patterns to implementations:
//!
//! | Pattern | Specificity |
//! |---|---|
//! | `application/json` | exact |
//! | `application/*+json` | structured suffix |
//! | `text/*` | subtype wildcard |
//! | `*/*` | anything |
//!
//! Lookup picks the most specific pattern; among equally specific patterns
//! the one registered last wins.

mod form;
mod json;
mod text;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::error::BoxError;

pub use form::FormSerdes;
pub use json::JsonSerdes;
pub use text::TextSerdes;

/// Media type used when neither the response nor the request names one.
pub const DEFAULT_MEDIA_TYPE: &str = "application/json";

/// Errors raised while converting payloads.
#[derive(Debug, Error)]
pub enum SerdesError {
    /// No serializer registered for the media type.
    #[error("no serializer registered for '{media_type}'")]
    NoSerializer {
        /// Requested media type.
        media_type: String,
    },

    /// No deserializer registered for the media type.
    #[error("no deserializer registered for '{media_type}'")]
    NoDeserializer {
        /// Requested media type.
        media_type: String,
    },

    /// Encoding a value failed.
    #[error("cannot serialize as '{media_type}': {message}")]
    Serialize {
        /// Target media type.
        media_type: String,
        /// What went wrong.
        message: String,
        /// Underlying failure, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Decoding a body failed.
    #[error("cannot deserialize '{media_type}' body: {message}")]
    Deserialize {
        /// Source media type.
        media_type: String,
        /// What went wrong.
        message: String,
        /// Underlying failure, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Converting between a typed value and the interchange model failed.
    #[error("payload does not match the expected type: {source}")]
    Convert {
        /// The serde failure.
        #[source]
        source: serde_json::Error,
    },
}

impl SerdesError {
    /// Creates a serialization error.
    pub fn serialize(media_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialize {
            media_type: media_type.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a deserialization error wrapping its cause.
    pub fn deserialize_with(
        media_type: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Deserialize {
            media_type: media_type.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Encodes interchange values into a body.
pub trait Serializer: Send + Sync {
    /// Encodes `value` for `media_type`.
    ///
    /// # Errors
    ///
    /// Returns [`SerdesError::Serialize`] when the value has no representation
    /// in this format.
    fn serialize(&self, value: &Value, media_type: &str) -> Result<Bytes, SerdesError>;
}

/// Decodes a body into an interchange value.
pub trait Deserializer: Send + Sync {
    /// Decodes `body` received as `media_type`.
    ///
    /// # Errors
    ///
    /// Returns [`SerdesError::Deserialize`] on malformed input.
    fn deserialize(&self, body: &[u8], media_type: &str) -> Result<Value, SerdesError>;
}

/// A parsed media-type pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MediaPattern {
    kind: String,
    subtype: String,
}

impl MediaPattern {
    fn parse(media_type: &str) -> Option<Self> {
        let essence = media_type.split(';').next()?.trim().to_ascii_lowercase();
        let (kind, subtype) = essence.split_once('/')?;
        if kind.is_empty() || subtype.is_empty() {
            return None;
        }
        Some(Self {
            kind: kind.to_string(),
            subtype: subtype.to_string(),
        })
    }

    /// Specificity of this pattern against a concrete media type, or `None`
    /// when it does not match.
    fn score(&self, target: &Self) -> Option<u8> {
        if self.kind == "*" {
            return (self.subtype == "*").then_some(0);
        }
        if self.kind != target.kind {
            return None;
        }
        if self.subtype == target.subtype {
            return Some(3);
        }
        if let Some(suffix) = self.subtype.strip_prefix("*+") {
            let matches = target
                .subtype
                .rsplit_once('+')
                .is_some_and(|(_, target_suffix)| target_suffix == suffix);
            return matches.then_some(2);
        }
        (self.subtype == "*").then_some(1)
    }
}

impl fmt::Display for MediaPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)
    }
}

struct Registry<T: ?Sized> {
    entries: Vec<(MediaPattern, Arc<T>)>,
}

impl<T: ?Sized> Registry<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn lookup(&self, media_type: &str) -> Option<Arc<T>> {
        let target = MediaPattern::parse(media_type)?;
        let mut best: Option<(u8, &Arc<T>)> = None;
        for (pattern, entry) in &self.entries {
            if let Some(score) = pattern.score(&target) {
                if best.is_none_or(|(best_score, _)| score >= best_score) {
                    best = Some((score, entry));
                }
            }
        }
        best.map(|(_, entry)| Arc::clone(entry))
    }
}

impl<T: ?Sized> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

/// Media-type indexed collection of serializers and deserializers.
#[derive(Clone)]
pub struct SerdesManager {
    serializers: Registry<dyn Serializer>,
    deserializers: Registry<dyn Deserializer>,
}

impl Default for SerdesManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SerdesManager {
    /// Creates a manager with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            serializers: Registry::new(),
            deserializers: Registry::new(),
        }
    }

    /// Creates a manager with JSON, plain text and form serdes registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut manager = Self::empty();
        let json = Arc::new(JsonSerdes);
        manager.register(DEFAULT_MEDIA_TYPE, Arc::clone(&json));
        manager.register("application/*+json", json);
        manager.register("text/*", Arc::new(TextSerdes));
        manager.register("application/x-www-form-urlencoded", Arc::new(FormSerdes));
        manager
    }

    /// Registers a serializer for a media-type pattern.
    ///
    /// Invalid patterns are ignored and reported as `false`.
    pub fn register_serializer(&mut self, pattern: &str, serializer: Arc<dyn Serializer>) -> bool {
        let Some(pattern) = MediaPattern::parse(pattern) else {
            return false;
        };
        self.serializers.entries.push((pattern, serializer));
        true
    }

    /// Registers a deserializer for a media-type pattern.
    ///
    /// Invalid patterns are ignored and reported as `false`.
    pub fn register_deserializer(
        &mut self,
        pattern: &str,
        deserializer: Arc<dyn Deserializer>,
    ) -> bool {
        let Some(pattern) = MediaPattern::parse(pattern) else {
            return false;
        };
        self.deserializers.entries.push((pattern, deserializer));
        true
    }

    /// Registers one implementation in both directions.
    pub fn register<S>(&mut self, pattern: &str, serdes: Arc<S>) -> bool
    where
        S: Serializer + Deserializer + 'static,
    {
        self.register_serializer(pattern, Arc::clone(&serdes) as Arc<dyn Serializer>)
            && self.register_deserializer(pattern, serdes as Arc<dyn Deserializer>)
    }

    /// Most specific serializer for `media_type`.
    #[must_use]
    pub fn serializer_for(&self, media_type: &str) -> Option<Arc<dyn Serializer>> {
        self.serializers.lookup(media_type)
    }

    /// Most specific deserializer for `media_type`.
    #[must_use]
    pub fn deserializer_for(&self, media_type: &str) -> Option<Arc<dyn Deserializer>> {
        self.deserializers.lookup(media_type)
    }

    /// Serializes a typed value for `media_type`.
    ///
    /// # Errors
    ///
    /// Fails when nothing is registered for the media type or encoding fails.
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        value: &T,
        media_type: &str,
    ) -> Result<Bytes, SerdesError> {
        let serializer =
            self.serializer_for(media_type)
                .ok_or_else(|| SerdesError::NoSerializer {
                    media_type: media_type.to_string(),
                })?;
        let value = serde_json::to_value(value).map_err(|source| SerdesError::Convert { source })?;
        serializer.serialize(&value, media_type)
    }

    /// Deserializes a body received as `media_type` into `T`.
    ///
    /// An empty body yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Fails when nothing is registered for the media type, decoding fails or
    /// the decoded value does not fit `T`.
    pub fn decode<T: DeserializeOwned>(
        &self,
        body: &[u8],
        media_type: &str,
    ) -> Result<Option<T>, SerdesError> {
        if body.is_empty() {
            trace!(media_type, "empty body; no payload");
            return Ok(None);
        }
        let deserializer =
            self.deserializer_for(media_type)
                .ok_or_else(|| SerdesError::NoDeserializer {
                    media_type: media_type.to_string(),
                })?;
        let value = deserializer.deserialize(body, media_type)?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| SerdesError::Convert { source })
    }
}

impl fmt::Debug for SerdesManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns = |entries: Vec<String>| entries.join(", ");
        f.debug_struct("SerdesManager")
            .field(
                "serializers",
                &patterns(self.serializers.entries.iter().map(|(p, _)| p.to_string()).collect()),
            )
            .field(
                "deserializers",
                &patterns(self.deserializers.entries.iter().map(|(p, _)| p.to_string()).collect()),
            )
            .finish()
    }
}

/// Picks the media type of a response body: its `Content-Type`, else the
/// first entry of the request's `Accept`, else [`DEFAULT_MEDIA_TYPE`].
#[must_use]
pub fn response_media_type<'a>(content_type: Option<&'a str>, accept: Option<&'a str>) -> &'a str {
    content_type
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            accept
                .and_then(|accept| accept.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty() && !value.starts_with("*/*"))
        })
        .unwrap_or(DEFAULT_MEDIA_TYPE)
}
