//! Response envelope and progress notifications.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};

use crate::request::Request;
use crate::status::{StatusFamily, is_successful};

/// Status line and headers, available before the body is read.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: u16,
    headers: HeaderMap,
}

impl ResponseHead {
    /// Creates a head from a status code and headers.
    #[must_use]
    pub fn new(status: u16, headers: HeaderMap) -> Self {
        Self { status, headers }
    }

    /// HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The `Content-Type` header.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    /// The `Content-Length` header, when present and numeric.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    }
}

/// A fully received response before deserialization.
#[derive(Debug, Clone)]
pub struct RawResponse {
    head: ResponseHead,
    body: Bytes,
}

impl RawResponse {
    /// Creates a raw response.
    #[must_use]
    pub fn new(head: ResponseHead, body: impl Into<Bytes>) -> Self {
        Self {
            head,
            body: body.into(),
        }
    }

    /// Status line and headers.
    #[must_use]
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.head.status
    }

    /// Mutable response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.head.headers
    }

    /// Undecoded body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replaces the undecoded body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub(crate) fn into_parts(self) -> (ResponseHead, Bytes) {
        (self.head, self.body)
    }
}

/// Resolved value of a request deferred.
///
/// Delivered for every status code; use [`is_successful`](Self::is_successful)
/// or [`status`](Self::status) to tell a 2xx from an error response.
pub struct Response<T> {
    head: ResponseHead,
    body: Bytes,
    payload: Option<T>,
    request: Arc<Request>,
}

impl<T> Response<T> {
    pub(crate) fn new(
        head: ResponseHead,
        body: Bytes,
        payload: Option<T>,
        request: Arc<Request>,
    ) -> Self {
        Self {
            head,
            body,
            payload,
            request,
        }
    }

    /// HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.head.status
    }

    /// Status family of [`status`](Self::status).
    #[must_use]
    pub fn family(&self) -> StatusFamily {
        StatusFamily::of(self.head.status)
    }

    /// True for 2xx.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        is_successful(self.head.status)
    }

    /// Status line and headers.
    #[must_use]
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Returns a header value if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    /// The deserialized payload; `None` for an empty body.
    #[must_use]
    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Raw body bytes.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, lossy.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// The request that produced this response.
    #[must_use]
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }
}

impl<T: fmt::Debug> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.head.status)
            .field("uri", &self.request.uri())
            .field("payload", &self.payload)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Transfer progress of a request or response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    loaded: u64,
    total: Option<u64>,
}

/// Download progress.
pub type ReadProgress = Progress;

/// Upload progress.
pub type WriteProgress = Progress;

impl Progress {
    /// Creates a progress report.
    #[must_use]
    pub fn new(loaded: u64, total: Option<u64>) -> Self {
        Self { loaded, total }
    }

    /// Bytes transferred so far.
    #[must_use]
    pub fn loaded(&self) -> u64 {
        self.loaded
    }

    /// Total bytes, when known.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// True when the total size is known.
    #[must_use]
    pub fn is_length_computable(&self) -> bool {
        self.total.is_some()
    }

    /// Fraction in `0.0..=1.0`, when the total is known and non-zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn completed(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.loaded as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_head_reads_typed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static(" 42 "));
        let head = ResponseHead::new(200, headers);

        assert_eq!(head.content_type(), Some("application/json"));
        assert_eq!(head.content_length(), Some(42));
        assert_eq!(head.header("x-missing"), None);
    }

    #[test]
    fn test_progress_completed() {
        assert_eq!(Progress::new(50, Some(200)).completed(), Some(0.25));
        assert_eq!(Progress::new(10, None).completed(), None);
        assert_eq!(Progress::new(10, Some(0)).completed(), None);
        assert_eq!(Progress::new(300, Some(200)).completed(), Some(1.0));
        assert!(!Progress::default().is_length_computable());
    }
}
