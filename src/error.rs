//! Error types for request dispatch and the deferred core.
//!
//! [`RequestError`] is the rejection value of a deferred. It is classified by
//! [`ErrorKind`] rather than by type, so that callers can register handlers
//! for one kind (`on_timeout`, `on_abort`, ...) or for all of them (`on_error`).
//!
//! Unsuccessful HTTP statuses are *not* errors: a 404 resolves the deferred
//! like a 200 does, and is distinguished by status inspection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::deferred::State;

/// Boxed error used as the `source` of a [`RequestError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The kind of a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request could not be sent (request processing failed, malformed URL, ...).
    Abort,
    /// The request was cancelled explicitly or the connection was dropped mid-exchange.
    Cancel,
    /// The request deadline elapsed before completion.
    Timeout,
    /// An unexpected failure escaped the transport or the response processing.
    Dispatch,
}

impl ErrorKind {
    /// Returns the lowercase event name for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Cancel => "cancel",
            Self::Timeout => "timeout",
            Self::Dispatch => "dispatch",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejection value of a request deferred.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The request could not be sent.
    #[error("request to {uri} aborted: {message}")]
    Abort {
        /// Target URI of the request.
        uri: String,
        /// What prevented the request from being sent.
        message: String,
        /// The underlying failure, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The request was cancelled while in flight.
    #[error("request to {uri} cancelled: {message}")]
    Cancel {
        /// Target URI of the request.
        uri: String,
        /// Why the exchange was cancelled.
        message: String,
        /// The underlying failure, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The request did not complete within its deadline.
    #[error("request to {uri} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// Target URI of the request.
        uri: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// An unexpected failure escaped the transport or response processing.
    #[error("request to {uri} failed during dispatch: {message}")]
    Dispatch {
        /// Target URI of the request.
        uri: String,
        /// Description of the failure.
        message: String,
        /// The underlying failure, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl RequestError {
    /// Creates an abort error without an underlying cause.
    pub fn abort(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Abort {
            uri: uri.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates an abort error wrapping the failure that prevented sending.
    pub fn abort_with(
        uri: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Abort {
            uri: uri.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a cancellation error.
    pub fn cancel(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cancel {
            uri: uri.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a cancellation error wrapping a connection-level failure.
    pub fn cancel_with(
        uri: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Cancel {
            uri: uri.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(uri: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            uri: uri.into(),
            timeout,
        }
    }

    /// Creates a dispatch error.
    pub fn dispatch(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dispatch {
            uri: uri.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a dispatch error wrapping the escaped failure.
    pub fn dispatch_with(
        uri: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Dispatch {
            uri: uri.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the kind of this rejection.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Abort { .. } => ErrorKind::Abort,
            Self::Cancel { .. } => ErrorKind::Cancel,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Dispatch { .. } => ErrorKind::Dispatch,
        }
    }

    /// Returns the URI of the request that failed.
    #[must_use]
    pub fn uri(&self) -> &str {
        match self {
            Self::Abort { uri, .. }
            | Self::Cancel { uri, .. }
            | Self::Timeout { uri, .. }
            | Self::Dispatch { uri, .. } => uri,
        }
    }
}

/// Misuse of a deferred: settling or notifying one that is no longer pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeferredError {
    /// The deferred already reached a terminal state.
    #[error("deferred already {state}, cannot {operation}")]
    AlreadySettled {
        /// The terminal state the deferred is in.
        state: State,
        /// The rejected operation (`resolve`, `reject`, `notify download`, ...).
        operation: &'static str,
    },
}

/// Failure returned by the blocking response future.
#[derive(Debug, Clone, Error)]
pub enum FutureError {
    /// The future was cancelled before the response arrived.
    #[error("response future was cancelled")]
    Cancelled,

    /// The request was rejected; wraps the rejection.
    #[error("request failed: {0}")]
    Execution(#[source] Arc<RequestError>),

    /// The wait deadline elapsed while the request was still pending.
    #[error("timed out after {}ms waiting for the response", .0.as_millis())]
    TimedOut(Duration),

    /// The runner has no scheduled work left, so the pending request can never settle.
    #[error("runner is idle while the request is still pending")]
    Stalled,
}
