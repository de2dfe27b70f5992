//! Transport seam between the dispatcher and the wire.
//!
//! A [`Transport`] receives one [`Attempt`] per send and reports what
//! happens through it: headers, progress, then exactly one of
//! [`Attempt::resolve`] or [`Attempt::reject`]. Reports arriving after the
//! attempt's connection was cancelled or expired are dropped.

mod constants;
mod http;
mod scripted;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

pub use self::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
pub use self::http::ReqwestTransport;
pub use self::scripted::{Reply, ScriptedTransport};

use crate::deferred::{Connection, ResponseSink};
use crate::error::RequestError;
use crate::request::Request;
use crate::response::{RawResponse, ReadProgress, ResponseHead, WriteProgress};

/// Sends requests over some medium.
///
/// `send` must not block: start the exchange and return. Panics escaping
/// `send` are caught by the dispatcher and reported as dispatch errors.
pub trait Transport: Send + Sync {
    /// Starts the exchange described by `attempt`.
    fn send(&self, attempt: Attempt);
}

/// One transport attempt: the request, its connection and the deferred the
/// outcome is reported to.
pub struct Attempt {
    request: Arc<Request>,
    connection: Connection,
    sink: Arc<dyn ResponseSink>,
}

impl Attempt {
    pub(crate) fn new(
        request: Arc<Request>,
        connection: Connection,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        Self {
            request,
            connection,
            sink,
        }
    }

    /// The request to send.
    #[must_use]
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Connection of this attempt; register abort hooks on it to stop I/O on
    /// cancel or timeout.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// False once the attempt was completed, cancelled or expired.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.connection.is_pending()
    }

    /// Reports received status and headers.
    pub fn notify_response(&self, head: ResponseHead) {
        if self.is_pending() {
            self.sink.notify_response(head);
        } else {
            debug!(uri = %self.request.uri(), "dropping headers of a closed attempt");
        }
    }

    /// Reports download progress.
    pub fn notify_download(&self, progress: ReadProgress) {
        if self.is_pending() {
            self.sink.notify_download(progress);
        }
    }

    /// Reports upload progress.
    pub fn notify_upload(&self, progress: WriteProgress) {
        if self.is_pending() {
            self.sink.notify_upload(progress);
        }
    }

    /// Completes the attempt with a received response.
    pub fn resolve(self, response: RawResponse) {
        if self.connection.finish() {
            self.sink.resolve(response);
        } else {
            debug!(uri = %self.request.uri(), status = response.status(), "dropping response of a closed attempt");
        }
    }

    /// Completes the attempt with a failure.
    pub fn reject(self, error: RequestError) {
        if self.connection.finish() {
            self.sink.reject(error);
        } else {
            debug!(uri = %self.request.uri(), error = %error, "dropping failure of a closed attempt");
        }
    }
}

impl fmt::Debug for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attempt")
            .field("request", &self.request)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
