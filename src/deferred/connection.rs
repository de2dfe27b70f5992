//! Connection handle of one transport attempt.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::RequestError;
use crate::request::Request;
use crate::response::{RawResponse, ReadProgress, ResponseHead, WriteProgress};

/// Receiver of transport events for one dispatch cycle.
///
/// `reject` goes through retry interception; `reject_final` does not.
pub(crate) trait ResponseSink: Send + Sync {
    fn request(&self) -> &Arc<Request>;
    fn attach(&self, connection: Connection);
    fn notify_response(&self, head: ResponseHead);
    fn notify_download(&self, progress: ReadProgress);
    fn notify_upload(&self, progress: WriteProgress);
    fn resolve(&self, raw: RawResponse);
    fn reject(&self, error: RequestError);
    fn reject_final(&self, error: RequestError);
}

type AbortHook = Box<dyn FnOnce() + Send>;

/// Cancellable handle to one in-flight transport attempt.
///
/// A connection is pending from the moment an attempt is scheduled until the
/// transport completes it, it is cancelled, or its deadline expires,
/// whichever happens first. Retries and polling cycles get fresh
/// connections.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    uri: String,
    pending: AtomicBool,
    sink: Option<Weak<dyn ResponseSink>>,
    abort_hooks: Mutex<Vec<AbortHook>>,
}

impl Connection {
    pub(crate) fn new(uri: impl Into<String>, sink: Weak<dyn ResponseSink>) -> Self {
        Self::build(uri.into(), Some(sink))
    }

    /// Creates a pending connection not bound to any deferred. Cancelling it
    /// only runs its abort hooks.
    #[must_use]
    pub fn detached(uri: impl Into<String>) -> Self {
        Self::build(uri.into(), None)
    }

    fn build(uri: String, sink: Option<Weak<dyn ResponseSink>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                uri,
                pending: AtomicBool::new(true),
                sink,
                abort_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Target URI of the attempt.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// True until the attempt completes, is cancelled or times out.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Cancels a pending attempt: stops its I/O and rejects the owning
    /// deferred with a cancel error. Returns false, doing nothing, when the
    /// attempt was already finished or cancelled.
    pub fn cancel(&self) -> bool {
        if !self.close() {
            return false;
        }
        debug!(uri = %self.inner.uri, "connection cancelled");
        self.run_abort_hooks();
        if let Some(sink) = self.sink() {
            sink.reject_final(RequestError::cancel(&self.inner.uri, "cancelled by caller"));
        }
        true
    }

    /// Ends a pending attempt with `error`, subject to retry. Used for
    /// deadlines and transport-level drops.
    pub(crate) fn expire(&self, error: RequestError) -> bool {
        if !self.close() {
            return false;
        }
        debug!(uri = %self.inner.uri, kind = %error.kind(), "connection expired");
        self.run_abort_hooks();
        if let Some(sink) = self.sink() {
            sink.reject(error);
        }
        true
    }

    /// Ends a pending attempt with `error`, bypassing retry. Used when the
    /// runner goes away and nothing could re-dispatch the request.
    pub(crate) fn abort(&self, error: RequestError) -> bool {
        if !self.close() {
            return false;
        }
        debug!(uri = %self.inner.uri, kind = %error.kind(), "connection aborted");
        self.run_abort_hooks();
        if let Some(sink) = self.sink() {
            sink.reject_final(error);
        }
        true
    }

    /// Marks the attempt complete. Returns true for the caller that moved it
    /// out of the pending state; that caller owns delivery of the outcome.
    pub(crate) fn finish(&self) -> bool {
        if !self.close() {
            return false;
        }
        self.inner.abort_hooks.lock().clear();
        true
    }

    /// Registers a hook that stops the attempt's I/O on cancel or expiry.
    /// Runs immediately if the connection is no longer pending.
    pub fn on_abort(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.inner.abort_hooks.lock();
        if self.is_pending() {
            hooks.push(Box::new(hook));
        } else {
            drop(hooks);
            hook();
        }
    }

    fn close(&self) -> bool {
        self.inner.pending.swap(false, Ordering::SeqCst)
    }

    fn run_abort_hooks(&self) {
        let hooks = mem::take(&mut *self.inner.abort_hooks.lock());
        for hook in hooks {
            hook();
        }
    }

    fn sink(&self) -> Option<Arc<dyn ResponseSink>> {
        self.inner.sink.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("uri", &self.inner.uri)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}
