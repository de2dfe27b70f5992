//! In-process transport replaying scripted replies.
//!
//! Replies are delivered from runner tasks after their latency, so with a
//! [`LocalRunner`](crate::runner::LocalRunner) every exchange, retry and
//! polling cycle runs deterministically on a virtual clock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, trace};

use super::{Attempt, Transport};
use crate::error::{ErrorKind, RequestError};
use crate::request::Request;
use crate::response::{RawResponse, ReadProgress, ResponseHead};
use crate::runner::AsyncRunner;

/// What the scripted transport does with one attempt.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Delivers a response after `latency`.
    Respond {
        /// Status code.
        status: u16,
        /// Response headers.
        headers: HeaderMap,
        /// Response body.
        body: Bytes,
        /// Delay before headers and body are delivered.
        latency: Duration,
    },
    /// Fails the attempt after `latency`.
    Reject {
        /// Kind of the reported failure.
        kind: ErrorKind,
        /// Failure message.
        message: String,
        /// Delay before the failure is reported.
        latency: Duration,
    },
    /// Never completes; only cancellation or the deadline ends the attempt.
    Hang,
    /// Panics inside [`Transport::send`].
    Panic(String),
}

impl Reply {
    /// Empty response with `status`.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self::Respond {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            latency: Duration::ZERO,
        }
    }

    /// JSON response.
    #[must_use]
    pub fn json(status: u16, body: &str) -> Self {
        Self::status(status)
            .with_body(body.to_string())
            .with_header(CONTENT_TYPE, "application/json")
    }

    /// Plain text response.
    #[must_use]
    pub fn text(status: u16, body: &str) -> Self {
        Self::status(status)
            .with_body(body.to_string())
            .with_header(CONTENT_TYPE, "text/plain")
    }

    /// Failure of the given kind.
    #[must_use]
    pub fn reject(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Reject {
            kind,
            message: message.into(),
            latency: Duration::ZERO,
        }
    }

    /// Sets the body of a response reply.
    #[must_use]
    pub fn with_body(mut self, content: impl Into<Bytes>) -> Self {
        if let Self::Respond { body, .. } = &mut self {
            *body = content.into();
        }
        self
    }

    /// Adds a header to a response reply. Invalid values are skipped.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Self::Respond { headers, .. } = &mut self
            && let Ok(value) = HeaderValue::from_str(value)
        {
            headers.insert(name, value);
        }
        self
    }

    /// Delays delivery of a response or failure.
    #[must_use]
    pub fn after(mut self, delay: Duration) -> Self {
        match &mut self {
            Self::Respond { latency, .. } | Self::Reject { latency, .. } => *latency = delay,
            Self::Hang | Self::Panic(_) => {}
        }
        self
    }
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Reply>,
    fallback: Option<Reply>,
}

/// [`Transport`] answering each attempt with the next scripted [`Reply`].
///
/// Replies are consumed in order; once the queue is empty the
/// [`repeat`](Self::repeat) reply is used, and without one the attempt is
/// aborted.
pub struct ScriptedTransport {
    runner: Arc<dyn AsyncRunner>,
    script: Mutex<Script>,
    requests: Mutex<Vec<Arc<Request>>>,
    hanging: Mutex<Vec<Attempt>>,
    aborted: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    /// Creates a transport with an empty script; replies run on `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn AsyncRunner>) -> Self {
        Self {
            runner,
            script: Mutex::new(Script::default()),
            requests: Mutex::new(Vec::new()),
            hanging: Mutex::new(Vec::new()),
            aborted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues `reply` for the next unanswered attempt.
    pub fn push(&self, reply: Reply) -> &Self {
        self.script.lock().queue.push_back(reply);
        self
    }

    /// Answers every attempt beyond the queue with `reply`.
    pub fn repeat(&self, reply: Reply) -> &Self {
        self.script.lock().fallback = Some(reply);
        self
    }

    /// Number of attempts sent so far.
    #[must_use]
    pub fn sent(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests of every attempt, in send order.
    #[must_use]
    pub fn requests(&self) -> Vec<Arc<Request>> {
        self.requests.lock().clone()
    }

    /// Number of attempts whose I/O was stopped by cancel or deadline.
    #[must_use]
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Option<Reply> {
        let mut script = self.script.lock();
        script.queue.pop_front().or_else(|| script.fallback.clone())
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, attempt: Attempt) {
        self.requests.lock().push(Arc::clone(attempt.request()));

        let aborted = Arc::clone(&self.aborted);
        attempt.connection().on_abort(move || {
            aborted.fetch_add(1, Ordering::SeqCst);
        });

        let uri = attempt.request().uri().to_string();
        let Some(reply) = self.next_reply() else {
            debug!(%uri, "no scripted reply left");
            attempt.reject(RequestError::abort(uri, "no scripted reply"));
            return;
        };
        trace!(%uri, ?reply, "scripted reply");

        match reply {
            Reply::Respond {
                status,
                headers,
                body,
                latency,
            } => {
                self.runner.run(
                    Box::new(move || {
                        let head = ResponseHead::new(status, headers);
                        attempt.notify_response(head.clone());
                        let length = body.len() as u64;
                        if length > 0 {
                            attempt.notify_download(ReadProgress::new(length, Some(length)));
                        }
                        attempt.resolve(RawResponse::new(head, body));
                    }),
                    latency,
                );
            }
            Reply::Reject {
                kind,
                message,
                latency,
            } => {
                self.runner.run(
                    Box::new(move || attempt.reject(scripted_error(kind, &uri, message, latency))),
                    latency,
                );
            }
            Reply::Hang => self.hanging.lock().push(attempt),
            Reply::Panic(message) => panic!("{message}"),
        }
    }
}

fn scripted_error(kind: ErrorKind, uri: &str, message: String, latency: Duration) -> RequestError {
    match kind {
        ErrorKind::Abort => RequestError::abort(uri, message),
        ErrorKind::Cancel => RequestError::cancel(uri, message),
        ErrorKind::Timeout => RequestError::timeout(uri, latency),
        ErrorKind::Dispatch => RequestError::dispatch(uri, message),
    }
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("queued", &self.script.lock().queue.len())
            .field("sent", &self.sent())
            .field("aborted", &self.aborted())
            .finish_non_exhaustive()
    }
}
