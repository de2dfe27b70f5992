//! Blocking and async views over a request deferred.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::State;
use super::request::{DeferredRequest, Outcome};
use crate::error::{ErrorKind, FutureError};
use crate::response::Response;

/// Cancellable, blocking handle to the outcome of one dispatch cycle.
///
/// `get` parks the calling thread on the deferred's lock until it settles.
/// Every wake re-checks the state and the original deadline, so spurious
/// wakeups are harmless and concurrent waiters are all released by the same
/// signal.
///
/// Do not call `get` from inside an async task running on the same runtime
/// that drives the request; use [`Settled`] there.
pub struct ResponseFuture<T> {
    deferred: DeferredRequest<T>,
}

impl<T> ResponseFuture<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(deferred: DeferredRequest<T>) -> Self {
        Self { deferred }
    }

    /// Cancels the request if its connection is still pending, which rejects
    /// the deferred with a cancel error. Returns false, leaving the future
    /// uncancelled, when the attempt already finished; the request then
    /// settles with its own outcome.
    pub fn cancel(&self) -> bool {
        if !self.deferred.is_pending() || self.deferred.is_future_cancelled() {
            return false;
        }
        let Some(connection) = self.deferred.connection() else {
            return false;
        };

        self.deferred.set_future_cancelled(true);
        if !connection.cancel() {
            self.deferred.set_future_cancelled(false);
            debug!(uri = %self.deferred.request().uri(), "attempt already finished; not cancelled");
            return false;
        }
        debug!(uri = %self.deferred.request().uri(), "response future cancelled");
        true
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.deferred.is_future_cancelled()
    }

    /// True once cancelled or settled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deferred.state().is_terminal()
    }

    /// Blocks until the request settles.
    ///
    /// # Errors
    ///
    /// - [`FutureError::Cancelled`] after [`cancel`](Self::cancel)
    /// - [`FutureError::Execution`] wrapping the rejection
    /// - [`FutureError::Stalled`] when the runner can never settle the request
    pub fn get(&self) -> Result<Arc<Response<T>>, FutureError> {
        self.wait(None)
    }

    /// Blocks until the request settles or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`FutureError::TimedOut`] when the deadline
    /// passes first. The request itself keeps running.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Arc<Response<T>>, FutureError> {
        self.wait(Some(timeout))
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Arc<Response<T>>, FutureError> {
        let runner = self.deferred.dispatcher().runner();
        let lock = self.deferred.lock();
        let started = runner.now();

        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }

            let remaining = match timeout {
                Some(timeout) => {
                    let elapsed = runner.now().saturating_duration_since(started);
                    if elapsed >= timeout {
                        return Err(FutureError::TimedOut(timeout));
                    }
                    Some(timeout - elapsed)
                }
                None => None,
            };

            if !lock.await_for(remaining) && self.deferred.is_pending() {
                return Err(FutureError::Stalled);
            }
        }
    }

    fn outcome(&self) -> Option<Result<Arc<Response<T>>, FutureError>> {
        match self.deferred.state() {
            State::Pending => None,
            State::Resolved => self.deferred.response().map(Ok),
            State::Rejected => self.deferred.error().map(|error| {
                if error.kind() == ErrorKind::Cancel && self.is_cancelled() {
                    Err(FutureError::Cancelled)
                } else {
                    Err(FutureError::Execution(error))
                }
            }),
        }
    }
}

impl<T> Clone for ResponseFuture<T> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T> fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("deferred", &self.deferred)
            .finish()
    }
}

/// `Future` resolving when a request deferred settles.
pub struct Settled<T> {
    deferred: DeferredRequest<T>,
}

impl<T> Settled<T> {
    pub(crate) fn new(deferred: DeferredRequest<T>) -> Self {
        Self { deferred }
    }
}

impl<T> Future for Settled<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.deferred.outcome() {
            return Poll::Ready(outcome);
        }
        if self.deferred.register_waker(cx.waker()) {
            return Poll::Pending;
        }
        // settled between the check and the registration
        match self.deferred.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for Settled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled")
            .field("deferred", &self.deferred)
            .finish()
    }
}
