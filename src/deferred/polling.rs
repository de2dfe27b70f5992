//! Caller-visible handle over successive dispatch cycles.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use super::State;
use super::connection::Connection;
use super::future::{ResponseFuture, Settled};
use super::request::DeferredRequest;
use crate::error::{FutureError, RequestError};
use crate::polling::PollingState;
use crate::request::Request;
use crate::response::{ReadProgress, Response, WriteProgress};
use crate::status::StatusFamily;

/// Handle returned by every dispatch.
///
/// Without a polling policy it wraps a single [`DeferredRequest`]. With one,
/// each cycle gets a new deferred that inherits every callback registered so
/// far, and this handle always points at the latest. Callbacks registered
/// here therefore fire for the current cycle and all later ones.
///
/// Cloning yields another handle to the same request.
pub struct PollingRequest<T> {
    shared: Arc<Shared<T>>,
}

pub(crate) struct Shared<T> {
    pub(crate) request: Arc<Request>,
    pub(crate) state: PollingState,
    pub(crate) current: Mutex<DeferredRequest<T>>,
}

impl<T> Clone for PollingRequest<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

macro_rules! delegate_registration {
    ($(#[$doc:meta] $name:ident($($arg:ident: $ty:ty),*) -> $cb:ty;)*) => {
        $(
            #[$doc]
            pub fn $name(&self, $($arg: $ty,)* callback: impl Fn($cb) + Send + Sync + 'static) -> &Self {
                self.current().$name($($arg,)* callback);
                self
            }
        )*
    };
}

impl<T> PollingRequest<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(request: Arc<Request>, first: DeferredRequest<T>) -> Self {
        let state = PollingState::new(request.polling_policy());
        Self {
            shared: Arc::new(Shared {
                request,
                state,
                current: Mutex::new(first),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<T>> {
        &self.shared
    }

    delegate_registration! {
        /// Fires for every delivered response.
        on_load() -> &Response<T>;
        /// Fires for a 2xx response.
        on_success() -> &Response<T>;
        /// Fires with the payload of a 2xx response that has one.
        on_payload() -> &T;
        /// Fires for a non-2xx response.
        on_fail() -> &Response<T>;
        /// Fires for a response with exactly `status`.
        on_status(status: u16) -> &Response<T>;
        /// Fires for a response in `family`.
        on_status_family(family: StatusFamily) -> &Response<T>;
        /// Fires for every rejection.
        on_error() -> &RequestError;
        /// Fires when the request could not be sent.
        on_abort() -> &RequestError;
        /// Fires when the request was cancelled.
        on_cancel() -> &RequestError;
        /// Fires when the request deadline elapsed.
        on_timeout() -> &RequestError;
        /// Fires for download progress.
        on_read() -> &ReadProgress;
        /// Fires for upload progress.
        on_write() -> &WriteProgress;
    }

    /// Deferred of the latest cycle.
    #[must_use]
    pub fn current(&self) -> DeferredRequest<T> {
        self.shared.current.lock().clone()
    }

    /// The dispatched request.
    #[must_use]
    pub fn request(&self) -> &Arc<Request> {
        &self.shared.request
    }

    /// State of the latest cycle.
    #[must_use]
    pub fn state(&self) -> State {
        self.current().state()
    }

    /// True while the latest cycle is pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.current().is_pending()
    }

    /// True once the latest cycle resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.current().is_resolved()
    }

    /// True once the latest cycle rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.current().is_rejected()
    }

    /// Connection of the latest attempt.
    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        self.current().connection()
    }

    /// Retries scheduled in the latest cycle.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.current().retry_count()
    }

    /// Cycles dispatched so far; 1 for a request without polling.
    #[must_use]
    pub fn polling_count(&self) -> u32 {
        self.shared.state.count()
    }

    /// True while further cycles may be armed.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.shared.state.is_polling()
    }

    /// Stops arming further cycles. The cycle in flight completes normally.
    pub fn stop_polling(&self) {
        self.shared.state.stop();
    }

    /// Cancels the connection of the latest attempt. Returns false when it
    /// was not pending.
    pub fn cancel(&self) -> bool {
        self.connection().is_some_and(|connection| connection.cancel())
    }

    /// Blocking view of the latest cycle.
    #[must_use]
    pub fn future(&self) -> ResponseFuture<T> {
        self.current().future()
    }

    /// Blocks until the latest cycle settles.
    ///
    /// # Errors
    ///
    /// See [`ResponseFuture::get`].
    pub fn get(&self) -> Result<Arc<Response<T>>, FutureError> {
        self.future().get()
    }

    /// Blocks until the latest cycle settles or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// See [`ResponseFuture::get_timeout`].
    pub fn get_timeout(&self, timeout: Duration) -> Result<Arc<Response<T>>, FutureError> {
        self.future().get_timeout(timeout)
    }

    /// Async view of the latest cycle.
    #[must_use]
    pub fn settled(&self) -> Settled<T> {
        self.current().settled()
    }
}

impl<T> fmt::Debug for PollingRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingRequest")
            .field("request", &self.shared.request)
            .field("polling_count", &self.shared.state.count())
            .field("is_polling", &self.shared.state.is_polling())
            .finish_non_exhaustive()
    }
}
