//! Request deferred: the named callback facade and retry interception for
//! one dispatch cycle.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::connection::{Connection, ResponseSink};
use super::future::{ResponseFuture, Settled};
use super::object::{DeferredObject, Promise};
use super::State;
use crate::dispatcher::Dispatcher;
use crate::error::{ErrorKind, RequestError};
use crate::event::RequestEvent;
use crate::request::Request;
use crate::response::{RawResponse, ReadProgress, Response, ResponseHead, WriteProgress};
use crate::retry::RequestRetrier;
use crate::runner::Lock;
use crate::serialization::{SerdesError, response_media_type};
use crate::status::{StatusFamily, is_successful};

type ResponseObject<T> = DeferredObject<Response<T>, RequestError, ReadProgress, WriteProgress>;
type Hook = Box<dyn FnOnce() + Send>;

/// Outcome of a settled request deferred.
pub type Outcome<T> = Result<Arc<Response<T>>, Arc<RequestError>>;

/// Deferred of one dispatch cycle of a request.
///
/// Resolves with a [`Response`] for every delivered HTTP response, whatever
/// its status, and rejects with a [`RequestError`] when no response could be
/// obtained. Retries triggered by the request's retry policy happen inside
/// the same deferred: it stays pending until an outcome is let through.
///
/// Cloning yields another handle to the same deferred.
pub struct DeferredRequest<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    this: Weak<Inner<T>>,
    request: Arc<Request>,
    object: ResponseObject<T>,
    dispatcher: Dispatcher,
    retrier: Option<RequestRetrier>,
    observers: Observers,
    connection: Mutex<Option<Connection>>,
    head: Mutex<Option<ResponseHead>>,
    hooks: Mutex<CycleHooks>,
    future_cancelled: AtomicBool,
}

/// Tracks which rejection kinds have a registered handler.
#[derive(Debug, Default)]
struct Observers {
    error: AtomicBool,
    abort: AtomicBool,
    cancel: AtomicBool,
    timeout: AtomicBool,
}

impl Observers {
    fn copy(&self) -> Self {
        Self {
            error: AtomicBool::new(self.error.load(Ordering::SeqCst)),
            abort: AtomicBool::new(self.abort.load(Ordering::SeqCst)),
            cancel: AtomicBool::new(self.cancel.load(Ordering::SeqCst)),
            timeout: AtomicBool::new(self.timeout.load(Ordering::SeqCst)),
        }
    }

    fn observes(&self, kind: ErrorKind) -> bool {
        if self.error.load(Ordering::SeqCst) {
            return true;
        }
        match kind {
            ErrorKind::Abort => self.abort.load(Ordering::SeqCst),
            ErrorKind::Cancel => self.cancel.load(Ordering::SeqCst),
            ErrorKind::Timeout => self.timeout.load(Ordering::SeqCst),
            ErrorKind::Dispatch => false,
        }
    }
}

/// Internal per-cycle hooks; never replicated.
#[derive(Default)]
struct CycleHooks {
    on_head: Vec<Hook>,
    on_load: Vec<Hook>,
    on_reject: Vec<Hook>,
}

impl<T> Clone for DeferredRequest<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> DeferredRequest<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a pending deferred for `request`.
    pub(crate) fn new(request: Arc<Request>, dispatcher: Dispatcher) -> Self {
        let object = DeferredObject::new(dispatcher.runner().new_lock());
        Self::assemble(request, dispatcher, object, Observers::default())
    }

    fn assemble(
        request: Arc<Request>,
        dispatcher: Dispatcher,
        object: ResponseObject<T>,
        observers: Observers,
    ) -> Self {
        let retrier = request.retry_policy().cloned().map(RequestRetrier::new);
        let inner = Arc::new_cyclic(|this| Inner {
            this: this.clone(),
            request,
            object,
            dispatcher,
            retrier,
            observers,
            connection: Mutex::new(None),
            head: Mutex::new(None),
            hooks: Mutex::new(CycleHooks::default()),
            future_cancelled: AtomicBool::new(false),
        });
        Self { inner }
    }

    /// Creates the deferred of the next cycle: pending, with a fresh retry
    /// count and connection, carrying every callback registered so far.
    pub(crate) fn replicate(&self) -> Self {
        let lock = self.inner.dispatcher.runner().new_lock();
        Self::assemble(
            Arc::clone(&self.inner.request),
            self.inner.dispatcher.clone(),
            self.inner.object.replicate(lock),
            self.inner.observers.copy(),
        )
    }

    pub(crate) fn sink(&self) -> Arc<dyn ResponseSink> {
        Arc::clone(&self.inner) as Arc<dyn ResponseSink>
    }

    // ==================== Callback Facade ====================

    /// Fires for every delivered response.
    pub fn on_load(&self, callback: impl Fn(&Response<T>) + Send + Sync + 'static) -> &Self {
        self.inner.object.done(callback);
        self
    }

    /// Fires for a 2xx response.
    pub fn on_success(&self, callback: impl Fn(&Response<T>) + Send + Sync + 'static) -> &Self {
        self.inner.object.done(move |response: &Response<T>| {
            if response.is_successful() {
                callback(response);
            }
        });
        self
    }

    /// Fires with the deserialized payload of a 2xx response that has one.
    pub fn on_payload(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> &Self {
        self.inner.object.done(move |response: &Response<T>| {
            if response.is_successful() {
                if let Some(payload) = response.payload() {
                    callback(payload);
                }
            }
        });
        self
    }

    /// Fires for a non-2xx response.
    pub fn on_fail(&self, callback: impl Fn(&Response<T>) + Send + Sync + 'static) -> &Self {
        self.inner.object.done(move |response: &Response<T>| {
            if !response.is_successful() {
                callback(response);
            }
        });
        self
    }

    /// Fires for a response with exactly `status`.
    pub fn on_status(
        &self,
        status: u16,
        callback: impl Fn(&Response<T>) + Send + Sync + 'static,
    ) -> &Self {
        self.inner.object.done(move |response: &Response<T>| {
            if response.status() == status {
                callback(response);
            }
        });
        self
    }

    /// Fires for a response whose status is in `family`.
    pub fn on_status_family(
        &self,
        family: StatusFamily,
        callback: impl Fn(&Response<T>) + Send + Sync + 'static,
    ) -> &Self {
        self.inner.object.done(move |response: &Response<T>| {
            if family.contains(response.status()) {
                callback(response);
            }
        });
        self
    }

    /// Fires for every rejection.
    pub fn on_error(&self, callback: impl Fn(&RequestError) + Send + Sync + 'static) -> &Self {
        self.inner.observers.error.store(true, Ordering::SeqCst);
        self.inner.object.fail(callback);
        self
    }

    /// Fires when the request could not be sent.
    pub fn on_abort(&self, callback: impl Fn(&RequestError) + Send + Sync + 'static) -> &Self {
        self.inner.observers.abort.store(true, Ordering::SeqCst);
        self.on_rejection_kind(ErrorKind::Abort, callback)
    }

    /// Fires when the request was cancelled.
    pub fn on_cancel(&self, callback: impl Fn(&RequestError) + Send + Sync + 'static) -> &Self {
        self.inner.observers.cancel.store(true, Ordering::SeqCst);
        self.on_rejection_kind(ErrorKind::Cancel, callback)
    }

    /// Fires when the request deadline elapsed.
    pub fn on_timeout(&self, callback: impl Fn(&RequestError) + Send + Sync + 'static) -> &Self {
        self.inner.observers.timeout.store(true, Ordering::SeqCst);
        self.on_rejection_kind(ErrorKind::Timeout, callback)
    }

    fn on_rejection_kind(
        &self,
        kind: ErrorKind,
        callback: impl Fn(&RequestError) + Send + Sync + 'static,
    ) -> &Self {
        self.inner.object.fail(move |error: &RequestError| {
            if error.kind() == kind {
                callback(error);
            }
        });
        self
    }

    /// Fires for every download progress notification.
    pub fn on_read(&self, callback: impl Fn(&ReadProgress) + Send + Sync + 'static) -> &Self {
        self.inner.object.progress(callback);
        self
    }

    /// Fires for every upload progress notification.
    pub fn on_write(&self, callback: impl Fn(&WriteProgress) + Send + Sync + 'static) -> &Self {
        self.inner.object.up_progress(callback);
        self
    }

    /// Read-only view of the underlying deferred, for raw `done`/`fail`
    /// registration.
    #[must_use]
    pub fn promise(&self) -> Promise<Response<T>, RequestError, ReadProgress, WriteProgress> {
        self.inner.object.promise()
    }

    // ==================== Queries ====================

    /// The request being dispatched.
    #[must_use]
    pub fn request(&self) -> &Arc<Request> {
        &self.inner.request
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.inner.object.state()
    }

    /// True while no outcome has been delivered.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.object.is_pending()
    }

    /// True once a response was delivered.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.object.is_resolved()
    }

    /// True once rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.inner.object.is_rejected()
    }

    /// The delivered response, if resolved.
    #[must_use]
    pub fn response(&self) -> Option<Arc<Response<T>>> {
        self.inner.object.resolved_value()
    }

    /// The rejection, if rejected.
    #[must_use]
    pub fn error(&self) -> Option<Arc<RequestError>> {
        self.inner.object.rejected_value()
    }

    /// Settled outcome, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<T>> {
        match self.state() {
            State::Pending => None,
            State::Resolved => self.response().map(Ok),
            State::Rejected => self.error().map(Err),
        }
    }

    /// Headers of the latest attempt, once received.
    #[must_use]
    pub fn head(&self) -> Option<ResponseHead> {
        self.inner.head.lock().clone()
    }

    /// Connection of the current attempt.
    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        self.inner.connection.lock().clone()
    }

    /// Retries scheduled in this cycle.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner
            .retrier
            .as_ref()
            .map_or(0, RequestRetrier::retry_count)
    }

    /// Blocking view of this deferred.
    #[must_use]
    pub fn future(&self) -> ResponseFuture<T> {
        ResponseFuture::new(self.clone())
    }

    /// Async view of this deferred.
    #[must_use]
    pub fn settled(&self) -> Settled<T> {
        Settled::new(self.clone())
    }

    pub(crate) fn lock(&self) -> &Arc<dyn Lock> {
        self.inner.object.lock()
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn register_waker(&self, waker: &std::task::Waker) -> bool {
        self.inner.object.register_waker(waker)
    }

    pub(crate) fn set_future_cancelled(&self, cancelled: bool) {
        self.inner.future_cancelled.store(cancelled, Ordering::SeqCst);
    }

    pub(crate) fn is_future_cancelled(&self) -> bool {
        self.inner.future_cancelled.load(Ordering::SeqCst)
    }

    // ==================== Cycle Hooks ====================

    /// Runs `hook` once, when headers arrive or the deferred settles,
    /// whichever comes first.
    pub(crate) fn when_headers_or_settled(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.inner.hooks.lock();
        if self.inner.head.lock().is_some() || !self.is_pending() {
            drop(hooks);
            hook();
        } else {
            hooks.on_head.push(Box::new(hook));
        }
    }

    /// Runs `hook` once, when the deferred resolves. Dropped on rejection.
    pub(crate) fn when_loaded(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.inner.hooks.lock();
        match self.state() {
            State::Pending => hooks.on_load.push(Box::new(hook)),
            State::Resolved => {
                drop(hooks);
                hook();
            }
            State::Rejected => {}
        }
    }

    /// Runs `hook` once, when the deferred rejects. Dropped on resolve.
    pub(crate) fn when_rejected(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.inner.hooks.lock();
        match self.state() {
            State::Pending => hooks.on_reject.push(Box::new(hook)),
            State::Rejected => {
                drop(hooks);
                hook();
            }
            State::Resolved => {}
        }
    }
}

impl<T> Inner<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn maybe_retry(&self, occurred: &[RequestEvent]) -> bool {
        let Some(retrier) = &self.retrier else {
            return false;
        };
        let Some(delay) = retrier.claim(occurred) else {
            return false;
        };
        let Some(this) = self.this.upgrade() else {
            return false;
        };

        info!(
            uri = %self.request.uri(),
            retry = retrier.retry_count(),
            delay_ms = delay.as_millis(),
            "retrying request"
        );
        self.dispatcher.send(this as Arc<dyn ResponseSink>, delay);
        true
    }

    fn settle_resolved(&self, response: Response<T>) {
        if let Err(err) = self.object.resolve(response) {
            debug!(error = %err, uri = %self.request.uri(), "dropping response");
            return;
        }
        let hooks = mem::take(&mut *self.hooks.lock());
        for hook in hooks.on_head.into_iter().chain(hooks.on_load) {
            hook();
        }
    }

    /// True when a rejection of `kind` would reach no handler and no waiter,
    /// blocking or async.
    fn is_unobserved(&self, kind: ErrorKind) -> bool {
        !self.observers.observes(kind)
            && !self.object.lock().is_awaiting()
            && !self.object.has_wakers()
    }

    fn settle_rejected(&self, error: RequestError) {
        let kind = error.kind();
        let message = self.is_unobserved(kind).then(|| error.to_string());

        if let Err(err) = self.object.reject(error) {
            debug!(error = %err, uri = %self.request.uri(), "dropping rejection");
            return;
        }
        if let Some(message) = message {
            warn!(
                kind = %kind,
                uri = %self.request.uri(),
                error = %message,
                "request failed with no error handler registered"
            );
        }

        let hooks = mem::take(&mut *self.hooks.lock());
        for hook in hooks.on_head.into_iter().chain(hooks.on_reject) {
            hook();
        }
    }

    fn decode(&self, raw: RawResponse) -> Result<Response<T>, RequestError> {
        let (head, body) = raw.into_parts();
        let decoded = {
            let media_type = response_media_type(head.content_type(), self.request.accept());
            self.dispatcher.serdes().decode::<T>(&body, media_type)
        };

        let payload = match decoded {
            Ok(payload) => payload,
            Err(SerdesError::NoDeserializer { media_type }) => {
                debug!(%media_type, "no deserializer registered; response has no payload");
                None
            }
            Err(err) if is_successful(head.status()) => {
                return Err(RequestError::dispatch_with(
                    self.request.uri(),
                    "cannot deserialize response body",
                    err,
                ));
            }
            Err(err) => {
                debug!(status = head.status(), error = %err, "error response body has no payload");
                None
            }
        };
        Ok(Response::new(head, body, payload, Arc::clone(&self.request)))
    }
}

impl<T> ResponseSink for Inner<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn request(&self) -> &Arc<Request> {
        &self.request
    }

    fn attach(&self, connection: Connection) {
        *self.connection.lock() = Some(connection);
    }

    fn notify_response(&self, head: ResponseHead) {
        if !self.object.is_pending() {
            debug!(uri = %self.request.uri(), "dropping headers of a settled request");
            return;
        }
        *self.head.lock() = Some(head);
        let hooks = mem::take(&mut self.hooks.lock().on_head);
        for hook in hooks {
            hook();
        }
    }

    fn notify_download(&self, progress: ReadProgress) {
        if let Err(err) = self.object.notify_download(progress) {
            debug!(error = %err, "dropping download progress");
        }
    }

    fn notify_upload(&self, progress: WriteProgress) {
        if let Err(err) = self.object.notify_upload(progress) {
            debug!(error = %err, "dropping upload progress");
        }
    }

    fn resolve(&self, mut raw: RawResponse) {
        let processed = self
            .dispatcher
            .processors()
            .process_response(&self.request, &mut raw);
        if let Err(error) = processed {
            self.settle_rejected(error);
            return;
        }
        if self.maybe_retry(&RequestEvent::from_status(raw.status())) {
            return;
        }
        match self.decode(raw) {
            Ok(response) => self.settle_resolved(response),
            Err(error) => self.settle_rejected(error),
        }
    }

    fn reject(&self, error: RequestError) {
        if self.maybe_retry(&RequestEvent::from_error(&error)) {
            return;
        }
        self.settle_rejected(error);
    }

    fn reject_final(&self, error: RequestError) {
        self.settle_rejected(error);
    }
}

impl<T> fmt::Debug for DeferredRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredRequest")
            .field("uri", &self.inner.request.uri())
            .field("object", &self.inner.object)
            .finish_non_exhaustive()
    }
}
