//! Dispatch of requests onto a transport.
//!
//! The dispatcher owns the control flow between a built [`Request`] and its
//! [`PollingRequest`] handle:
//!
//! 1. create the cycle's deferred and bump the polling counter
//! 2. arm the next polling cycle, if any
//! 3. schedule the attempt on the runner after the request delay
//! 4. schedule the deadline, then hand an [`Attempt`] to the transport
//!
//! Retries re-enter at step 3 with the same deferred and a new connection.
//!
//! Every connection stays registered until it leaves the pending state, so
//! [`Dispatcher::shutdown`] can abort whatever the runner will never run.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument};

use crate::deferred::{Connection, DeferredRequest, PollingRequest, ResponseSink};
use crate::deferred::polling::Shared;
use crate::deferred::object::panic_message;
use crate::error::RequestError;
use crate::filter::Processors;
use crate::polling::{PollingPolicy, PollingStrategy};
use crate::request::Request;
use crate::runner::AsyncRunner;
use crate::serialization::SerdesManager;
use crate::transport::{Attempt, Transport};

/// Sends requests through a transport, scheduling on a runner.
///
/// Cheap to clone; clones share the runner, transport, serdes and the set
/// of pending connections.
#[derive(Clone)]
pub struct Dispatcher {
    runner: Arc<dyn AsyncRunner>,
    transport: Arc<dyn Transport>,
    serdes: Arc<SerdesManager>,
    processors: Arc<Processors>,
    pending: Arc<Mutex<Vec<Connection>>>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        runner: Arc<dyn AsyncRunner>,
        transport: Arc<dyn Transport>,
        serdes: Arc<SerdesManager>,
    ) -> Self {
        Self {
            runner,
            transport,
            serdes,
            processors: Arc::new(Processors::new()),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The scheduling runner.
    #[must_use]
    pub fn runner(&self) -> &Arc<dyn AsyncRunner> {
        &self.runner
    }

    /// The transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Serializers used for response bodies.
    #[must_use]
    pub fn serdes(&self) -> &Arc<SerdesManager> {
        &self.serdes
    }

    /// Request and response hooks.
    #[must_use]
    pub fn processors(&self) -> &Processors {
        &self.processors
    }

    pub(crate) fn processors_mut(&mut self) -> &mut Processors {
        Arc::make_mut(&mut self.processors)
    }

    /// Number of attempts scheduled or in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let mut pending = self.pending.lock();
        pending.retain(Connection::is_pending);
        pending.len()
    }

    /// Shuts the runner down and aborts every pending attempt.
    ///
    /// Scheduled sends, deadlines and retries are dropped by the runner, so
    /// their deferreds are rejected here with an abort error instead of
    /// staying pending. Retries are bypassed.
    pub fn shutdown(&self) {
        self.runner.shutdown();
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut aborted = 0_usize;
        for connection in pending {
            let error = RequestError::abort(connection.uri(), "runner is shut down");
            if connection.abort(error) {
                aborted += 1;
            }
        }
        info!(aborted, "dispatcher shut down");
    }

    /// Dispatches `request`, returning the handle its outcome is delivered to.
    pub fn dispatch<T>(&self, request: Request) -> PollingRequest<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let request = Arc::new(request);
        let first = DeferredRequest::new(Arc::clone(&request), self.clone());
        let handle = PollingRequest::new(request, first.clone());
        self.start_cycle(handle.shared(), first);
        handle
    }

    /// Returns a handle that rejects with `error` without sending anything.
    ///
    /// The rejection is delivered from a runner task, so callbacks registered
    /// right after this call still observe it.
    pub fn reject_unsent<T>(&self, request: Request, error: RequestError) -> PollingRequest<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let request = Arc::new(request);
        let deferred = DeferredRequest::new(Arc::clone(&request), self.clone());
        let handle = PollingRequest::new(request, deferred.clone());
        handle.shared().state.increment();
        handle.shared().state.stop();

        let sink = deferred.sink();
        debug!(uri = %sink.request().uri(), error = %error, "request not sent");
        let connection = self.track(&sink);
        if self.runner.is_shutdown() {
            connection.abort(error);
        } else {
            self.runner.run(
                Box::new(move || {
                    connection.abort(error);
                }),
                Duration::ZERO,
            );
        }
        handle
    }

    /// Creates and registers the connection of a new attempt of `sink`.
    fn track(&self, sink: &Arc<dyn ResponseSink>) -> Connection {
        let connection = Connection::new(sink.request().uri(), Arc::downgrade(sink));
        sink.attach(connection.clone());
        let mut pending = self.pending.lock();
        pending.retain(Connection::is_pending);
        pending.push(connection.clone());
        connection
    }

    fn start_cycle<T>(&self, shared: &Arc<Shared<T>>, deferred: DeferredRequest<T>)
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let cycle = shared.state.increment();
        debug!(uri = %shared.request.uri(), cycle, "dispatch cycle");

        if shared.state.is_polling()
            && let Some(policy) = shared.state.policy()
        {
            let dispatcher = self.clone();
            let next = Arc::clone(shared);
            let arm = move || dispatcher.schedule_next(next, policy);
            match policy.strategy() {
                PollingStrategy::Short => deferred.when_headers_or_settled(arm),
                PollingStrategy::Long => {
                    deferred.when_loaded(arm);
                    let stopped = Arc::clone(shared);
                    deferred.when_rejected(move || {
                        debug!(uri = %stopped.request.uri(), "long polling ended by rejection");
                        stopped.state.stop();
                    });
                }
            }
        }

        self.send(deferred.sink(), shared.request.delay());
    }

    fn schedule_next<T>(&self, shared: Arc<Shared<T>>, policy: PollingPolicy)
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        if !shared.state.is_polling() {
            debug!(uri = %shared.request.uri(), "polling stopped");
            return;
        }
        let dispatcher = self.clone();
        self.runner.run(
            Box::new(move || {
                if !shared.state.is_polling() {
                    debug!(uri = %shared.request.uri(), "polling stopped before next cycle");
                    return;
                }
                let next = {
                    let mut current = shared.current.lock();
                    let next = current.replicate();
                    *current = next.clone();
                    next
                };
                dispatcher.start_cycle(&shared, next);
            }),
            policy.next_delay(),
        );
    }

    /// Schedules one transport attempt for `sink` after `delay`.
    #[instrument(skip(self, sink), fields(uri = %sink.request().uri(), delay_ms = delay.as_millis()))]
    pub(crate) fn send(&self, sink: Arc<dyn ResponseSink>, delay: Duration) {
        let connection = self.track(&sink);
        if self.runner.is_shutdown() {
            connection.abort(RequestError::abort(connection.uri(), "runner is shut down"));
            return;
        }

        let dispatcher = self.clone();
        self.runner.run(
            Box::new(move || dispatcher.start_attempt(sink, connection)),
            delay,
        );
    }

    fn start_attempt(&self, sink: Arc<dyn ResponseSink>, connection: Connection) {
        if !connection.is_pending() {
            debug!(uri = %connection.uri(), "attempt cancelled before sending");
            return;
        }

        let request = Arc::clone(sink.request());
        if let Some(timeout) = request.timeout() {
            let expiring = connection.clone();
            self.runner.run(
                Box::new(move || {
                    let error = RequestError::timeout(expiring.uri(), timeout);
                    expiring.expire(error);
                }),
                timeout,
            );
        }

        debug!(method = %request.method(), uri = %request.uri(), "sending request");
        let attempt = Attempt::new(Arc::clone(&request), connection.clone(), sink);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.transport.send(attempt))) {
            let message = panic_message(panic.as_ref()).to_string();
            error!(uri = %request.uri(), panic = %message, "transport panicked");
            connection.expire(RequestError::dispatch(
                request.uri(),
                format!("transport panicked: {message}"),
            ));
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("serdes", &self.serdes)
            .field("processors", &self.processors)
            .field("shutdown", &self.runner.is_shutdown())
            .finish_non_exhaustive()
    }
}
