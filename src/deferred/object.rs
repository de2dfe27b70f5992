//! Generic single-assignment deferred.

use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::task::Waker;

use parking_lot::Mutex;
use tracing::error;

use super::State;
use crate::error::DeferredError;
use crate::runner::Lock;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Tri-state container for the outcome of one asynchronous operation.
///
/// - `D` is the resolved value, `F` the rejection value.
/// - `P` and `U` are download and upload progress notifications.
///
/// `resolve`/`reject` succeed at most once. Callbacks registered while
/// pending fire once, in registration order, when the matching terminal state
/// is reached; callbacks registered afterwards fire immediately on the
/// calling thread. A panicking callback is logged and does not stop the rest.
///
/// Cloning yields another handle to the same deferred.
pub struct DeferredObject<D, F, P = (), U = ()> {
    shared: Arc<Shared<D, F, P, U>>,
}

struct Shared<D, F, P, U> {
    inner: Mutex<Inner<D, F, P, U>>,
    lock: Arc<dyn Lock>,
}

struct Inner<D, F, P, U> {
    state: State,
    resolved: Option<Arc<D>>,
    rejected: Option<Arc<F>>,
    done: Vec<Callback<D>>,
    fail: Vec<Callback<F>>,
    progress: Vec<Callback<P>>,
    up_progress: Vec<Callback<U>>,
    wakers: Vec<Waker>,
}

impl<D, F, P, U> Inner<D, F, P, U> {
    fn empty() -> Self {
        Self {
            state: State::Pending,
            resolved: None,
            rejected: None,
            done: Vec::new(),
            fail: Vec::new(),
            progress: Vec::new(),
            up_progress: Vec::new(),
            wakers: Vec::new(),
        }
    }

    fn ensure_pending(&self, operation: &'static str) -> Result<(), DeferredError> {
        if self.state == State::Pending {
            Ok(())
        } else {
            Err(DeferredError::AlreadySettled {
                state: self.state,
                operation,
            })
        }
    }
}

impl<D, F, P, U> Clone for DeferredObject<D, F, P, U> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D, F, P, U> DeferredObject<D, F, P, U>
where
    D: Send + Sync + 'static,
    F: Send + Sync + 'static,
    P: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    /// Creates a pending deferred; `lock` is signalled when it settles.
    #[must_use]
    pub fn new(lock: Arc<dyn Lock>) -> Self {
        Self::with_inner(lock, Inner::empty())
    }

    fn with_inner(lock: Arc<dyn Lock>, inner: Inner<D, F, P, U>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                lock,
            }),
        }
    }

    /// Creates a new pending deferred carrying the same callbacks.
    ///
    /// The callback lists are copied by reference at this point; later
    /// registrations on either instance do not affect the other.
    #[must_use]
    pub fn replicate(&self, lock: Arc<dyn Lock>) -> Self {
        let inner = self.shared.inner.lock();
        let copy = Inner {
            done: inner.done.clone(),
            fail: inner.fail.clone(),
            progress: inner.progress.clone(),
            up_progress: inner.up_progress.clone(),
            ..Inner::empty()
        };
        drop(inner);
        Self::with_inner(lock, copy)
    }

    /// Returns a read-only view of this deferred.
    #[must_use]
    pub fn promise(&self) -> Promise<D, F, P, U> {
        Promise {
            deferred: self.clone(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.shared.inner.lock().state
    }

    /// Returns true while neither resolved nor rejected.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// Returns true once resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state() == State::Resolved
    }

    /// Returns true once rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.state() == State::Rejected
    }

    /// The resolved value, if any.
    #[must_use]
    pub fn resolved_value(&self) -> Option<Arc<D>> {
        self.shared.inner.lock().resolved.clone()
    }

    /// The rejection value, if any.
    #[must_use]
    pub fn rejected_value(&self) -> Option<Arc<F>> {
        self.shared.inner.lock().rejected.clone()
    }

    /// The lock signalled when this deferred settles.
    #[must_use]
    pub fn lock(&self) -> &Arc<dyn Lock> {
        &self.shared.lock
    }

    /// Registers a callback for resolution.
    pub fn done(&self, callback: impl Fn(&D) + Send + Sync + 'static) -> &Self {
        let callback: Callback<D> = Arc::new(callback);
        let mut inner = self.shared.inner.lock();
        let state = inner.state;
        match state {
            State::Pending => inner.done.push(callback),
            State::Resolved => {
                let value = inner.resolved.clone();
                drop(inner);
                if let Some(value) = value {
                    fire(&[callback], &value, "done");
                }
            }
            State::Rejected => {}
        }
        self
    }

    /// Registers a callback for rejection.
    pub fn fail(&self, callback: impl Fn(&F) + Send + Sync + 'static) -> &Self {
        let callback: Callback<F> = Arc::new(callback);
        let mut inner = self.shared.inner.lock();
        let state = inner.state;
        match state {
            State::Pending => inner.fail.push(callback),
            State::Rejected => {
                let value = inner.rejected.clone();
                drop(inner);
                if let Some(value) = value {
                    fire(&[callback], &value, "fail");
                }
            }
            State::Resolved => {}
        }
        self
    }

    /// Registers a download progress listener. Ignored once settled.
    pub fn progress(&self, callback: impl Fn(&P) + Send + Sync + 'static) -> &Self {
        let mut inner = self.shared.inner.lock();
        if inner.state == State::Pending {
            inner.progress.push(Arc::new(callback));
        }
        self
    }

    /// Registers an upload progress listener. Ignored once settled.
    pub fn up_progress(&self, callback: impl Fn(&U) + Send + Sync + 'static) -> &Self {
        let mut inner = self.shared.inner.lock();
        if inner.state == State::Pending {
            inner.up_progress.push(Arc::new(callback));
        }
        self
    }

    /// Resolves the deferred and fires the done callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredError::AlreadySettled`] if the deferred is not
    /// pending; the stored outcome is left untouched.
    pub fn resolve(&self, value: D) -> Result<(), DeferredError> {
        let value = Arc::new(value);
        let (callbacks, wakers) = {
            let mut inner = self.shared.inner.lock();
            inner.ensure_pending("resolve")?;
            inner.state = State::Resolved;
            inner.resolved = Some(Arc::clone(&value));
            (inner.done.clone(), mem::take(&mut inner.wakers))
        };

        fire(&callbacks, &value, "done");
        self.shared.lock.signal_all();
        wakers.into_iter().for_each(Waker::wake);
        Ok(())
    }

    /// Rejects the deferred and fires the fail callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredError::AlreadySettled`] if the deferred is not
    /// pending; the stored outcome is left untouched.
    pub fn reject(&self, value: F) -> Result<(), DeferredError> {
        let value = Arc::new(value);
        let (callbacks, wakers) = {
            let mut inner = self.shared.inner.lock();
            inner.ensure_pending("reject")?;
            inner.state = State::Rejected;
            inner.rejected = Some(Arc::clone(&value));
            (inner.fail.clone(), mem::take(&mut inner.wakers))
        };

        fire(&callbacks, &value, "fail");
        self.shared.lock.signal_all();
        wakers.into_iter().for_each(Waker::wake);
        Ok(())
    }

    /// Delivers a download progress notification.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredError::AlreadySettled`] if the deferred is not pending.
    pub fn notify_download(&self, progress: P) -> Result<(), DeferredError> {
        let callbacks = {
            let inner = self.shared.inner.lock();
            inner.ensure_pending("notify download")?;
            inner.progress.clone()
        };
        fire(&callbacks, &progress, "progress");
        Ok(())
    }

    /// Delivers an upload progress notification.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredError::AlreadySettled`] if the deferred is not pending.
    pub fn notify_upload(&self, progress: U) -> Result<(), DeferredError> {
        let callbacks = {
            let inner = self.shared.inner.lock();
            inner.ensure_pending("notify upload")?;
            inner.up_progress.clone()
        };
        fire(&callbacks, &progress, "upload progress");
        Ok(())
    }

    /// Stores `waker` to be woken on settle. Returns false (and stores
    /// nothing) if the deferred is already settled.
    pub(crate) fn register_waker(&self, waker: &Waker) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        if !inner.wakers.iter().any(|stored| stored.will_wake(waker)) {
            inner.wakers.push(waker.clone());
        }
        true
    }

    /// True while an async waiter is registered.
    pub(crate) fn has_wakers(&self) -> bool {
        !self.shared.inner.lock().wakers.is_empty()
    }
}

impl<D, F, P, U> fmt::Debug for DeferredObject<D, F, P, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("DeferredObject")
            .field("state", &inner.state)
            .field("done_callbacks", &inner.done.len())
            .field("fail_callbacks", &inner.fail.len())
            .finish_non_exhaustive()
    }
}

fn fire<T>(callbacks: &[Callback<T>], value: &T, kind: &'static str) {
    for (index, callback) in callbacks.iter().enumerate() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(value))) {
            error!(
                callback = kind,
                index,
                panic = panic_message(panic.as_ref()),
                "deferred callback panicked"
            );
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Read-only view of a [`DeferredObject`]: registration and queries, no
/// settling.
pub struct Promise<D, F, P = (), U = ()> {
    deferred: DeferredObject<D, F, P, U>,
}

impl<D, F, P, U> Clone for Promise<D, F, P, U> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<D, F, P, U> Promise<D, F, P, U>
where
    D: Send + Sync + 'static,
    F: Send + Sync + 'static,
    P: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    /// See [`DeferredObject::done`].
    pub fn done(&self, callback: impl Fn(&D) + Send + Sync + 'static) -> &Self {
        self.deferred.done(callback);
        self
    }

    /// See [`DeferredObject::fail`].
    pub fn fail(&self, callback: impl Fn(&F) + Send + Sync + 'static) -> &Self {
        self.deferred.fail(callback);
        self
    }

    /// See [`DeferredObject::progress`].
    pub fn progress(&self, callback: impl Fn(&P) + Send + Sync + 'static) -> &Self {
        self.deferred.progress(callback);
        self
    }

    /// See [`DeferredObject::up_progress`].
    pub fn up_progress(&self, callback: impl Fn(&U) + Send + Sync + 'static) -> &Self {
        self.deferred.up_progress(callback);
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.deferred.state()
    }

    /// Returns true while not settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.deferred.is_pending()
    }

    /// Returns true once resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.deferred.is_resolved()
    }

    /// Returns true once rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.deferred.is_rejected()
    }
}

impl<D, F, P, U> fmt::Debug for Promise<D, F, P, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Promise").field(&self.deferred).finish()
    }
}
