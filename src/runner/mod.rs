//! Scheduling abstraction shared by the deferred core.
//!
//! The deferred, retry and polling logic never touch threads or timers
//! directly. They go through an [`AsyncRunner`], which provides:
//!
//! - schedule-after-delay ([`AsyncRunner::run`])
//! - sleep ([`AsyncRunner::sleep`])
//! - a [`Lock`] per deferred, used by blocking waiters
//!
//! Two runners ship with the crate:
//!
//! - [`TokioRunner`] - multi-threaded; tasks run on a tokio runtime and
//!   [`CondvarLock`] really blocks the waiting thread.
//! - [`LocalRunner`] - cooperative and single-threaded with a virtual clock;
//!   delays are simulated and its lock drives the task queue instead of
//!   blocking.

mod local;
mod threaded;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub use local::LocalRunner;
pub use threaded::TokioRunner;

/// A unit of work handed to a runner.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executes tasks after a delay and hands out wait locks.
pub trait AsyncRunner: Send + Sync {
    /// Schedules `task` to run once `delay` has elapsed.
    fn run(&self, task: Task, delay: Duration);

    /// Suspends the caller for `duration`.
    fn sleep(&self, duration: Duration);

    /// Current time on this runner's clock.
    fn now(&self) -> Instant;

    /// Creates a fresh lock for one deferred.
    fn new_lock(&self) -> Arc<dyn Lock>;

    /// Stops accepting new tasks. Tasks already scheduled are dropped when due.
    fn shutdown(&self);

    /// Returns true after [`shutdown`](Self::shutdown).
    fn is_shutdown(&self) -> bool;
}

/// Wait/notify primitive attached to a deferred.
///
/// A lock is signalled once, when its deferred settles; the signal is
/// sticky, so a waiter arriving after the signal returns immediately.
pub trait Lock: Send + Sync {
    /// Waits until signalled or until `timeout` elapses (`None` waits without
    /// bound). Callers must re-check their condition after it returns.
    ///
    /// Returns `false` when the lock can tell that no signal can ever arrive,
    /// e.g. a cooperative runner with an empty task queue.
    fn await_for(&self, timeout: Option<Duration>) -> bool;

    /// Wakes every current and future waiter.
    fn signal_all(&self);

    /// Returns true while at least one thread is waiting.
    fn is_awaiting(&self) -> bool;
}

/// Blocking [`Lock`] backed by a `parking_lot` condition variable.
#[derive(Debug, Default)]
pub struct CondvarLock {
    signalled: Mutex<bool>,
    condvar: Condvar,
    awaiting: AtomicUsize,
}

impl CondvarLock {
    /// Creates an unsignalled lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lock for CondvarLock {
    fn await_for(&self, timeout: Option<Duration>) -> bool {
        let mut signalled = self.signalled.lock();
        if *signalled {
            return true;
        }

        self.awaiting.fetch_add(1, Ordering::SeqCst);
        match timeout {
            None => {
                while !*signalled {
                    self.condvar.wait(&mut signalled);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*signalled {
                    if self
                        .condvar
                        .wait_until(&mut signalled, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }
        }
        self.awaiting.fetch_sub(1, Ordering::SeqCst);
        true
    }

    fn signal_all(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.condvar.notify_all();
    }

    fn is_awaiting(&self) -> bool {
        self.awaiting.load(Ordering::SeqCst) > 0
    }
}
