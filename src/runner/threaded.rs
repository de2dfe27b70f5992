//! Multi-threaded runner on top of a tokio runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::runtime::{Handle, TryCurrentError};
use tracing::{debug, trace};

use super::{AsyncRunner, CondvarLock, Lock, Task};

/// [`AsyncRunner`] that spawns tasks on a tokio runtime.
///
/// Delays use `tokio::time::sleep`, and every deferred gets a
/// [`CondvarLock`], so `get()` on a response future genuinely blocks the
/// calling thread. Do not block a runtime worker on a response; call the
/// blocking API from a plain thread or `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct TokioRunner {
    handle: Handle,
    shutdown: Arc<AtomicBool>,
}

impl TokioRunner {
    /// Creates a runner spawning onto the given runtime.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a runner for the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside of a tokio runtime.
    pub fn current() -> Result<Self, TryCurrentError> {
        Ok(Self::new(Handle::try_current()?))
    }

    /// Returns the runtime handle tasks are spawned on.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl AsyncRunner for TokioRunner {
    fn run(&self, task: Task, delay: Duration) {
        if self.is_shutdown() {
            debug!("runner is shut down; dropping task");
            return;
        }

        let shutdown = Arc::clone(&self.shutdown);
        self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if shutdown.load(Ordering::SeqCst) {
                trace!("runner shut down while task was waiting; skipping");
                return;
            }
            task();
        });
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn new_lock(&self) -> Arc<dyn Lock> {
        Arc::new(CondvarLock::new())
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
