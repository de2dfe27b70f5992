//! Cooperative single-threaded runner with a virtual clock.
//!
//! Nothing runs in the background: tasks sit in a queue ordered by due time
//! until the owner drives them with [`LocalRunner::run_next`],
//! [`LocalRunner::run_until_idle`] or [`LocalRunner::advance`]. Delays move
//! the virtual clock instead of sleeping, which keeps retry and polling
//! schedules deterministic and instantaneous under test.
//!
//! Blocking waits are emulated: a [`Lock`] handed out by this runner drives
//! the queue itself until it is signalled, its deadline passes on the virtual
//! clock, or the queue runs dry.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use super::{AsyncRunner, Lock, Task};

/// Cooperative [`AsyncRunner`] for event-loop style embedding and tests.
///
/// Cloning yields another handle to the same queue and clock.
#[derive(Clone)]
pub struct LocalRunner {
    shared: Arc<Shared>,
}

struct Shared {
    origin: Instant,
    queue: Mutex<Queue>,
    shutdown: AtomicBool,
}

#[derive(Default)]
struct Queue {
    elapsed: Duration,
    next_seq: u64,
    entries: BinaryHeap<Entry>,
}

struct Entry {
    due: Duration,
    seq: u64,
    task: Task,
}

// Reversed so the std max-heap pops the earliest (due, seq) first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRunner {
    /// Creates a runner with an empty queue, its clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                origin: Instant::now(),
                queue: Mutex::new(Queue::default()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Virtual time elapsed since the runner was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.shared.queue.lock().elapsed
    }

    /// Number of tasks waiting in the queue.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }

    /// Runs the earliest queued task, moving the clock forward to its due
    /// time. Returns false when the queue is empty.
    pub fn run_next(&self) -> bool {
        self.shared.run_next(None)
    }

    /// Runs tasks until the queue is empty and returns how many ran.
    ///
    /// Unbounded polling re-arms itself forever; stop it or use
    /// [`advance`](Self::advance) instead.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Runs every task due within `duration` from now, then sets the clock
    /// to exactly `now + duration`. Returns how many tasks ran.
    pub fn advance(&self, duration: Duration) -> usize {
        let target = self.elapsed() + duration;
        let mut ran = 0;
        while self.shared.run_next(Some(target)) {
            ran += 1;
        }
        self.shared.move_clock_to(target);
        ran
    }
}

impl Shared {
    fn run_next(&self, limit: Option<Duration>) -> bool {
        let task = {
            let mut queue = self.queue.lock();
            let due = match queue.entries.peek() {
                Some(entry) => entry.due,
                None => return false,
            };
            if limit.is_some_and(|limit| due > limit) {
                return false;
            }
            let Some(entry) = queue.entries.pop() else {
                return false;
            };
            queue.elapsed = queue.elapsed.max(entry.due);
            entry.task
        };

        if self.shutdown.load(Ordering::SeqCst) {
            trace!("local runner shut down; discarding task");
        } else {
            task();
        }
        true
    }

    fn move_clock_to(&self, target: Duration) {
        let mut queue = self.queue.lock();
        queue.elapsed = queue.elapsed.max(target);
    }

    fn next_due(&self) -> Option<Duration> {
        self.queue.lock().entries.peek().map(|entry| entry.due)
    }

    fn elapsed(&self) -> Duration {
        self.queue.lock().elapsed
    }
}

impl AsyncRunner for LocalRunner {
    fn run(&self, task: Task, delay: Duration) {
        if self.is_shutdown() {
            return;
        }
        let mut queue = self.shared.queue.lock();
        let due = queue.elapsed + delay;
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.entries.push(Entry { due, seq, task });
    }

    fn sleep(&self, duration: Duration) {
        let target = self.elapsed() + duration;
        self.shared.move_clock_to(target);
    }

    fn now(&self) -> Instant {
        self.shared.origin + self.elapsed()
    }

    fn new_lock(&self) -> Arc<dyn Lock> {
        Arc::new(LocalLock {
            runner: Arc::downgrade(&self.shared),
            signalled: AtomicBool::new(false),
            awaiting: AtomicUsize::new(0),
        })
    }

    fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.queue.lock().entries.clear();
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LocalRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("LocalRunner")
            .field("elapsed", &queue.elapsed)
            .field("pending_tasks", &queue.entries.len())
            .finish_non_exhaustive()
    }
}

/// Lock that waits by running queued tasks on the owning [`LocalRunner`].
struct LocalLock {
    runner: Weak<Shared>,
    signalled: AtomicBool,
    awaiting: AtomicUsize,
}

impl LocalLock {
    fn drive(&self, runner: &Shared, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| runner.elapsed() + timeout);
        loop {
            if self.signalled.load(Ordering::SeqCst) {
                return true;
            }
            let Some(due) = runner.next_due() else {
                return false;
            };
            if let Some(deadline) = deadline.filter(|deadline| due > *deadline) {
                runner.move_clock_to(deadline);
                return true;
            }
            runner.run_next(deadline);
        }
    }
}

impl Lock for LocalLock {
    fn await_for(&self, timeout: Option<Duration>) -> bool {
        if self.signalled.load(Ordering::SeqCst) {
            return true;
        }
        let Some(runner) = self.runner.upgrade() else {
            return false;
        };

        self.awaiting.fetch_add(1, Ordering::SeqCst);
        let live = self.drive(&runner, timeout);
        self.awaiting.fetch_sub(1, Ordering::SeqCst);
        live
    }

    fn signal_all(&self) {
        self.signalled.store(true, Ordering::SeqCst);
    }

    fn is_awaiting(&self) -> bool {
        self.awaiting.load(Ordering::SeqCst) > 0
    }
}
