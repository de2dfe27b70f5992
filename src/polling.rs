//! Polling configuration and the per-request polling counter.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tracing::debug;

/// Shortest wait between two polling cycles.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(10);

/// When the next polling cycle is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollingStrategy {
    /// Armed as soon as the current cycle has its response headers (or
    /// settles without them). The interval runs from that point.
    Short,
    /// Armed when the current cycle loads a response. A rejection ends polling.
    Long,
}

impl fmt::Display for PollingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Short => "short",
            Self::Long => "long",
        })
    }
}

impl FromStr for PollingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "long" => Ok(Self::Long),
            other => Err(format!("unknown polling strategy '{other}' (expected short or long)")),
        }
    }
}

/// Polling settings attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    strategy: PollingStrategy,
    interval: Duration,
    limit: Option<u32>,
}

impl PollingPolicy {
    /// Polls without a cycle limit.
    #[must_use]
    pub fn new(strategy: PollingStrategy, interval: Duration) -> Self {
        Self {
            strategy,
            interval,
            limit: None,
        }
    }

    /// Caps the number of cycles. Zero means no limit.
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    /// Strategy.
    #[must_use]
    pub fn strategy(&self) -> PollingStrategy {
        self.strategy
    }

    /// Configured interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Cycle limit, if any.
    #[must_use]
    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Wait before the next cycle; never shorter than [`MIN_POLLING_INTERVAL`].
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        self.interval.max(MIN_POLLING_INTERVAL)
    }
}

/// Shared polling counter of one logical request.
///
/// The count goes up once per dispatched cycle. Polling stays active while
/// the count is below the limit and [`stop`](Self::stop) was not called.
#[derive(Debug)]
pub struct PollingState {
    policy: Option<PollingPolicy>,
    count: AtomicU32,
    active: AtomicBool,
}

impl PollingState {
    /// Creates the counter for a request; inactive when `policy` is `None`.
    #[must_use]
    pub fn new(policy: Option<PollingPolicy>) -> Self {
        Self {
            policy,
            count: AtomicU32::new(0),
            active: AtomicBool::new(policy.is_some()),
        }
    }

    /// Configured policy.
    #[must_use]
    pub fn policy(&self) -> Option<PollingPolicy> {
        self.policy
    }

    /// Records one dispatched cycle and returns the new count.
    pub fn increment(&self) -> u32 {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.policy.and_then(|policy| policy.limit) {
            if count >= limit {
                debug!(count, limit, "polling limit reached");
                self.active.store(false, Ordering::SeqCst);
            }
        }
        count
    }

    /// Cycles dispatched so far.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// True while another cycle may be armed.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Prevents further cycles; the cycle in flight is unaffected.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
