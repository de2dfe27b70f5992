//! Retry policy and the per-cycle retry coordinator.
//!
//! A [`RetryPolicy`] is a delay sequence plus a set of trigger
//! [`RequestEvent`]s. Each outcome of an attempt produces its occurred events
//! (see [`RequestEvent::from_status`] and [`RequestEvent::from_error`]); when
//! a trigger is among them and the sequence still has a delay for the next
//! attempt, the outcome is swallowed and the request is sent again.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use requestor::{DelaySequence, RequestEvent, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(DelaySequence::fixed(&[1, 2]), [RequestEvent::Timeout]);
//! let occurred = [RequestEvent::Error, RequestEvent::Timeout];
//!
//! match policy.should_retry(&occurred, 0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(1));
//!         assert_eq!(attempt, 1);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("{reason}"),
//! }
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::event::RequestEvent;

/// Builders for delay sequences. Second-based factories yield
/// millisecond-precision durations.
#[derive(Debug, Clone, Copy)]
pub struct DelaySequence;

impl DelaySequence {
    /// One delay per listed second value.
    #[must_use]
    pub fn fixed(seconds: &[u64]) -> Vec<Duration> {
        seconds.iter().map(|&secs| Duration::from_secs(secs)).collect()
    }

    /// One delay per listed millisecond value.
    #[must_use]
    pub fn millis(millis: &[u64]) -> Vec<Duration> {
        millis.iter().map(|&ms| Duration::from_millis(ms)).collect()
    }

    /// `limit` delays starting at `initial_secs`, each `difference` seconds
    /// longer than the previous.
    #[must_use]
    pub fn arithmetic(initial_secs: u64, difference: u64, limit: usize) -> Vec<Duration> {
        let mut delay = initial_secs;
        (0..limit)
            .map(|_| {
                let current = Duration::from_secs(delay);
                delay = delay.saturating_add(difference);
                current
            })
            .collect()
    }

    /// `limit` delays starting at `initial_secs`, each `ratio` times the
    /// previous.
    #[must_use]
    pub fn geometric(initial_secs: u64, ratio: u64, limit: usize) -> Vec<Duration> {
        let mut delay = initial_secs;
        (0..limit)
            .map(|_| {
                let current = Duration::from_secs(delay);
                delay = delay.saturating_mul(ratio);
                current
            })
            .collect()
    }
}

/// Decision on whether to retry an attempt's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send again after the delay.
    Retry {
        /// How long to wait before resending.
        delay: Duration,
        /// Retry count once this retry is scheduled (first retry is 1).
        attempt: u32,
    },

    /// Let the outcome through.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Delay sequence plus trigger events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
    events: Vec<RequestEvent>,
    jitter: Duration,
}

impl RetryPolicy {
    /// Creates a policy retrying on any of `events`, once per delay.
    #[must_use]
    pub fn new(delays: Vec<Duration>, events: impl IntoIterator<Item = RequestEvent>) -> Self {
        Self {
            delays,
            events: events.into_iter().collect(),
            jitter: Duration::ZERO,
        }
    }

    /// Adds a random jitter between zero and `max` to every scheduled delay.
    #[must_use]
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.jitter = max;
        self
    }

    /// The delay sequence.
    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// The trigger events.
    #[must_use]
    pub fn events(&self) -> &[RequestEvent] {
        &self.events
    }

    /// Maximum number of retries.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        u32::try_from(self.delays.len()).unwrap_or(u32::MAX)
    }

    /// Returns true when a trigger is among the occurred events.
    #[must_use]
    pub fn matches(&self, occurred: &[RequestEvent]) -> bool {
        self.events
            .iter()
            .any(|trigger| occurred.iter().any(|event| trigger.includes(*event)))
    }

    /// Decides whether to retry given the occurred events and the number of
    /// retries already scheduled.
    ///
    /// Triggers are matched first; an exhausted sequence always lets the
    /// outcome through.
    #[instrument(skip(self), fields(max_retries = self.delays.len()))]
    pub fn should_retry(&self, occurred: &[RequestEvent], retries: u32) -> RetryDecision {
        if !self.matches(occurred) {
            return RetryDecision::DoNotRetry {
                reason: "no retry trigger matched".to_string(),
            };
        }

        let Some(base) = usize::try_from(retries)
            .ok()
            .and_then(|index| self.delays.get(index))
        else {
            debug!(retries, "delay sequence exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("delay sequence exhausted after {retries} retries"),
            };
        };

        let delay = *base + self.calculate_jitter();
        debug!(
            retries,
            next_attempt = retries + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: retries + 1,
        }
    }

    fn calculate_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Retry coordinator of one dispatch cycle.
///
/// Holds the retry counter, which only moves when a retry is actually
/// scheduled.
#[derive(Debug)]
pub struct RequestRetrier {
    policy: RetryPolicy,
    retries: AtomicU32,
}

impl RequestRetrier {
    /// Creates a coordinator with a zero count.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retries: AtomicU32::new(0),
        }
    }

    /// The policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retries scheduled so far.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    /// Claims the next retry for an outcome producing `occurred`.
    ///
    /// Returns the delay to wait before resending, or `None` when the outcome
    /// must be delivered. Concurrent callers never claim the same slot.
    pub fn claim(&self, occurred: &[RequestEvent]) -> Option<Duration> {
        loop {
            let current = self.retries.load(Ordering::SeqCst);
            match self.policy.should_retry(occurred, current) {
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, retries = current, "outcome delivered");
                    return None;
                }
                RetryDecision::Retry { delay, attempt } => {
                    if self
                        .retries
                        .compare_exchange(current, attempt, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        return Some(delay);
                    }
                }
            }
        }
    }
}
