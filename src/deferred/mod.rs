//! The deferred/promise core.
//!
//! - [`DeferredObject`] is the generic single-assignment state machine.
//! - [`DeferredRequest`] layers the named HTTP callbacks and retry
//!   interception over it, for one dispatch cycle.
//! - [`PollingRequest`] is the caller-visible handle; it delegates to the
//!   latest cycle's deferred.
//! - [`ResponseFuture`] is the blocking adapter.
//! - [`Connection`] is the cancellable handle of one transport attempt.

mod connection;
mod future;
pub(crate) mod object;
pub(crate) mod polling;
mod request;

use std::fmt;

pub use connection::Connection;
pub use future::{ResponseFuture, Settled};
pub use object::{DeferredObject, Promise};
pub use polling::PollingRequest;
pub use request::{DeferredRequest, Outcome};

pub(crate) use connection::ResponseSink;

/// Lifecycle state of a deferred. Transitions are one-way out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with a rejection.
    Rejected,
}

impl State {
    /// Returns true for `Resolved` and `Rejected`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        })
    }
}
