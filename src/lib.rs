//! Requestor Core Library
//!
//! An HTTP request client with fluent request building, content negotiation,
//! pluggable serialization and a deferred/promise core for delivering
//! results.
//!
//! # Architecture
//!
//! - [`deferred`] - the single-assignment deferred, the named callback
//!   facade, polling handles, blocking futures and connection handles
//! - [`retry`] / [`polling`] - retry policies and polling configuration
//! - [`dispatcher`] - control flow from a built request to its handle
//! - [`filter`] - request/response filters and interceptors
//! - [`runner`] - scheduling abstraction (tokio-backed or cooperative)
//! - [`transport`] - the transport seam and its reqwest adapter
//! - [`serialization`] - media-type negotiated serializers
//! - [`session`] / [`builder`] - the client entry point
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use requestor::{DelaySequence, RequestEvent, Session, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::tokio(SessionConfig::default())?;
//! let request = session
//!     .req("https://example.com/jobs/42")
//!     .timeout(Duration::from_secs(5))
//!     .retry(DelaySequence::fixed(&[1, 2, 4]), [RequestEvent::Timeout, RequestEvent::Status(503)])
//!     .get::<serde_json::Value>();
//!
//! request
//!     .on_payload(|job| println!("job: {job}"))
//!     .on_timeout(|error| eprintln!("gave up: {error}"));
//!
//! let outcome = request.settled().await;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod config;
pub mod deferred;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod filter;
pub mod polling;
pub mod request;
pub mod response;
pub mod retry;
pub mod runner;
pub mod serialization;
pub mod session;
pub mod status;
pub mod transport;

mod user_agent;

// Re-export commonly used types
pub use builder::RequestBuilder;
pub use config::{ConfigError, SessionConfig};
pub use deferred::{
    Connection, DeferredObject, DeferredRequest, Outcome, PollingRequest, Promise,
    ResponseFuture, Settled, State,
};
pub use dispatcher::Dispatcher;
pub use error::{DeferredError, ErrorKind, FutureError, RequestError};
pub use event::RequestEvent;
pub use filter::{
    HookResult, Processors, RequestFilter, RequestInterceptor, ResponseFilter, ResponseInterceptor,
};
pub use polling::{PollingPolicy, PollingStrategy};
pub use request::Request;
pub use response::{Progress, RawResponse, ReadProgress, Response, ResponseHead, WriteProgress};
pub use retry::{DelaySequence, RequestRetrier, RetryDecision, RetryPolicy};
pub use runner::{AsyncRunner, CondvarLock, LocalRunner, Lock, TokioRunner};
pub use serialization::{SerdesError, SerdesManager};
pub use session::{Session, SessionError};
pub use status::StatusFamily;
pub use transport::{Attempt, ReqwestTransport, Reply, ScriptedTransport, Transport};
