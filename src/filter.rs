//! Request and response processing hooks.
//!
//! A session runs its hooks in a fixed order around every exchange:
//!
//! - request filters see the request before its payload is serialized
//! - request interceptors see it after, with the encoded body in place
//! - response filters, then response interceptors, see the raw response
//!   before retry matching and payload decoding
//!
//! A hook that returns an error or panics rejects the request with an
//! abort-kind error. Request hooks run once per built request, not per retry
//! or polling cycle; response hooks run for every response received.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use crate::deferred::object::panic_message;
use crate::error::{BoxError, RequestError};
use crate::request::Request;
use crate::response::RawResponse;

/// Outcome of one hook.
pub type HookResult = Result<(), BoxError>;

/// Adjusts a request before its payload is serialized.
pub trait RequestFilter: Send + Sync {
    /// Modifies `request` in place.
    fn filter(&self, request: &mut Request) -> HookResult;
}

/// Adjusts a request after its payload is serialized.
pub trait RequestInterceptor: Send + Sync {
    /// Modifies `request` in place; its body is already encoded.
    fn intercept(&self, request: &mut Request) -> HookResult;
}

/// Adjusts a raw response before it is decoded.
pub trait ResponseFilter: Send + Sync {
    /// Modifies `response` to `request` in place.
    fn filter(&self, request: &Request, response: &mut RawResponse) -> HookResult;
}

/// Adjusts a raw response after the response filters ran.
pub trait ResponseInterceptor: Send + Sync {
    /// Modifies `response` to `request` in place.
    fn intercept(&self, request: &Request, response: &mut RawResponse) -> HookResult;
}

impl<F> RequestFilter for F
where
    F: Fn(&mut Request) -> HookResult + Send + Sync,
{
    fn filter(&self, request: &mut Request) -> HookResult {
        self(request)
    }
}

impl<F> RequestInterceptor for F
where
    F: Fn(&mut Request) -> HookResult + Send + Sync,
{
    fn intercept(&self, request: &mut Request) -> HookResult {
        self(request)
    }
}

impl<F> ResponseFilter for F
where
    F: Fn(&Request, &mut RawResponse) -> HookResult + Send + Sync,
{
    fn filter(&self, request: &Request, response: &mut RawResponse) -> HookResult {
        self(request, response)
    }
}

impl<F> ResponseInterceptor for F
where
    F: Fn(&Request, &mut RawResponse) -> HookResult + Send + Sync,
{
    fn intercept(&self, request: &Request, response: &mut RawResponse) -> HookResult {
        self(request, response)
    }
}

/// Ordered hook lists of a session.
#[derive(Clone, Default)]
pub struct Processors {
    request_filters: Vec<Arc<dyn RequestFilter>>,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_filters: Vec<Arc<dyn ResponseFilter>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
}

impl Processors {
    /// Creates empty hook lists.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request filter.
    pub fn add_request_filter(&mut self, filter: impl RequestFilter + 'static) {
        self.request_filters.push(Arc::new(filter));
    }

    /// Appends a request interceptor.
    pub fn add_request_interceptor(&mut self, interceptor: impl RequestInterceptor + 'static) {
        self.request_interceptors.push(Arc::new(interceptor));
    }

    /// Appends a response filter.
    pub fn add_response_filter(&mut self, filter: impl ResponseFilter + 'static) {
        self.response_filters.push(Arc::new(filter));
    }

    /// Appends a response interceptor.
    pub fn add_response_interceptor(&mut self, interceptor: impl ResponseInterceptor + 'static) {
        self.response_interceptors.push(Arc::new(interceptor));
    }

    /// True when no hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.request_filters.is_empty()
            && self.request_interceptors.is_empty()
            && self.response_filters.is_empty()
            && self.response_interceptors.is_empty()
    }

    pub(crate) fn filter_request(&self, request: &mut Request) -> Result<(), RequestError> {
        for filter in &self.request_filters {
            let uri = request.uri().to_string();
            guarded(&uri, "request filter", || filter.filter(request))?;
        }
        Ok(())
    }

    pub(crate) fn intercept_request(&self, request: &mut Request) -> Result<(), RequestError> {
        for interceptor in &self.request_interceptors {
            let uri = request.uri().to_string();
            guarded(&uri, "request interceptor", || interceptor.intercept(request))?;
        }
        Ok(())
    }

    pub(crate) fn process_response(
        &self,
        request: &Request,
        response: &mut RawResponse,
    ) -> Result<(), RequestError> {
        for filter in &self.response_filters {
            guarded(request.uri(), "response filter", || {
                filter.filter(request, response)
            })?;
        }
        for interceptor in &self.response_interceptors {
            guarded(request.uri(), "response interceptor", || {
                interceptor.intercept(request, response)
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Processors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processors")
            .field("request_filters", &self.request_filters.len())
            .field("request_interceptors", &self.request_interceptors.len())
            .field("response_filters", &self.response_filters.len())
            .field("response_interceptors", &self.response_interceptors.len())
            .finish()
    }
}

fn guarded(uri: &str, stage: &str, hook: impl FnOnce() -> HookResult) -> Result<(), RequestError> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(RequestError::abort_with(uri, format!("{stage} failed"), source)),
        Err(panic) => {
            let message = panic_message(panic.as_ref()).to_string();
            error!(uri, stage, panic = %message, "processing hook panicked");
            Err(RequestError::abort(uri, format!("{stage} panicked: {message}")))
        }
    }
}
