//! Client entry point.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tracing::{info, warn};

use crate::builder::RequestBuilder;
use crate::config::{ConfigError, SessionConfig};
use crate::dispatcher::Dispatcher;
use crate::filter::{RequestFilter, RequestInterceptor, ResponseFilter, ResponseInterceptor};
use crate::runner::{AsyncRunner, TokioRunner};
use crate::serialization::SerdesManager;
use crate::transport::{ReqwestTransport, Transport};

/// Failure to set up a [`Session`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// No tokio runtime is running on this thread.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[source] TryCurrentError),
}

/// Builds and dispatches requests.
///
/// A session bundles the configuration with the runner, transport and
/// serializers every request goes through. Any of them can be swapped at
/// construction time:
///
/// ```no_run
/// use requestor::{Session, SessionConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session::tokio(SessionConfig::default())?;
/// let request = session.req("https://example.com/api/items").get::<serde_json::Value>();
/// request.on_payload(|items| println!("{items}"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Session {
    config: SessionConfig,
    dispatcher: Dispatcher,
    default_headers: HeaderMap,
}

impl Session {
    /// Creates a session with the default serializers.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        runner: Arc<dyn AsyncRunner>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_serdes(config, runner, transport, SerdesManager::with_defaults())
    }

    /// Creates a session with custom serializers.
    #[must_use]
    pub fn with_serdes(
        config: SessionConfig,
        runner: Arc<dyn AsyncRunner>,
        transport: Arc<dyn Transport>,
        serdes: SerdesManager,
    ) -> Self {
        let mut default_headers = HeaderMap::new();
        match HeaderValue::from_str(&config.user_agent) {
            Ok(value) => {
                default_headers.insert(USER_AGENT, value);
            }
            Err(_) => warn!(user_agent = %config.user_agent, "ignoring invalid user agent"),
        }
        Self {
            config,
            dispatcher: Dispatcher::new(runner, transport, Arc::new(serdes)),
            default_headers,
        }
    }

    /// Creates a session on the current tokio runtime, sending over HTTP.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid, no runtime is running, or the
    /// HTTP client cannot be built.
    pub fn tokio(config: SessionConfig) -> Result<Self, SessionError> {
        let handle = Handle::try_current().map_err(SessionError::NoRuntime)?;
        Self::tokio_with_handle(config, handle)
    }

    /// Creates a session spawning onto `handle`, sending over HTTP.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the HTTP client cannot be
    /// built.
    pub fn tokio_with_handle(config: SessionConfig, handle: Handle) -> Result<Self, SessionError> {
        config.validate()?;
        let transport =
            ReqwestTransport::new(&config, handle.clone()).map_err(SessionError::Client)?;
        info!(
            connect_timeout_secs = config.connect_timeout.as_secs(),
            read_timeout_secs = config.read_timeout.as_secs(),
            "HTTP session ready"
        );
        Ok(Self::new(
            config,
            Arc::new(TokioRunner::new(handle)),
            Arc::new(transport),
        ))
    }

    /// Adds a header sent with every request of this session.
    #[must_use]
    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Adds a filter run on every request before its payload is serialized.
    #[must_use]
    pub fn with_request_filter(mut self, filter: impl RequestFilter + 'static) -> Self {
        self.dispatcher.processors_mut().add_request_filter(filter);
        self
    }

    /// Adds an interceptor run on every request after its payload is
    /// serialized.
    #[must_use]
    pub fn with_request_interceptor(
        mut self,
        interceptor: impl RequestInterceptor + 'static,
    ) -> Self {
        self.dispatcher
            .processors_mut()
            .add_request_interceptor(interceptor);
        self
    }

    /// Adds a filter run on every raw response before it is decoded.
    #[must_use]
    pub fn with_response_filter(mut self, filter: impl ResponseFilter + 'static) -> Self {
        self.dispatcher.processors_mut().add_response_filter(filter);
        self
    }

    /// Adds an interceptor run on every raw response after the response
    /// filters.
    #[must_use]
    pub fn with_response_interceptor(
        mut self,
        interceptor: impl ResponseInterceptor + 'static,
    ) -> Self {
        self.dispatcher
            .processors_mut()
            .add_response_interceptor(interceptor);
        self
    }

    /// Starts building a request to `uri`.
    #[must_use]
    pub fn req(&self, uri: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, uri.into())
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Headers added to every request.
    #[must_use]
    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// The dispatcher requests go through.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Shuts the runner down. Pending requests and requests dispatched
    /// afterwards are rejected with an abort error.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
