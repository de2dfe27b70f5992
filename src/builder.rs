//! Fluent request builder.

use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::deferred::PollingRequest;
use crate::error::RequestError;
use crate::event::RequestEvent;
use crate::polling::{PollingPolicy, PollingStrategy};
use crate::request::Request;
use crate::retry::RetryPolicy;
use crate::session::Session;

enum Body {
    Raw(Bytes),
    Payload(Value),
}

/// Builds one request and dispatches it with a terminal verb.
///
/// Invalid input (a malformed header, a payload that cannot be serialized)
/// does not fail the builder; the returned handle rejects with an
/// abort-kind error instead, like any other pre-send failure.
#[must_use = "a request is only sent by a terminal verb such as `get`"]
pub struct RequestBuilder<'a> {
    session: &'a Session,
    request: Request,
    body: Option<Body>,
    invalid: Option<String>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(session: &'a Session, uri: String) -> Self {
        let config = session.config();
        let mut request = Request::new(Method::GET, uri);
        request.headers = session.default_headers().clone();
        request.timeout = config.request_timeout;
        request.delay = config.request_delay;

        let builder = Self {
            session,
            request,
            body: None,
            invalid: None,
        };
        let media_type = config.media_type.clone();
        builder.accept(&media_type)
    }

    /// Sets a header, replacing any previous value.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.request.headers.insert(name, value);
            }
            _ => {
                debug!(name, value, "invalid header");
                self.invalid
                    .get_or_insert_with(|| format!("invalid header '{name}: {value}'"));
            }
        }
        self
    }

    /// Sets the `Accept` header.
    pub fn accept(self, media_type: &str) -> Self {
        self.header(ACCEPT.as_str(), media_type)
    }

    /// Sets the `Content-Type` header.
    pub fn content_type(self, media_type: &str) -> Self {
        self.header(CONTENT_TYPE.as_str(), media_type)
    }

    /// Sets a payload, serialized for the request's `Content-Type` at send
    /// time.
    pub fn payload<P: Serialize + ?Sized>(mut self, payload: &P) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => self.body = Some(Body::Payload(value)),
            Err(e) => {
                self.invalid
                    .get_or_insert_with(|| format!("cannot serialize payload: {e}"));
            }
        }
        self
    }

    /// Sets a pre-encoded body, sent as is.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(Body::Raw(body.into()));
        self
    }

    /// Per-attempt deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Removes the deadline, including the session default.
    pub fn no_timeout(mut self) -> Self {
        self.request.timeout = None;
        self
    }

    /// Wait before each dispatch cycle.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.request.delay = delay;
        self
    }

    /// Retries on any of `events`, once per delay.
    pub fn retry(
        self,
        delays: Vec<Duration>,
        events: impl IntoIterator<Item = RequestEvent>,
    ) -> Self {
        self.retry_policy(RetryPolicy::new(delays, events))
    }

    /// Sets a fully configured retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.request.retry = Some(policy);
        self
    }

    /// Polls with `strategy` every `interval`, for at most `limit` cycles
    /// (0 polls until stopped).
    pub fn poll(mut self, strategy: PollingStrategy, interval: Duration, limit: u32) -> Self {
        self.request.polling = Some(PollingPolicy::new(strategy, interval).with_limit(limit));
        self
    }

    /// Sends a GET.
    pub fn get<T>(self) -> PollingRequest<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.send(Method::GET)
    }

    /// Sends a POST.
    pub fn post<T>(self) -> PollingRequest<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.send(Method::POST)
    }

    /// Sends a PUT.
    pub fn put<T>(self) -> PollingRequest<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.send(Method::PUT)
    }

    /// Sends a PATCH.
    pub fn patch<T>(self) -> PollingRequest<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.send(Method::PATCH)
    }

    /// Sends a DELETE.
    pub fn delete<T>(self) -> PollingRequest<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.send(Method::DELETE)
    }

    /// Sends a HEAD.
    pub fn head<T>(self) -> PollingRequest<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.send(Method::HEAD)
    }

    /// Sends an OPTIONS.
    pub fn options<T>(self) -> PollingRequest<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.send(Method::OPTIONS)
    }

    /// Sends with an arbitrary method.
    pub fn send<T>(self, method: Method) -> PollingRequest<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let dispatcher = self.session.dispatcher();
        let mut request = self.request;
        request.method = method;

        if let Some(message) = self.invalid {
            let error = RequestError::abort(request.uri(), message);
            return dispatcher.reject_unsent(request, error);
        }
        if let Err(error) = dispatcher.processors().filter_request(&mut request) {
            return dispatcher.reject_unsent(request, error);
        }

        match self.body {
            None => {}
            Some(Body::Raw(bytes)) => request.body = Some(bytes),
            Some(Body::Payload(value)) => {
                if request.content_type().is_none() {
                    let media_type = &self.session.config().media_type;
                    if let Ok(value) = HeaderValue::from_str(media_type) {
                        request.headers.insert(CONTENT_TYPE, value);
                    }
                }
                let media_type = request
                    .content_type()
                    .unwrap_or(self.session.config().media_type.as_str())
                    .to_string();
                match dispatcher.serdes().encode(&value, &media_type) {
                    Ok(bytes) => request.body = Some(bytes),
                    Err(e) => {
                        let error =
                            RequestError::abort_with(request.uri(), "cannot serialize payload", e);
                        return dispatcher.reject_unsent(request, error);
                    }
                }
            }
        }

        if let Err(error) = dispatcher.processors().intercept_request(&mut request) {
            return dispatcher.reject_unsent(request, error);
        }
        dispatcher.dispatch(request)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::SessionConfig;
    use crate::error::ErrorKind;
    use crate::runner::{AsyncRunner, LocalRunner};
    use crate::transport::{Reply, ScriptedTransport};

    fn session(config: SessionConfig) -> (LocalRunner, Arc<ScriptedTransport>, Session) {
        let runner = LocalRunner::new();
        let shared: Arc<dyn AsyncRunner> = Arc::new(runner.clone());
        let transport = Arc::new(ScriptedTransport::new(Arc::clone(&shared)));
        let session = Session::new(config, shared, transport.clone());
        (runner, transport, session)
    }

    // ==================== Defaults ====================

    #[test]
    fn test_defaults_come_from_session_config() {
        let config = SessionConfig {
            request_timeout: Some(Duration::from_secs(2)),
            request_delay: Duration::from_millis(5),
            media_type: "text/plain".to_string(),
            ..SessionConfig::default()
        };
        let (_runner, _transport, session) = session(config);

        let request = session.req("http://svc/a").get::<Value>();
        let sent = request.request();

        assert_eq!(sent.method(), &Method::GET);
        assert_eq!(sent.accept(), Some("text/plain"));
        assert_eq!(sent.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(sent.delay(), Duration::from_millis(5));
        assert!(sent.header("user-agent").unwrap().starts_with("requestor/"));
    }

    #[test]
    fn test_no_timeout_clears_session_default() {
        let config = SessionConfig {
            request_timeout: Some(Duration::from_secs(2)),
            ..SessionConfig::default()
        };
        let (_runner, _transport, session) = session(config);

        let request = session.req("http://svc/a").no_timeout().delete::<Value>();

        assert_eq!(request.request().timeout(), None);
        assert_eq!(request.request().method(), &Method::DELETE);
    }

    #[test]
    fn test_retry_and_poll_are_recorded() {
        let (_runner, _transport, session) = session(SessionConfig::default());

        let request = session
            .req("http://svc/a")
            .retry(vec![Duration::from_millis(10)], [RequestEvent::Timeout])
            .poll(PollingStrategy::Long, Duration::from_millis(50), 4)
            .get::<Value>();

        let retry = request.request().retry_policy().unwrap();
        assert_eq!(retry.max_retries(), 1);
        let polling = request.request().polling_policy().unwrap();
        assert_eq!(polling.strategy(), PollingStrategy::Long);
        assert_eq!(polling.limit(), Some(4));
    }

    // ==================== Bodies ====================

    #[test]
    fn test_form_payload_follows_content_type() {
        let (runner, transport, session) = session(SessionConfig::default());
        transport.push(Reply::status(200));

        let _request = session
            .req("http://svc/search")
            .content_type("application/x-www-form-urlencoded")
            .payload(&json!({"q": "rust"}))
            .post::<Value>();
        runner.run_until_idle();

        let sent = transport.requests();
        assert_eq!(sent[0].body().unwrap().as_ref(), b"q=rust");
    }

    #[test]
    fn test_raw_body_is_sent_as_is() {
        let (runner, transport, session) = session(SessionConfig::default());
        transport.push(Reply::status(200));

        let _request = session
            .req("http://svc/raw")
            .body("<ping/>")
            .put::<Value>();
        runner.run_until_idle();

        let sent = transport.requests();
        assert_eq!(sent[0].body().unwrap().as_ref(), b"<ping/>");
        assert_eq!(sent[0].content_type(), None);
    }

    #[test]
    fn test_unserializable_payload_aborts() {
        let (runner, transport, session) = session(SessionConfig::default());

        let request = session
            .req("http://svc/search")
            .content_type("application/x-www-form-urlencoded")
            .payload(&json!({"nested": {"a": 1}}))
            .post::<Value>();
        runner.run_until_idle();

        assert_eq!(request.current().error().unwrap().kind(), ErrorKind::Abort);
        assert_eq!(transport.sent(), 0);
    }
}
