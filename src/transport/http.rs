//! HTTP transport over `reqwest`.
//!
//! Each attempt runs as one tokio task that sends the request, reports the
//! response head, streams the body while reporting download progress, then
//! resolves. Cancelling or expiring the attempt's connection aborts the task.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder};
use tokio::runtime::Handle;
use tracing::{debug, instrument};
use url::Url;

use super::{Attempt, Transport};
use crate::config::SessionConfig;
use crate::error::RequestError;
use crate::response::{RawResponse, ReadProgress, ResponseHead, WriteProgress};

/// [`Transport`] backed by a pooled `reqwest` client.
///
/// Create it once per session; the underlying client reuses connections.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    handle: Handle,
    read_timeout: Duration,
}

impl ReqwestTransport {
    /// Builds a transport from session settings; attempts are spawned on
    /// `handle`.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error when the client cannot be built (for
    /// example, no TLS backend available).
    #[instrument(level = "debug", skip(config, handle))]
    pub fn new(config: &SessionConfig, handle: Handle) -> Result<Self, reqwest::Error> {
        let client = base_client_builder(config).build()?;
        Ok(Self {
            client,
            handle,
            read_timeout: config.read_timeout,
        })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: Client, handle: Handle) -> Self {
        Self {
            client,
            handle,
            read_timeout: Duration::from_secs(super::READ_TIMEOUT_SECS),
        }
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, attempt: Attempt) {
        let connection = attempt.connection().clone();
        let task = self
            .handle
            .spawn(exchange(self.client.clone(), attempt, self.read_timeout));
        let abort = task.abort_handle();
        connection.on_abort(move || abort.abort());
    }
}

fn base_client_builder(config: &SessionConfig) -> ClientBuilder {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.read_timeout)
        .gzip(true)
        .cookie_store(true)
        .user_agent(config.user_agent.clone())
}

#[instrument(level = "debug", skip_all, fields(method = %attempt.request().method(), uri = %attempt.request().uri()))]
async fn exchange(client: Client, attempt: Attempt, read_timeout: Duration) {
    let request = Arc::clone(attempt.request());
    let uri = request.uri();

    let url = match Url::parse(uri) {
        Ok(url) => url,
        Err(e) => {
            attempt.reject(RequestError::abort_with(uri, "invalid request URI", e));
            return;
        }
    };

    let mut builder = client
        .request(request.method().clone(), url)
        .headers(request.headers().clone());
    let upload = request.body().map_or(0, |body| body.len() as u64);
    if let Some(body) = request.body() {
        builder = builder.body(body.clone());
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            let deadline = request.timeout().unwrap_or(read_timeout);
            attempt.reject(map_send_error(uri, deadline, e));
            return;
        }
    };

    if upload > 0 {
        attempt.notify_upload(WriteProgress::new(upload, Some(upload)));
    }

    let head = ResponseHead::new(response.status().as_u16(), response.headers().clone());
    let total = response.content_length();
    debug!(status = head.status(), content_length = ?total, "response headers received");
    attempt.notify_response(head.clone());

    let mut stream = response.bytes_stream();
    let mut body = BytesMut::new();
    while let Some(chunk_result) = stream.next().await {
        match chunk_result {
            Ok(chunk) => {
                body.extend_from_slice(&chunk);
                attempt.notify_download(ReadProgress::new(body.len() as u64, total));
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    RequestError::timeout(uri, request.timeout().unwrap_or(read_timeout))
                } else {
                    RequestError::cancel_with(uri, "connection dropped while reading body", e)
                };
                attempt.reject(error);
                return;
            }
        }
    }

    attempt.resolve(RawResponse::new(head, body.freeze()));
}

/// Classifies a failed send: nothing left the client (abort), the deadline
/// elapsed (timeout), or the exchange broke off (cancel).
fn map_send_error(uri: &str, deadline: Duration, e: reqwest::Error) -> RequestError {
    if e.is_timeout() {
        RequestError::timeout(uri, deadline)
    } else if e.is_builder() || e.is_connect() {
        RequestError::abort_with(uri, "failed to send request", e)
    } else {
        RequestError::cancel_with(uri, "connection dropped", e)
    }
}
