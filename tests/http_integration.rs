//! Integration tests for the HTTP transport.
//!
//! These tests exercise the full request flow against mock HTTP servers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, HeaderValue};
use requestor::{
    DelaySequence, ErrorKind, FutureError, HookResult, Request, RequestEvent, Session,
    SessionConfig,
};
use serde::Deserialize;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Item {
    a: u32,
}

fn session() -> Session {
    Session::tokio(SessionConfig::default()).expect("session should build")
}

/// Shared flag flipped by a callback.
fn flag() -> (Arc<AtomicBool>, impl Fn(&requestor::RequestError) + Send + Sync + 'static) {
    let flag = Arc::new(AtomicBool::new(false));
    let setter = Arc::clone(&flag);
    (flag, move |_: &requestor::RequestError| {
        setter.store(true, Ordering::SeqCst);
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_json_response_reaches_payload_callback_and_get() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"a":1}"#, "application/json"))
        .mount(&mock_server)
        .await;

    let session = session();
    let (tx, rx) = std::sync::mpsc::channel();
    let request = session
        .req(format!("{}/items/1", mock_server.uri()))
        .get::<Item>();
    request.on_payload(move |item| {
        let _ = tx.send(item.clone());
    });

    let handle = request.clone();
    let response = tokio::task::spawn_blocking(move || handle.get())
        .await
        .unwrap()
        .expect("request should resolve");

    assert_eq!(response.status(), 200);
    assert_eq!(response.payload(), Some(&Item { a: 1 }));
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Item { a: 1 }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_server_times_out_with_timeout_kind_only() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1000)))
        .mount(&mock_server)
        .await;

    let session = session();
    let (timed_out, on_timeout) = flag();
    let (aborted, on_abort) = flag();
    let (cancelled, on_cancel) = flag();
    let request = session
        .req(format!("{}/slow", mock_server.uri()))
        .timeout(Duration::from_millis(50))
        .get::<Value>();
    request
        .on_timeout(on_timeout)
        .on_abort(on_abort)
        .on_cancel(on_cancel);

    let started = Instant::now();
    let handle = request.clone();
    let result = tokio::task::spawn_blocking(move || handle.get())
        .await
        .unwrap();

    match result {
        Err(FutureError::Execution(error)) => assert_eq!(error.kind(), ErrorKind::Timeout),
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(timed_out.load(Ordering::SeqCst));
    assert!(!aborted.load(Ordering::SeqCst));
    assert!(!cancelled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_error_status_resolves_with_fail() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let session = session();
    let request = session
        .req(format!("{}/missing", mock_server.uri()))
        .get::<Value>();

    let response = request.settled().await.expect("404 still resolves");
    assert_eq!(response.status(), 404);
    assert!(!response.is_successful());
    assert!(response.payload().is_none());
}

#[tokio::test]
async fn test_post_sends_json_payload() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"name": "nightly", "priority": 2})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"a": 7})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = session();
    let request = session
        .req(format!("{}/jobs", mock_server.uri()))
        .payload(&json!({"name": "nightly", "priority": 2}))
        .post::<Item>();

    let response = request.settled().await.expect("request should resolve");
    assert_eq!(response.status(), 201);
    assert_eq!(response.payload(), Some(&Item { a: 7 }));
}

#[tokio::test]
async fn test_service_unavailable_is_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 2})))
        .mount(&mock_server)
        .await;

    let session = session();
    let request = session
        .req(format!("{}/flaky", mock_server.uri()))
        .retry(DelaySequence::millis(&[10, 10]), [RequestEvent::Status(503)])
        .get::<Item>();

    let response = request.settled().await.expect("retry should succeed");
    assert_eq!(response.status(), 200);
    assert_eq!(request.retry_count(), 1);
}

#[tokio::test]
async fn test_default_headers_are_sent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/whoami"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = session();
    let request = session
        .req(format!("{}/whoami", mock_server.uri()))
        .get::<Value>();

    let response = request.settled().await.expect("request should resolve");
    assert_eq!(response.status(), 204);
    let requests = mock_server.received_requests().await.unwrap();
    let user_agent = requests[0]
        .headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(user_agent.starts_with("requestor/"));
}

#[tokio::test]
async fn test_unreachable_host_aborts() {
    let session = session();
    let request = session.req("http://127.0.0.1:1/nothing").get::<Value>();

    let error = request.settled().await.expect_err("nothing listens on port 1");
    assert_eq!(error.kind(), ErrorKind::Abort);
}

#[tokio::test]
async fn test_invalid_uri_aborts() {
    let session = session();
    let request = session.req("not a url").get::<Value>();

    let error = request.settled().await.expect_err("uri cannot be parsed");
    assert_eq!(error.kind(), ErrorKind::Abort);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_in_flight_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(2000)))
        .mount(&mock_server)
        .await;

    let session = session();
    let (cancelled, on_cancel) = flag();
    let request = session
        .req(format!("{}/slow", mock_server.uri()))
        .get::<Value>();
    request.on_cancel(on_cancel);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let future = request.future();
    assert!(future.cancel());

    let result = tokio::task::spawn_blocking(move || future.get())
        .await
        .unwrap();
    assert!(matches!(result, Err(FutureError::Cancelled)));
    assert!(cancelled.load(Ordering::SeqCst));
    assert!(request.is_rejected());
}

#[tokio::test]
async fn test_session_keeps_cookies_between_requests() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(204).insert_header("set-cookie", "session=abc; Path=/"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let session = session();
    let login = session
        .req(format!("{}/login", mock_server.uri()))
        .post::<Value>();
    assert_eq!(login.settled().await.unwrap().status(), 204);

    let me = session.req(format!("{}/me", mock_server.uri())).get::<Value>();
    assert_eq!(me.settled().await.unwrap().status(), 200);
}

#[tokio::test]
async fn test_session_filter_adds_authorization() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 3})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = session().with_request_filter(|request: &mut Request| -> HookResult {
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer t0ken"));
        Ok(())
    });
    let request = session
        .req(format!("{}/private", mock_server.uri()))
        .get::<Item>();

    let response = request.settled().await.expect("filter should authorize");
    assert_eq!(response.payload(), Some(&Item { a: 3 }));
}

#[tokio::test]
async fn test_shutdown_rejects_delayed_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let session = session();
    let request = session
        .req(format!("{}/later", mock_server.uri()))
        .delay(Duration::from_millis(50))
        .get::<Value>();
    session.shutdown();

    let error = request.settled().await.expect_err("shutdown aborts pending requests");
    assert_eq!(error.kind(), ErrorKind::Abort);
    tokio::time::sleep(Duration::from_millis(100)).await;
}
