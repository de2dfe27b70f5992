//! Log output of rejected requests.
//!
//! A rejection nobody handles or waits for is surfaced as a warning; any
//! handler or waiter, blocking or async, keeps the log quiet.

mod support;

use std::time::Duration;

use serde_json::Value;
use tokio_test::{assert_pending, assert_ready};

use requestor::{ErrorKind, FutureError, Reply};
use support::logs::{capture, warnings};
use support::scripted::{EventLog, Harness};

const UNHANDLED: &str = "request failed with no error handler registered";

#[test]
fn test_unhandled_rejection_is_logged_as_warning() {
    let harness = Harness::new();
    harness
        .transport
        .push(Reply::reject(ErrorKind::Abort, "connection refused"));

    let (request, events) = capture(|| {
        let request = harness.session.req("http://svc/jobs").get::<Value>();
        harness.runner.run_until_idle();
        request
    });

    assert!(request.is_rejected());
    let logged = warnings(&events, UNHANDLED);
    assert_eq!(logged.len(), 1, "captured events: {events:?}");
    assert_eq!(logged[0].fields.get("kind").map(String::as_str), Some("abort"));
}

#[test]
fn test_matching_handler_suppresses_warning() {
    let harness = Harness::new();
    harness
        .transport
        .push(Reply::reject(ErrorKind::Timeout, "gateway silent"));
    let log = EventLog::new();

    let (_, events) = capture(|| {
        let request = harness.session.req("http://svc/jobs").get::<Value>();
        request.on_timeout(log.recorder("timeout"));
        harness.runner.run_until_idle();
    });

    assert_eq!(log.events(), vec!["timeout"]);
    assert!(warnings(&events, UNHANDLED).is_empty());
}

#[test]
fn test_handler_for_other_kind_still_warns() {
    let harness = Harness::new();
    harness
        .transport
        .push(Reply::reject(ErrorKind::Cancel, "peer reset"));

    let (_, events) = capture(|| {
        let request = harness.session.req("http://svc/jobs").get::<Value>();
        request.on_timeout(|_| {});
        harness.runner.run_until_idle();
    });

    assert_eq!(warnings(&events, UNHANDLED).len(), 1);
}

#[test]
fn test_blocking_waiter_suppresses_warning() {
    let harness = Harness::new();
    harness.transport.push(
        Reply::reject(ErrorKind::Abort, "connection refused").after(Duration::from_millis(20)),
    );

    let (result, events) = capture(|| {
        let request = harness.session.req("http://svc/jobs").get::<Value>();
        request.get()
    });

    assert!(matches!(result, Err(FutureError::Execution(_))));
    assert!(warnings(&events, UNHANDLED).is_empty());
}

#[test]
fn test_async_waiter_suppresses_warning() {
    let harness = Harness::new();
    harness
        .transport
        .push(Reply::reject(ErrorKind::Abort, "connection refused"));

    let (outcome, events) = capture(|| {
        let request = harness.session.req("http://svc/jobs").get::<Value>();
        let mut settled = tokio_test::task::spawn(request.settled());
        assert_pending!(settled.poll());
        harness.runner.run_until_idle();
        assert_ready!(settled.poll())
    });

    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::Abort);
    assert!(warnings(&events, UNHANDLED).is_empty());
}
