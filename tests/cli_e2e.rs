//! End-to-end CLI tests for the requestor binary.

use assert_cmd::Command;
use predicates::prelude::*;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("requestor").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Send an HTTP request"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("requestor").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("requestor"));
}

/// Test that a missing URL causes non-zero exit.
#[test]
fn test_binary_missing_url_returns_error() {
    let mut cmd = Command::cargo_bin("requestor").unwrap();
    cmd.arg("GET")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("requestor").unwrap();
    cmd.args(["GET", "http://localhost/", "--invalid-flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_invalid_method_returns_error() {
    let mut cmd = Command::cargo_bin("requestor").unwrap();
    cmd.args(["GE T", "http://localhost/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid HTTP method"));
}

#[test]
fn test_binary_malformed_header_returns_error() {
    let mut cmd = Command::cargo_bin("requestor").unwrap();
    cmd.args(["GET", "http://localhost/", "-H", "no-colon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected 'Name: value'"));
}

#[test]
fn test_binary_unknown_retry_event_returns_error() {
    let mut cmd = Command::cargo_bin("requestor").unwrap();
    cmd.args([
        "GET",
        "http://localhost/",
        "--retry",
        "10",
        "--retry-on",
        "sometimes",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown retry event"));
}

#[test]
fn test_binary_out_of_range_status_family_returns_error() {
    let mut cmd = Command::cargo_bin("requestor").unwrap();
    cmd.args([
        "GET",
        "http://localhost/",
        "--retry",
        "10",
        "--retry-on",
        "700xx",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown retry event '700xx'"));
}

#[test]
fn test_binary_unreachable_host_exits_non_zero() {
    let mut cmd = Command::cargo_bin("requestor").unwrap();
    cmd.args(["GET", "http://127.0.0.1:1/", "-q"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("aborted"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_get_prints_status_and_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-trace", "abc")
                .set_body_raw(r#"{"ok":true}"#, "application/json"),
        )
        .mount(&mock_server)
        .await;

    let url = format!("{}/status", mock_server.uri());
    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("requestor")
            .unwrap()
            .args(["get", &url, "-i"])
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("HTTP 200"))
        .stdout(predicate::str::contains("x-trace: abc"))
        .stdout(predicate::str::contains(r#"{"ok":true}"#));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_post_sends_data() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .and(body_string("hello"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/echo", mock_server.uri());
    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("requestor")
            .unwrap()
            .args(["POST", &url, "-d", "hello"])
            .assert()
    })
    .await
    .unwrap();

    assert.success().stdout(predicate::str::contains("HTTP 201"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_short_polling_prints_every_cycle() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tick"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let url = format!("{}/feed", mock_server.uri());
    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("requestor")
            .unwrap()
            .args(["GET", &url, "--poll", "short", "--interval", "20", "--limit", "3"])
            .assert()
    })
    .await
    .unwrap();

    let output = assert.success().get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&output);
    assert_eq!(stdout.matches("HTTP 200").count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_error_status_still_succeeds() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let url = format!("{}/missing", mock_server.uri());
    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("requestor")
            .unwrap()
            .args(["GET", &url])
            .assert()
    })
    .await
    .unwrap();

    assert.success().stdout(predicate::str::contains("HTTP 404"));
}
