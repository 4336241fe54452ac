//! Integration tests for the retrying transport.
//!
//! These tests run against a mock HTTP server with millisecond backoff so the
//! retry schedule can be exercised quickly.

use std::time::Duration;

use ilmsdump_core::transport::Request;
use ilmsdump_core::{RetryPolicy, Transport, TransportError};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_transport(max_retries: u32) -> Transport {
    Transport::with_policy(
        RetryPolicy::new(max_retries, Duration::from_millis(5), 2),
        Duration::from_secs(10),
    )
    .expect("client should build")
}

fn url(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{p}", server.uri())).expect("valid url")
}

#[tokio::test]
async fn test_transient_status_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/home.php"))
        .respond_with(ResponseTemplate::new(400))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/home.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = fast_transport(3);
    let body = transport
        .get(url(&server, "/home.php"))
        .await
        .expect("request should eventually succeed")
        .text()
        .await
        .expect("body should read");

    assert_eq!(body, "welcome");
    assert_eq!(transport.retried(), 2);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_returns_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(400))
        .expect(3)
        .mount(&server)
        .await;

    let transport = fast_transport(2);
    let err = transport
        .get(url(&server, "/busy"))
        .await
        .expect_err("request should fail");

    assert_eq!(err.status(), Some(400));
    assert_eq!(transport.retried(), 2);
}

#[tokio::test]
async fn test_other_statuses_fail_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let transport = fast_transport(3);
    let err = transport.get(url(&server, "/missing")).await.unwrap_err();
    assert!(matches!(err, TransportError::HttpStatus { status: 404, .. }));
    let err = transport.get(url(&server, "/broken")).await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(transport.retried(), 0);
}

#[tokio::test]
async fn test_default_transport_fails_other_status_without_sleeping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Transport::new().expect("client should build");
    let start = std::time::Instant::now();
    let err = transport.get(url(&server, "/gone")).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(transport.retried(), 0);
}

#[tokio::test]
async fn test_form_post_is_replayed_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("account=alice"))
        .respond_with(ResponseTemplate::new(400))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("account=alice"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .expect(1)
        .mount(&server)
        .await;

    let transport = fast_transport(3);
    let request = Request::post_form(url(&server, "/login"), &[("account", "alice")]);
    let body: serde_json::Value = transport
        .execute(&request)
        .await
        .expect("post should succeed")
        .json()
        .await
        .expect("json body");

    assert_eq!(body["ok"], true);
    assert_eq!(transport.retried(), 1);
}

#[tokio::test]
async fn test_byte_counter_tracks_every_body_read() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("0123456789"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&server)
        .await;

    let transport = fast_transport(0);
    let counter = transport.bytes().clone();
    transport
        .get(url(&server, "/page"))
        .await
        .expect("page")
        .text()
        .await
        .expect("text");
    assert_eq!(counter.total(), 10);

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("file.bin");
    let written = transport
        .get(url(&server, "/file.bin"))
        .await
        .expect("file")
        .save_to(&target)
        .await
        .expect("save");

    assert_eq!(written, 4096);
    assert_eq!(std::fs::read(&target).expect("read back").len(), 4096);
    assert_eq!(counter.total(), 4106);
}
