//! HttpFetcher against a local mock server.

use act_ripper::{FetchError, Fetcher};
use act_ripper_cli::HttpFetcher;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_fetch_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/e1foo/img/bg.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(5_000);
    let bytes = fetcher
        .fetch(&format!("{}/e1foo/img/bg.png", server.uri()))
        .await
        .unwrap();
    assert_eq!(bytes, b"\x89PNG");
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(5_000);
    let url = format!("{}/missing.atlas", server.uri());
    match fetcher.fetch(&url).await {
        Err(FetchError::Status { url: u, status }) => {
            assert_eq!(status, 404);
            assert_eq!(u, url);
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_single_attempt_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(5_000);
    let err = fetcher
        .fetch(&format!("{}/chars/hero.json", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 503, .. }));
}

#[tokio::test]
async fn test_percent_encoded_data_uri() {
    let fetcher = HttpFetcher::new(1_000);
    let bytes = fetcher
        .fetch("data:image/svg+xml,%3Csvg%2F%3E")
        .await
        .unwrap();
    assert_eq!(bytes, b"<svg/>");
}
