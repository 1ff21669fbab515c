//! reqwest-backed fetcher against a local mock server

use std::time::Duration;

use taskbox::crawler::{FetchError, Fetcher, HttpClient, HttpConfig};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(max_body_bytes: u64) -> HttpClient {
    HttpClient::new(HttpConfig {
        request_timeout: Duration::from_millis(500),
        max_body_bytes,
        ..HttpConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_get_sends_referer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/1.jpg"))
        .and(header("referer", "https://gallery.test/"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let body = client(1024)
        .get(
            &format!("{}/img/1.jpg", server.uri()),
            Some("https://gallery.test/"),
        )
        .await
        .unwrap();

    assert_eq!(&body[..], b"jpeg-bytes");
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(1024)
        .get(&format!("{}/missing", server.uri()), None)
        .await
        .unwrap_err();

    match err {
        FetchError::Status { status, reason } => {
            assert_eq!(status, 404);
            assert_eq!(reason, "Not Found");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
        .mount(&server)
        .await;

    let err = client(1024)
        .get(&format!("{}/big.jpg", server.uri()), None)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::TooLarge { limit: 1024 }));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let err = client(1024)
        .get(&format!("{}/slow", server.uri()), None)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Timeout));
}
