//! Wire-level tests against a local mock of the Chat Completions endpoint.

use openai::{Error, Message, OpenAi, Request};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "sk-test-0123456789abcdef0123456789abcdef0123456789";

fn client_for(server: &MockServer) -> OpenAi {
    OpenAi::new().with_api_base(server.uri())
}

#[tokio::test]
async fn test_sends_bearer_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", format!("Bearer {KEY}").as_str()))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi there"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .complete(KEY, Request::new(vec![Message::user("Hello")]))
        .await
        .expect("completion should succeed");

    assert_eq!(response.text(), Some("Hi there"));
}

#[tokio::test]
async fn test_non_success_status_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .complete(KEY, Request::new(vec![Message::user("Hello")]))
        .await
        .unwrap_err();

    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 429);
            assert_eq!(message, "slow down");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_garbage_body_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .complete(KEY, Request::new(vec![Message::user("Hello")]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Parse(_)));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"choices": []}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .with_timeout(Duration::from_millis(200))
        .complete(KEY, Request::new(vec![Message::user("Hello")]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unreachable_host_is_network_error() {
    let err = OpenAi::new()
        .with_api_base("http://127.0.0.1:9")
        .complete(KEY, Request::new(vec![Message::user("Hello")]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network(_)), "got {err:?}");
}
