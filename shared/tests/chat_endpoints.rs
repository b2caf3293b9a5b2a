use serde_json::json;
use serial_test::serial;
use shared::llm::{self, ProviderKind};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 0,
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
    })
}

#[actix_web::test]
#[serial]
async fn openai_compatible_answer() {
    let server = MockServer::start().await;
    std::env::set_var("OPENAI_API_BASE", server.uri());
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("pong")))
        .mount(&server)
        .await;

    let client = llm::http_client(5_000);
    let answer = llm::chat(&client, ProviderKind::OpenAi, "gpt-4o", "key", None, "ping")
        .await
        .unwrap();
    assert_eq!(answer, "pong");
    std::env::remove_var("OPENAI_API_BASE");
}

#[actix_web::test]
#[serial]
async fn anthropic_answer() {
    let server = MockServer::start().await;
    std::env::set_var("ANTHROPIC_API_BASE", server.uri());
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{ "type": "text", "text": "hello" }]
        })))
        .mount(&server)
        .await;

    let client = llm::http_client(5_000);
    let answer = llm::chat(
        &client,
        ProviderKind::Anthropic,
        "claude-sonnet-4-5",
        "key",
        Some("be brief"),
        "ping",
    )
    .await
    .unwrap();
    assert_eq!(answer, "hello");
    std::env::remove_var("ANTHROPIC_API_BASE");
}

#[actix_web::test]
#[serial]
async fn google_answer() {
    let server = MockServer::start().await;
    std::env::set_var("GOOGLE_API_BASE", server.uri());
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-3-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "hola" }] } }]
        })))
        .mount(&server)
        .await;

    let client = llm::http_client(5_000);
    let answer = llm::chat(&client, ProviderKind::Google, "gemini-3-pro", "key", None, "ping")
        .await
        .unwrap();
    assert_eq!(answer, "hola");
    std::env::remove_var("GOOGLE_API_BASE");
}

#[actix_web::test]
#[serial]
async fn retries_surface_http_error() {
    let server = MockServer::start().await;
    std::env::set_var("OPENAI_API_BASE", server.uri());
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = llm::http_client(5_000);
    let err = llm::chat_with_retries(
        &client,
        ProviderKind::OpenAi,
        "gpt-4o",
        "key",
        None,
        "ping",
        1,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, llm::LlmError::Http(500)));
    std::env::remove_var("OPENAI_API_BASE");
}
