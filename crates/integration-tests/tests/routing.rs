mod harness;

use harness::config::ConfigBuilder;
use harness::mock_provider::MockProvider;
use harness::server::TestServer;

fn chat_body(model: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": "Hello"}]
    })
}

async fn two_providers() -> (MockProvider, MockProvider, TestServer) {
    let openai = MockProvider::openai().start().await.unwrap();
    let claude = MockProvider::anthropic().start().await.unwrap();
    let config = ConfigBuilder::new()
        .with_provider("openai", &openai.base_url(), &["sk-openai"])
        .with_provider("claude", &claude.base_url(), &["sk-ant"])
        .with_default_provider("claude")
        .build();

    let server = TestServer::start(config).await.unwrap();
    (openai, claude, server)
}

#[tokio::test]
async fn provider_header_overrides_model_family() {
    let (openai, claude, server) = two_providers().await;

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .header(switchyard_core::PROVIDER_HEADER, "claude")
        .json(&chat_body("gpt-4o"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(claude.models_seen(), vec!["gpt-4o"]);
    assert_eq!(openai.request_count(), 0);
}

#[tokio::test]
async fn provider_prefix_is_stripped() {
    let (openai, claude, server) = two_providers().await;

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body("openai/my-finetune"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(openai.models_seen(), vec!["my-finetune"]);
    assert_eq!(claude.request_count(), 0);
}

#[tokio::test]
async fn unmatched_model_uses_default_provider() {
    let (openai, claude, server) = two_providers().await;

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body("mystery-model"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(claude.models_seen(), vec!["mystery-model"]);
    assert_eq!(openai.request_count(), 0);
}

#[tokio::test]
async fn unknown_provider_header_is_rejected() {
    let (openai, claude, server) = two_providers().await;

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .header(switchyard_core::PROVIDER_HEADER, "mistral")
        .json(&chat_body("gpt-4o"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["error"]["kind"], "invalid_request");

    assert_eq!(openai.request_count() + claude.request_count(), 0);
}

#[tokio::test]
async fn gemini_generate_content_answers_in_gemini_shape() {
    let (openai, _claude, server) = two_providers().await;

    let resp = server
        .client()
        .post(server.url("/v1beta/models/gpt-4o:generateContent"))
        .json(&serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": "Hello"}]}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["candidates"][0]["content"]["parts"][0]["text"], "Hello from mock");
    assert_eq!(openai.models_seen(), vec!["gpt-4o"]);
}

#[tokio::test]
async fn responses_endpoint_round_trips() {
    let (openai, _claude, server) = two_providers().await;

    let resp = server
        .client()
        .post(server.url("/v1/responses"))
        .json(&serde_json::json!({"model": "gpt-4o", "input": "Hello"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["object"], "response");
    assert_eq!(openai.request_count(), 1);
}
