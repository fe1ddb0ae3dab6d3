mod harness;

use axum::http::StatusCode;
use harness::config::ConfigBuilder;
use harness::mock_provider::MockProvider;
use harness::server::TestServer;

fn chat_body(model: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": "Hello"}]
    })
}

fn messages_body(model: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "max_tokens": 256,
        "messages": [{"role": "user", "content": "Hello"}]
    })
}

#[tokio::test]
async fn primary_succeeds_without_touching_fallback() {
    let primary = MockProvider::openai().start().await.unwrap();
    let backup = MockProvider::anthropic().reply("backup response").start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider("openai", &primary.base_url(), &["sk-openai"])
        .with_provider("claude", &backup.base_url(), &["sk-ant"])
        .with_fallback_chain("openai", &["claude"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body("gpt-4o"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["choices"][0]["message"]["content"], "Hello from mock");

    assert_eq!(primary.request_count(), 1);
    assert_eq!(backup.request_count(), 0);
}

#[tokio::test]
async fn rejected_key_switches_to_next_credential() {
    let mock = MockProvider::openai().reject_key("sk-bad").start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider("openai", &mock.base_url(), &["sk-bad", "sk-good"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body("gpt-4o"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(mock.keys_seen(), vec!["sk-bad", "sk-good"]);

    // The rejected credential is disabled and skipped from now on
    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body("gpt-4o"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(mock.keys_seen(), vec!["sk-bad", "sk-good", "sk-good"]);

    let health = server.health().await;
    assert_eq!(health["providers"]["openai"]["disabled"], 1);
    assert_eq!(health["providers"]["openai"]["active"], 1);
}

#[tokio::test]
async fn server_errors_retry_on_the_same_credential() {
    let mock = MockProvider::openai()
        .fail_with(StatusCode::INTERNAL_SERVER_ERROR, 2)
        .start()
        .await
        .unwrap();

    let config = ConfigBuilder::new()
        .with_provider("openai", &mock.base_url(), &["sk-1", "sk-2"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body("gpt-4o"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(mock.keys_seen(), vec!["sk-1", "sk-1", "sk-1"]);

    // Success clears the transient errors
    let health = server.health().await;
    assert_eq!(health["providers"]["openai"]["active"], 2);
}

#[tokio::test]
async fn exhausted_provider_falls_back_with_fallback_model() {
    let claude = MockProvider::anthropic().reject_key("sk-ant").start().await.unwrap();
    let openai = MockProvider::openai().reply("Hello from backup").start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider("claude", &claude.base_url(), &["sk-ant"])
        .with_provider("openai", &openai.base_url(), &["sk-openai"])
        .with_fallback_model("openai", "gpt-4o-mini")
        .with_fallback_chain("claude", &["openai"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&messages_body("claude-sonnet-4"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);

    // The reply keeps the client's protocol
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["type"], "message");
    assert_eq!(json["content"][0]["type"], "text");
    assert_eq!(json["content"][0]["text"], "Hello from backup");

    assert_eq!(claude.models_seen(), vec!["claude-sonnet-4"]);
    assert_eq!(openai.models_seen(), vec!["gpt-4o-mini"]);
}

#[tokio::test]
async fn exhausted_chain_reports_fallback_attempted() {
    let claude = MockProvider::anthropic().reject_key("sk-ant").start().await.unwrap();
    let openai = MockProvider::openai().reject_key("sk-openai").start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider("claude", &claude.base_url(), &["sk-ant"])
        .with_provider("openai", &openai.base_url(), &["sk-openai"])
        .with_fallback_chain("claude", &["openai"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&messages_body("claude-sonnet-4"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["error"]["fallback_attempted"], true);

    assert_eq!(claude.request_count(), 1);
    assert_eq!(openai.request_count(), 1);
}

#[tokio::test]
async fn bad_request_is_not_retried() {
    let mock = MockProvider::openai()
        .fail_with(StatusCode::BAD_REQUEST, 1)
        .start()
        .await
        .unwrap();
    let backup = MockProvider::anthropic().start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider("openai", &mock.base_url(), &["sk-1", "sk-2"])
        .with_provider("claude", &backup.base_url(), &["sk-ant"])
        .with_fallback_chain("openai", &["claude"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&chat_body("gpt-4o"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["error"]["kind"], "protocol");

    assert_eq!(mock.request_count(), 1);
    assert_eq!(backup.request_count(), 0);

    // Malformed requests are not the credential's fault
    let health = server.health().await;
    assert_eq!(health["providers"]["openai"]["active"], 2);
}
