mod harness;

use harness::config::ConfigBuilder;
use harness::mock_provider::MockProvider;
use harness::server::TestServer;

fn streaming_chat(model: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": "Hello"}],
        "stream": true
    })
}

fn streaming_messages(model: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "max_tokens": 256,
        "messages": [{"role": "user", "content": "Hello"}],
        "stream": true
    })
}

/// Parse SSE data lines from raw response text
fn parse_sse_data(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.starts_with("data: "))
        .map(|line| line.trim_start_matches("data: ").to_owned())
        .collect()
}

/// Parse SSE event names from raw response text
fn parse_sse_events(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.starts_with("event: "))
        .map(|line| line.trim_start_matches("event: ").to_owned())
        .collect()
}

/// Concatenated `delta.content` of `OpenAI` chunks
fn openai_text(frames: &[String]) -> String {
    frames
        .iter()
        .filter(|frame| frame.as_str() != "[DONE]")
        .filter_map(|frame| serde_json::from_str::<serde_json::Value>(frame).ok())
        .filter_map(|chunk| chunk["choices"][0]["delta"]["content"].as_str().map(str::to_owned))
        .collect()
}

#[tokio::test]
async fn openai_stream_passes_through() {
    let mock = MockProvider::openai().start().await.unwrap();
    let config = ConfigBuilder::new()
        .with_provider("openai", &mock.base_url(), &["sk-1"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&streaming_chat("gpt-4o"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap().to_owned();
    assert!(content_type.contains("text/event-stream"));

    let text = resp.text().await.unwrap();
    let frames = parse_sse_data(&text);

    assert_eq!(openai_text(&frames), "Hello from mock");
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
    assert_eq!(frames.iter().filter(|f| f.as_str() == "[DONE]").count(), 1);
}

#[tokio::test]
async fn anthropic_client_streams_from_openai_provider() {
    let mock = MockProvider::openai().start().await.unwrap();
    let config = ConfigBuilder::new()
        .with_provider("openai", &mock.base_url(), &["sk-1"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&streaming_messages("gpt-4o"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();

    let events = parse_sse_events(&text);
    assert_eq!(events.first().map(String::as_str), Some("message_start"));
    assert_eq!(events.last().map(String::as_str), Some("message_stop"));
    assert!(events.iter().any(|e| e == "content_block_start"));
    assert!(events.iter().any(|e| e == "message_delta"));

    let streamed: String = parse_sse_data(&text)
        .iter()
        .filter_map(|frame| serde_json::from_str::<serde_json::Value>(frame).ok())
        .filter(|event| event["type"] == "content_block_delta")
        .filter_map(|event| event["delta"]["text"].as_str().map(str::to_owned))
        .collect();
    assert_eq!(streamed, "Hello from mock");
}

#[tokio::test]
async fn openai_client_streams_from_anthropic_provider() {
    let mock = MockProvider::anthropic().start().await.unwrap();
    let config = ConfigBuilder::new()
        .with_provider("claude", &mock.base_url(), &["sk-ant"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&streaming_chat("claude-sonnet-4"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let frames = parse_sse_data(&resp.text().await.unwrap());

    assert_eq!(openai_text(&frames), "Hello from mock");
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn stream_falls_back_before_first_chunk() {
    let claude = MockProvider::anthropic().reject_key("sk-ant").start().await.unwrap();
    let openai = MockProvider::openai().reply("Hello from backup").start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_provider("claude", &claude.base_url(), &["sk-ant"])
        .with_provider("openai", &openai.base_url(), &["sk-openai"])
        .with_fallback_chain("claude", &["openai"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&streaming_chat("claude-sonnet-4"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let frames = parse_sse_data(&resp.text().await.unwrap());

    assert_eq!(openai_text(&frames), "Hello from backup");
    assert_eq!(claude.request_count(), 1);
    assert_eq!(openai.request_count(), 1);
}

#[tokio::test]
async fn mid_stream_failure_ends_with_error_frame() {
    let mock = MockProvider::openai().truncate_streams().start().await.unwrap();
    let config = ConfigBuilder::new()
        .with_provider("openai", &mock.base_url(), &["sk-1", "sk-2"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&streaming_chat("gpt-4o"))
        .send()
        .await
        .unwrap();

    // Committed before the failure, so the status is already sent
    assert_eq!(resp.status(), 200);
    let frames = parse_sse_data(&resp.text().await.unwrap());

    assert_eq!(openai_text(&frames), "Hello ");
    assert!(!frames.iter().any(|f| f == "[DONE]"));

    let last: serde_json::Value = serde_json::from_str(frames.last().unwrap()).unwrap();
    assert_eq!(last["error"]["kind"], "transport");

    // No second credential is tried once bytes reached the client
    assert_eq!(mock.request_count(), 1);
}

#[tokio::test]
async fn gemini_stream_action_streams() {
    let mock = MockProvider::openai().start().await.unwrap();
    let config = ConfigBuilder::new()
        .with_provider("openai", &mock.base_url(), &["sk-1"])
        .build();

    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1beta/models/gpt-4o:streamGenerateContent"))
        .json(&serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": "Hello"}]}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let frames = parse_sse_data(&resp.text().await.unwrap());

    let streamed: String = frames
        .iter()
        .filter_map(|frame| serde_json::from_str::<serde_json::Value>(frame).ok())
        .filter_map(|chunk| {
            chunk["candidates"][0]["content"]["parts"][0]["text"]
                .as_str()
                .map(str::to_owned)
        })
        .collect();
    assert_eq!(streamed, "Hello from mock");
    assert_eq!(mock.request_count(), 1);
    assert_eq!(mock.models_seen(), vec!["gpt-4o"]);
}
