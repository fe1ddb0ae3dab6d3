//! Mock upstream providers for integration tests
//!
//! Speaks either the `OpenAI` chat completions or the Anthropic Messages wire
//! format and can be scripted to fail before it starts answering.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Wire format a mock answers in
#[derive(Debug, Clone, Copy)]
pub enum Wire {
    OpenAi,
    Anthropic,
}

/// Builder for a [`MockProvider`]
pub struct MockBuilder {
    wire: Wire,
    reply: String,
    failures: VecDeque<StatusCode>,
    rejected_keys: Vec<String>,
    truncate_streams: bool,
}

impl MockBuilder {
    /// Text the mock answers with
    pub fn reply(mut self, reply: &str) -> Self {
        reply.clone_into(&mut self.reply);
        self
    }

    /// Answer the next `times` requests with `status`
    pub fn fail_with(mut self, status: StatusCode, times: usize) -> Self {
        self.failures.extend(std::iter::repeat_n(status, times));
        self
    }

    /// Always answer 401 for this key
    pub fn reject_key(mut self, key: &str) -> Self {
        self.rejected_keys.push(key.to_owned());
        self
    }

    /// Drop the connection after the first stream frame
    pub fn truncate_streams(mut self) -> Self {
        self.truncate_streams = true;
        self
    }

    pub async fn start(self) -> anyhow::Result<MockProvider> {
        let state = Arc::new(MockState {
            wire: self.wire,
            reply: self.reply,
            failures: Mutex::new(self.failures),
            rejected_keys: self.rejected_keys,
            truncate_streams: self.truncate_streams,
            requests: AtomicU32::new(0),
            keys: Mutex::new(Vec::new()),
            models: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle))
            .route("/v1/messages", routing::post(handle))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(MockProvider { addr, shutdown, state })
    }
}

/// A running mock upstream
pub struct MockProvider {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    wire: Wire,
    reply: String,
    failures: Mutex<VecDeque<StatusCode>>,
    rejected_keys: Vec<String>,
    truncate_streams: bool,
    requests: AtomicU32,
    keys: Mutex<Vec<String>>,
    models: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn openai() -> MockBuilder {
        Self::builder(Wire::OpenAi)
    }

    pub fn anthropic() -> MockBuilder {
        Self::builder(Wire::Anthropic)
    }

    fn builder(wire: Wire) -> MockBuilder {
        MockBuilder {
            wire,
            reply: "Hello from mock".to_owned(),
            failures: VecDeque::new(),
            rejected_keys: Vec::new(),
            truncate_streams: false,
        }
    }

    /// Base URL for configuring the mock as a provider
    ///
    /// Includes `/v1`; clients append `chat/completions` or `messages`
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Requests received, failed ones included
    pub fn request_count(&self) -> u32 {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Credential presented with each request, in arrival order
    pub fn keys_seen(&self) -> Vec<String> {
        self.state.keys.lock().clone()
    }

    /// Model named by each request, in arrival order
    pub fn models_seen(&self) -> Vec<String> {
        self.state.models.lock().clone()
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle(State(state): State<Arc<MockState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let key = presented_key(state.wire, &headers);
    state.keys.lock().push(key.clone());
    let model = body["model"].as_str().unwrap_or_default().to_owned();
    state.models.lock().push(model.clone());

    if state.rejected_keys.contains(&key) {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }

    let failure = state.failures.lock().pop_front();
    if let Some(status) = failure {
        return (status, "scripted failure").into_response();
    }

    if !body["stream"].as_bool().unwrap_or(false) {
        return Json(unary_body(state.wire, &model, &state.reply)).into_response();
    }

    let frames = sse_frames(state.wire, &model, &state.reply);
    let body = if state.truncate_streams {
        let first = frames.into_iter().take(1).map(Ok::<_, std::io::Error>);
        let cut = stream::once(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(std::io::Error::other("connection reset"))
        });
        Body::from_stream(stream::iter(first).chain(cut))
    } else {
        Body::from_stream(stream::iter(frames.into_iter().map(Ok::<_, std::io::Error>)))
    };

    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

fn presented_key(wire: Wire, headers: &HeaderMap) -> String {
    let value = match wire {
        Wire::OpenAi => headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer ")),
        Wire::Anthropic => headers.get("x-api-key").and_then(|v| v.to_str().ok()),
    };
    value.unwrap_or_default().to_owned()
}

fn unary_body(wire: Wire, model: &str, reply: &str) -> Value {
    match wire {
        Wire::OpenAi => json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": reply},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
        }),
        Wire::Anthropic => json!({
            "id": "msg_mock",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": reply}],
            "model": model,
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 3}
        }),
    }
}

/// Reply split on spaces, one frame per piece
fn sse_frames(wire: Wire, model: &str, reply: &str) -> Vec<Bytes> {
    let pieces: Vec<&str> = reply.split_inclusive(' ').collect();

    match wire {
        Wire::OpenAi => {
            let chunk = |delta: Value, finish: Value| {
                json!({
                    "id": "chatcmpl-mock",
                    "object": "chat.completion.chunk",
                    "created": 1_700_000_000,
                    "model": model,
                    "choices": [{"index": 0, "delta": delta, "finish_reason": finish}]
                })
            };

            let mut frames: Vec<Bytes> = pieces
                .iter()
                .enumerate()
                .map(|(i, piece)| {
                    let delta = if i == 0 {
                        json!({"role": "assistant", "content": piece})
                    } else {
                        json!({"content": piece})
                    };
                    data_frame(&chunk(delta, Value::Null))
                })
                .collect();
            frames.push(data_frame(&chunk(json!({}), json!("stop"))));
            frames.push(Bytes::from_static(b"data: [DONE]\n\n"));
            frames
        }
        Wire::Anthropic => {
            let mut frames = vec![
                named_frame(
                    "message_start",
                    &json!({
                        "type": "message_start",
                        "message": {
                            "id": "msg_mock",
                            "type": "message",
                            "role": "assistant",
                            "model": model,
                            "content": [],
                            "usage": {"input_tokens": 5, "output_tokens": 0}
                        }
                    }),
                ),
                named_frame(
                    "content_block_start",
                    &json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
                ),
            ];
            frames.extend(pieces.iter().map(|piece| {
                named_frame(
                    "content_block_delta",
                    &json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": piece}}),
                )
            }));
            frames.push(named_frame(
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": 0}),
            ));
            frames.push(named_frame(
                "message_delta",
                &json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": "end_turn"},
                    "usage": {"input_tokens": 5, "output_tokens": 3}
                }),
            ));
            frames.push(named_frame("message_stop", &json!({"type": "message_stop"})));
            frames
        }
    }
}

fn data_frame(payload: &Value) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

fn named_frame(event: &str, payload: &Value) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {payload}\n\n"))
}
