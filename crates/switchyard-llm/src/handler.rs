//! Axum route handlers for every client protocol

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, Router, routing};
use futures_util::{Stream, StreamExt};
use http::StatusCode;
use switchyard_core::{HttpError, RequestContext};

use crate::convert::{anthropic, google, openai};
use crate::error::{ErrorKind, GatewayError};
use crate::exchange::{ExchangeOutput, NativeStream};
use crate::protocol::anthropic::{AnthropicErrorResponse, AnthropicRequest};
use crate::protocol::google::{GoogleRequest, GoogleStreamFrame};
use crate::protocol::openai::OpenAiRequest;
use crate::protocol::openai_responses::ResponsesRequest;
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};
use crate::state::GatewayState;
use crate::types::StreamFailure;

/// Build the router with every client-facing endpoint
pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/chat/completions", routing::post(openai_chat_completions))
        .route("/v1/responses", routing::post(openai_responses))
        // Anthropic-compatible endpoint
        .route("/v1/messages", routing::post(anthropic_messages))
        // Gemini-compatible endpoint
        .route("/v1beta/models/{model_action}", routing::post(gemini_generate))
        .with_state(state)
}

/// Handle `POST /v1/chat/completions`
async fn openai_chat_completions(
    State(state): State<GatewayState>,
    Extension(context): Extension<RequestContext>,
    Json(body): Json<OpenAiRequest>,
) -> Response {
    respond(&state, NativeRequest::OpenAi(body), None, &context).await
}

/// Handle `POST /v1/responses`
async fn openai_responses(
    State(state): State<GatewayState>,
    Extension(context): Extension<RequestContext>,
    Json(body): Json<ResponsesRequest>,
) -> Response {
    respond(&state, NativeRequest::OpenAiResponses(body), None, &context).await
}

/// Handle `POST /v1/messages`
async fn anthropic_messages(
    State(state): State<GatewayState>,
    Extension(context): Extension<RequestContext>,
    Json(body): Json<AnthropicRequest>,
) -> Response {
    respond(&state, NativeRequest::Anthropic(body), None, &context).await
}

/// Handle `POST /v1beta/models/{model}:{generateContent|streamGenerateContent}`
async fn gemini_generate(
    State(state): State<GatewayState>,
    Extension(context): Extension<RequestContext>,
    Path(model_action): Path<String>,
    Json(body): Json<GoogleRequest>,
) -> Response {
    let Some((model, streaming)) = parse_model_action(&model_action) else {
        let failure = StreamFailure::new(ErrorKind::InvalidRequest, format!("unknown model action `{model_action}`"));
        let mut body = google::error_body(&failure);
        body.error.code = StatusCode::NOT_FOUND.as_u16();
        body.error.status = "NOT_FOUND".to_owned();
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    };

    let request = NativeRequest::Gemini {
        model: model.to_owned(),
        request: body,
    };
    respond(&state, request, Some(streaming), &context).await
}

/// Split `gemini-2.5-pro:streamGenerateContent` into model and streaming flag
fn parse_model_action(model_action: &str) -> Option<(&str, bool)> {
    let (model, action) = model_action.rsplit_once(':')?;
    if model.is_empty() {
        return None;
    }

    match action {
        "generateContent" => Some((model, false)),
        "streamGenerateContent" => Some((model, true)),
        _ => None,
    }
}

async fn respond(
    state: &GatewayState,
    request: NativeRequest,
    stream: Option<bool>,
    context: &RequestContext,
) -> Response {
    let protocol = request.protocol();

    match state.exchange(request, stream, context).await {
        Ok(ExchangeOutput::Unary(response)) => unary_response(response),
        Ok(ExchangeOutput::Stream(chunks)) => sse_response(chunks).into_response(),
        Err(e) => error_response(protocol, &e),
    }
}

fn unary_response(response: NativeResponse) -> Response {
    match response {
        NativeResponse::OpenAi(body) => Json(body).into_response(),
        NativeResponse::OpenAiResponses(body) => Json(body).into_response(),
        NativeResponse::Anthropic(body) => Json(body).into_response(),
        NativeResponse::Gemini(body) => Json(body).into_response(),
        other => {
            tracing::error!(protocol = %other.protocol(), "protocol has no client-facing response shape");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Encode client-protocol chunks as SSE frames
fn sse_response(chunks: NativeStream) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = chunks.filter_map(|chunk| async move { sse_event(chunk) });
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn sse_event(chunk: NativeChunk) -> Option<Result<Event, axum::Error>> {
    match chunk {
        NativeChunk::OpenAi(frame) => Some(Ok(Event::default().data(frame.to_data()))),
        NativeChunk::OpenAiResponses(event) => Some(Event::default().event(event.event_type()).json_data(&event)),
        NativeChunk::Anthropic(event) => Some(Event::default().event(event.event_type()).json_data(&event)),
        NativeChunk::Gemini(GoogleStreamFrame::Chunk(chunk)) => Some(Event::default().json_data(&chunk)),
        NativeChunk::Gemini(GoogleStreamFrame::Error(error)) => Some(Event::default().json_data(&error)),
        NativeChunk::Grok(_) | NativeChunk::Kiro(_) => None,
    }
}

/// Render a pre-commit failure as an error body of the client's protocol
fn error_response(protocol: Protocol, error: &GatewayError) -> Response {
    let status = error.status_code();
    let failure = StreamFailure {
        kind: error.kind(),
        message: error.client_message(),
        fallback_attempted: error.fallback_attempted(),
    };

    match protocol {
        Protocol::Anthropic => {
            let mut detail = anthropic::error_detail(&failure);
            error.error_type().clone_into(&mut detail.error_type);
            let body = AnthropicErrorResponse {
                error_type: "error".to_owned(),
                error: detail,
            };
            (status, Json(body)).into_response()
        }
        Protocol::Gemini => {
            let mut body = google::error_body(&failure);
            body.error.code = status.as_u16();
            (status, Json(body)).into_response()
        }
        _ => {
            let mut body = openai::error_body(&failure);
            error.error_type().clone_into(&mut body.error.error_type);
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use switchyard_config::ProviderType;

    use super::*;
    use crate::error::ProviderError;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn exhausted() -> GatewayError {
        GatewayError::Exhausted {
            provider: ProviderType::Claude,
            fallback_attempted: true,
            attempts: 4,
            last_error: Some(ProviderError::RateLimited {
                retry_after: None,
                message: "slow down".into(),
            }),
        }
    }

    #[test]
    fn model_actions_parse() {
        assert_eq!(parse_model_action("gemini-2.5-pro:generateContent"), Some(("gemini-2.5-pro", false)));
        assert_eq!(
            parse_model_action("gemini-2.5-flash:streamGenerateContent"),
            Some(("gemini-2.5-flash", true))
        );
        assert_eq!(parse_model_action("gemini-2.5-pro:countTokens"), None);
        assert_eq!(parse_model_action(":generateContent"), None);
        assert_eq!(parse_model_action("gemini-2.5-pro"), None);
    }

    #[tokio::test]
    async fn openai_error_body_carries_kind_and_fallback() {
        let response = error_response(Protocol::OpenAi, &exhausted());
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "rate_limit_error");
        assert_eq!(body["error"]["kind"], "transport");
        assert_eq!(body["error"]["fallback_attempted"], true);
    }

    #[tokio::test]
    async fn anthropic_error_body_uses_error_envelope() {
        let response = error_response(Protocol::Anthropic, &GatewayError::UnknownProvider("mistral".into()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["kind"], "invalid_request");
        assert_eq!(body["error"]["fallback_attempted"], false);
    }

    #[tokio::test]
    async fn gemini_error_code_follows_status() {
        let response = error_response(Protocol::Gemini, &exhausted());
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], 429);
        assert_eq!(body["error"]["status"], "UNAVAILABLE");
    }

    #[test]
    fn openai_frames_are_raw_data() {
        let frame = crate::protocol::openai::OpenAiStreamFrame::Done;
        assert!(sse_event(NativeChunk::OpenAi(frame)).unwrap().is_ok());
    }
}
