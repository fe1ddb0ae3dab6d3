//! Bidirectional conversion between canonical types and wire formats
//!
//! Each submodule implements [`ProtocolConverter`] for one protocol. A
//! converter is stateless; everything an exchange accumulates while
//! streaming lives in the [`StreamState`] it hands out.

pub mod anthropic;
pub mod google;
pub mod grok;
pub mod kiro;
pub mod openai;
pub mod openai_responses;

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};
use crate::thinking::{Segment, SegmentKind};
use crate::types::{
    ChoiceMessage, CompletionRequest, CompletionResponse, FinishReason, StreamDelta, StreamEvent, StreamToolCall,
    ToolCall, Usage,
};

/// Failure to map a value between protocols
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// The native value belongs to a different protocol
    #[error("expected a {expected} value, got {found}")]
    ProtocolMismatch { expected: Protocol, found: Protocol },

    /// The converter does not serve this direction
    #[error("{protocol} does not support {operation}")]
    Unsupported {
        protocol: Protocol,
        operation: &'static str,
    },

    /// A required field is absent or empty
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

/// Which side of the gateway a converter serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterRole {
    /// Decodes inbound requests and encodes responses
    ClientOnly,
    /// Encodes upstream requests and decodes responses
    ProviderOnly,
    Both,
}

impl ConverterRole {
    pub const fn serves_client(self) -> bool {
        matches!(self, Self::ClientOnly | Self::Both)
    }

    pub const fn serves_provider(self) -> bool {
        matches!(self, Self::ProviderOnly | Self::Both)
    }
}

/// Mapping between one wire protocol and the canonical model
///
/// Directions a converter does not serve return
/// [`ConvertError::Unsupported`].
pub trait ProtocolConverter: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn roles(&self) -> ConverterRole;

    /// Decode a client request
    fn to_canonical_request(&self, request: NativeRequest) -> Result<CompletionRequest, ConvertError> {
        drop(request);
        Err(self.unsupported("request decoding"))
    }

    /// Encode an upstream request
    fn from_canonical_request(&self, request: &CompletionRequest) -> Result<NativeRequest, ConvertError> {
        let _ = request;
        Err(self.unsupported("request encoding"))
    }

    /// Decode an upstream unary response
    fn to_canonical_response(&self, response: NativeResponse) -> Result<CompletionResponse, ConvertError> {
        drop(response);
        Err(self.unsupported("response decoding"))
    }

    /// Encode a unary response for the client
    fn from_canonical_response(&self, response: &CompletionResponse) -> Result<NativeResponse, ConvertError> {
        let _ = response;
        Err(self.unsupported("response encoding"))
    }

    /// Fresh per-exchange stream state
    fn new_stream_state(&self) -> StreamState;

    /// Decode one upstream stream frame
    ///
    /// Frames of another protocol or that carry nothing are skipped.
    fn next_canonical_chunk(&self, chunk: NativeChunk, state: &mut StreamState) -> Vec<StreamEvent> {
        let _ = state;
        tracing::debug!(protocol = %self.protocol(), chunk = %chunk.protocol(), "converter does not decode streams");
        Vec::new()
    }

    /// Flush buffered content and emit the terminal chunk if none was sent
    fn finish_stream(&self, state: &mut StreamState) -> Vec<StreamEvent> {
        let _ = state;
        vec![StreamEvent::Done]
    }

    /// Encode one canonical chunk for the client
    fn from_canonical_chunk(&self, event: &StreamEvent, state: &mut StreamState) -> Result<Vec<NativeChunk>, ConvertError> {
        let _ = (event, state);
        Err(self.unsupported("stream encoding"))
    }

    fn unsupported(&self, operation: &'static str) -> ConvertError {
        ConvertError::Unsupported {
            protocol: self.protocol(),
            operation,
        }
    }
}

/// Per-exchange streaming state, one variant per protocol
#[derive(Debug)]
pub enum StreamState {
    OpenAi(openai::OpenAiStreamState),
    OpenAiResponses(openai_responses::ResponsesStreamState),
    Anthropic(anthropic::AnthropicStreamState),
    Gemini(google::GeminiStreamState),
    Grok(grok::GrokStreamState),
    Kiro(kiro::KiroStreamState),
}

impl StreamState {
    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::OpenAi(_) => Protocol::OpenAi,
            Self::OpenAiResponses(_) => Protocol::OpenAiResponses,
            Self::Anthropic(_) => Protocol::Anthropic,
            Self::Gemini(_) => Protocol::Gemini,
            Self::Grok(_) => Protocol::Grok,
            Self::Kiro(_) => Protocol::Kiro,
        }
    }

    /// Model name reported in encoded chunks
    pub fn set_model(&mut self, model: &str) {
        let slot = match self {
            Self::OpenAi(state) => &mut state.model,
            Self::OpenAiResponses(state) => &mut state.model,
            Self::Anthropic(state) => &mut state.model,
            Self::Gemini(state) => &mut state.model,
            Self::Grok(state) => &mut state.model,
            Self::Kiro(state) => &mut state.model,
        };
        model.clone_into(slot);
    }
}

pub(crate) fn mismatch(expected: Protocol, found: Protocol) -> ConvertError {
    ConvertError::ProtocolMismatch { expected, found }
}

pub(crate) fn skip_foreign_chunk(expected: Protocol, found: Protocol) -> Vec<StreamEvent> {
    tracing::debug!(%expected, %found, "skipping stream chunk of another protocol");
    Vec::new()
}

pub(crate) fn skip_foreign_state(expected: Protocol, found: Protocol) -> Vec<StreamEvent> {
    tracing::debug!(%expected, %found, "stream state belongs to another protocol");
    Vec::new()
}

/// Identifier with a protocol-specific prefix
pub(crate) fn new_id(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple())
}

/// `OpenAI` finish reason spelling, shared by the `OpenAI`-shaped protocols
pub(crate) fn parse_finish_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "stop" | "end_turn" | "stop_sequence" => Some(FinishReason::Stop),
        "length" | "max_tokens" => Some(FinishReason::Length),
        "tool_calls" | "tool_use" | "function_call" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

/// Deltas for parsed thinking-tag segments
pub(crate) fn segment_events(segments: Vec<Segment>) -> impl Iterator<Item = StreamEvent> {
    segments
        .into_iter()
        .filter(|segment| !segment.content.is_empty())
        .map(|segment| match segment.kind {
            SegmentKind::Thinking => StreamEvent::Delta(StreamDelta::reasoning(segment.content)),
            SegmentKind::Text => StreamEvent::Delta(StreamDelta::text(segment.content)),
        })
}

/// Tool calls rebuilt from streamed fragments, keyed by stream index
#[derive(Debug, Default)]
pub(crate) struct ToolCallBuffer {
    calls: Vec<(u32, ToolCall)>,
}

impl ToolCallBuffer {
    /// Fold a fragment in; returns true when it opened a new call
    pub(crate) fn apply(&mut self, fragment: &StreamToolCall) -> bool {
        let function = fragment.function.as_ref();
        let arguments = function.and_then(|f| f.arguments.as_deref()).unwrap_or_default();

        if let Some((_, call)) = self.calls.iter_mut().find(|(index, _)| *index == fragment.index) {
            call.arguments.push_str(arguments);
            if let Some(name) = function.and_then(|f| f.name.as_deref()) {
                name.clone_into(&mut call.name);
            }
            return false;
        }

        self.calls.push((
            fragment.index,
            ToolCall {
                id: fragment.id.clone().unwrap_or_else(|| new_id("call_")),
                name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
                arguments: arguments.to_owned(),
            },
        ));
        true
    }

    pub(crate) fn get(&self, index: u32) -> Option<&ToolCall> {
        self.calls.iter().find(|(i, _)| *i == index).map(|(_, call)| call)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calls in arrival order; empty argument strings become `{}`
    pub(crate) fn take(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
            .into_iter()
            .map(|(_, mut call)| {
                if call.arguments.trim().is_empty() {
                    "{}".clone_into(&mut call.arguments);
                }
                call
            })
            .collect()
    }
}

/// Folds canonical stream events into a unary response
#[derive(Debug, Default)]
pub(crate) struct ResponseAccumulator {
    message: ChoiceMessage,
    tool_calls: ToolCallBuffer,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl ResponseAccumulator {
    pub(crate) fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Delta(delta) => {
                if let Some(text) = &delta.content {
                    self.message.push_text(text);
                }
                if let Some(reasoning) = &delta.reasoning {
                    self.message.push_reasoning(reasoning);
                }
                if let Some(fragment) = &delta.tool_call {
                    self.tool_calls.apply(fragment);
                }
                if let Some(reason) = delta.finish_reason {
                    self.finish_reason = Some(reason);
                }
            }
            StreamEvent::Usage(usage) => self.usage = Some(*usage),
            StreamEvent::Done | StreamEvent::Error(_) => {}
        }
    }

    pub(crate) fn finish(mut self, id: String, model: String) -> CompletionResponse {
        self.message.tool_calls = self.tool_calls.take();
        let finish_reason = self.finish_reason.or(Some(if self.message.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        }));

        CompletionResponse::single(id, model, self.message, finish_reason, self.usage)
    }
}
