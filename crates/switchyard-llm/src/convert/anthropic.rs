//! Conversion between canonical types and the Anthropic Messages API

use serde_json::{Value, json};

use super::{
    ConvertError, ConverterRole, ProtocolConverter, StreamState, mismatch, new_id, parse_finish_reason,
    skip_foreign_chunk, skip_foreign_state,
};
use crate::error::ErrorKind;
use crate::protocol::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicErrorDetail, AnthropicMessage, AnthropicMessageDelta,
    AnthropicRequest, AnthropicResponse, AnthropicResponseBlock, AnthropicSource, AnthropicStreamContentBlock,
    AnthropicStreamDelta, AnthropicStreamEvent, AnthropicStreamMessage, AnthropicSystem, AnthropicTool,
    AnthropicToolChoice, AnthropicUsage,
};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};
use crate::types::message::parse_data_uri;
use crate::types::{
    ChoiceMessage, CompletionParams, CompletionRequest, CompletionResponse, ContentPart, FinishReason, Message,
    ReasoningConfig, Role, StreamDelta, StreamEvent, StreamFailure, ToolCall, ToolChoice, ToolDefinition, Usage,
};

/// `max_tokens` is mandatory on the Messages API
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages, on both sides of the gateway
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicConverter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Thinking,
    Text,
    ToolUse,
}

/// Stream state for Anthropic events
#[derive(Debug)]
pub struct AnthropicStreamState {
    pub(super) model: String,

    /// Sequential 0-based index of the tool call currently being decoded
    ///
    /// Content block indices are shared by every block type, so a tool use
    /// after a text block would otherwise open at index 1.
    current_tool_call_index: u32,
    next_tool_call_index: u32,
    input_tokens: u32,

    message_id: String,
    message_started: bool,
    open_block: Option<(u32, BlockKind)>,
    next_block_index: u32,
    stop_reason: Option<FinishReason>,
    usage: Option<Usage>,

    terminated: bool,
}

impl AnthropicStreamState {
    fn new() -> Self {
        Self {
            model: String::new(),
            current_tool_call_index: 0,
            next_tool_call_index: 0,
            input_tokens: 0,
            message_id: new_id("msg_"),
            message_started: false,
            open_block: None,
            next_block_index: 0,
            stop_reason: None,
            usage: None,
            terminated: false,
        }
    }

    fn decode(&mut self, event: AnthropicStreamEvent) -> Vec<StreamEvent> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens;
                }
                Vec::new()
            }
            AnthropicStreamEvent::Ping | AnthropicStreamEvent::ContentBlockStop { .. } => Vec::new(),

            AnthropicStreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                AnthropicStreamContentBlock::Thinking { thinking } if !thinking.is_empty() => {
                    vec![StreamEvent::Delta(StreamDelta::reasoning(thinking))]
                }
                AnthropicStreamContentBlock::Text { text } if !text.is_empty() => {
                    vec![StreamEvent::Delta(StreamDelta::text(text))]
                }
                AnthropicStreamContentBlock::ToolUse { id, name, .. } => {
                    self.current_tool_call_index = self.next_tool_call_index;
                    self.next_tool_call_index += 1;
                    vec![StreamEvent::Delta(StreamDelta::tool_call_start(
                        self.current_tool_call_index,
                        id,
                        name,
                    ))]
                }
                AnthropicStreamContentBlock::Thinking { .. } | AnthropicStreamContentBlock::Text { .. } => Vec::new(),
            },

            AnthropicStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                AnthropicStreamDelta::ThinkingDelta { thinking } => {
                    vec![StreamEvent::Delta(StreamDelta::reasoning(thinking))]
                }
                AnthropicStreamDelta::TextDelta { text } => vec![StreamEvent::Delta(StreamDelta::text(text))],
                AnthropicStreamDelta::InputJsonDelta { partial_json } => vec![StreamEvent::Delta(
                    StreamDelta::tool_call_arguments(self.current_tool_call_index, partial_json),
                )],
                AnthropicStreamDelta::SignatureDelta { .. } => Vec::new(),
            },

            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let mut events = Vec::new();
                if let Some(reason) = delta.stop_reason.as_deref().and_then(parse_finish_reason) {
                    events.push(StreamEvent::Delta(StreamDelta::finish(reason)));
                }
                if let Some(usage) = usage {
                    let input_tokens = usage.input_tokens.max(self.input_tokens);
                    events.push(StreamEvent::Usage(Usage::new(input_tokens, usage.output_tokens)));
                }
                events
            }

            AnthropicStreamEvent::MessageStop => {
                self.terminated = true;
                vec![StreamEvent::Done]
            }

            AnthropicStreamEvent::Error { error } => {
                self.terminated = true;
                let kind = match error.error_type.as_str() {
                    "authentication_error" | "permission_error" => ErrorKind::Auth,
                    "invalid_request_error" | "not_found_error" => ErrorKind::Protocol,
                    _ => ErrorKind::Transport,
                };
                vec![StreamEvent::Error(StreamFailure::new(kind, error.message))]
            }
        }
    }

    fn encode(&mut self, event: &StreamEvent) -> Vec<AnthropicStreamEvent> {
        let mut out = Vec::new();

        if !self.message_started && !matches!(event, StreamEvent::Error(_)) {
            self.message_started = true;
            out.push(AnthropicStreamEvent::MessageStart {
                message: AnthropicStreamMessage {
                    id: self.message_id.clone(),
                    message_type: "message".to_owned(),
                    role: "assistant".to_owned(),
                    model: self.model.clone(),
                    content: Vec::new(),
                    usage: Some(AnthropicUsage::default()),
                },
            });
        }

        match event {
            StreamEvent::Delta(delta) => {
                if let Some(reasoning) = &delta.reasoning {
                    let index = self.ensure_block(BlockKind::Thinking, &mut out);
                    out.push(AnthropicStreamEvent::ContentBlockDelta {
                        index,
                        delta: AnthropicStreamDelta::ThinkingDelta {
                            thinking: reasoning.clone(),
                        },
                    });
                }
                if let Some(text) = &delta.content {
                    let index = self.ensure_block(BlockKind::Text, &mut out);
                    out.push(AnthropicStreamEvent::ContentBlockDelta {
                        index,
                        delta: AnthropicStreamDelta::TextDelta { text: text.clone() },
                    });
                }
                if let Some(call) = &delta.tool_call {
                    let function = call.function.as_ref();
                    if let Some(id) = &call.id {
                        self.close_block(&mut out);
                        let index = self.start_block(BlockKind::ToolUse);
                        out.push(AnthropicStreamEvent::ContentBlockStart {
                            index,
                            content_block: AnthropicStreamContentBlock::ToolUse {
                                id: id.clone(),
                                name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
                                input: json!({}),
                            },
                        });
                    }
                    if let Some(arguments) = function.and_then(|f| f.arguments.as_ref()).filter(|a| !a.is_empty()) {
                        let index = self.ensure_block(BlockKind::ToolUse, &mut out);
                        out.push(AnthropicStreamEvent::ContentBlockDelta {
                            index,
                            delta: AnthropicStreamDelta::InputJsonDelta {
                                partial_json: arguments.clone(),
                            },
                        });
                    }
                }
                if let Some(reason) = delta.finish_reason {
                    self.stop_reason = Some(reason);
                }
            }
            StreamEvent::Usage(usage) => self.usage = Some(*usage),
            StreamEvent::Done => {
                self.terminated = true;
                self.close_block(&mut out);
                let usage = self.usage.unwrap_or_default();
                out.push(AnthropicStreamEvent::MessageDelta {
                    delta: AnthropicMessageDelta {
                        stop_reason: Some(stop_reason(self.stop_reason.unwrap_or(FinishReason::Stop)).to_owned()),
                        stop_sequence: None,
                    },
                    usage: Some(AnthropicUsage {
                        input_tokens: usage.prompt_tokens,
                        output_tokens: usage.completion_tokens,
                    }),
                });
                out.push(AnthropicStreamEvent::MessageStop);
            }
            StreamEvent::Error(failure) => {
                self.terminated = true;
                out.push(AnthropicStreamEvent::Error {
                    error: error_detail(failure),
                });
            }
        }

        out
    }

    /// Index of an open block of `kind`, opening one if needed
    fn ensure_block(&mut self, kind: BlockKind, out: &mut Vec<AnthropicStreamEvent>) -> u32 {
        if let Some((index, open)) = self.open_block
            && open == kind
        {
            return index;
        }

        self.close_block(out);
        let index = self.start_block(kind);
        let content_block = match kind {
            BlockKind::Thinking => AnthropicStreamContentBlock::Thinking {
                thinking: String::new(),
            },
            BlockKind::Text => AnthropicStreamContentBlock::Text { text: String::new() },
            BlockKind::ToolUse => AnthropicStreamContentBlock::ToolUse {
                id: new_id("toolu_"),
                name: String::new(),
                input: json!({}),
            },
        };
        out.push(AnthropicStreamEvent::ContentBlockStart { index, content_block });
        index
    }

    fn start_block(&mut self, kind: BlockKind) -> u32 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        self.open_block = Some((index, kind));
        index
    }

    fn close_block(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if let Some((index, _)) = self.open_block.take() {
            out.push(AnthropicStreamEvent::ContentBlockStop { index });
        }
    }
}

impl ProtocolConverter for AnthropicConverter {
    fn protocol(&self) -> Protocol {
        Protocol::Anthropic
    }

    fn roles(&self) -> ConverterRole {
        ConverterRole::Both
    }

    fn to_canonical_request(&self, request: NativeRequest) -> Result<CompletionRequest, ConvertError> {
        let found = request.protocol();
        let NativeRequest::Anthropic(request) = request else {
            return Err(mismatch(Protocol::Anthropic, found));
        };
        if request.messages.is_empty() {
            return Err(ConvertError::MissingField("messages"));
        }

        Ok(request.into())
    }

    fn from_canonical_request(&self, request: &CompletionRequest) -> Result<NativeRequest, ConvertError> {
        Ok(NativeRequest::Anthropic(request.into()))
    }

    fn to_canonical_response(&self, response: NativeResponse) -> Result<CompletionResponse, ConvertError> {
        let found = response.protocol();
        let NativeResponse::Anthropic(response) = response else {
            return Err(mismatch(Protocol::Anthropic, found));
        };

        Ok(response.into())
    }

    fn from_canonical_response(&self, response: &CompletionResponse) -> Result<NativeResponse, ConvertError> {
        let choice = response.first().ok_or(ConvertError::MissingField("choices"))?;
        let message = &choice.message;

        let mut content = Vec::new();
        if let Some(thinking) = message.reasoning_content.clone().filter(|t| !t.is_empty()) {
            content.push(AnthropicResponseBlock::Thinking {
                thinking,
                signature: None,
            });
        }
        if let Some(text) = message.content.clone().filter(|t| !t.is_empty()) {
            content.push(AnthropicResponseBlock::Text { text });
        }
        content.extend(message.tool_calls.iter().map(|call| AnthropicResponseBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments_value(),
        }));

        let usage = response.usage.unwrap_or_default();
        Ok(NativeResponse::Anthropic(AnthropicResponse {
            id: response.id.clone(),
            response_type: "message".to_owned(),
            role: "assistant".to_owned(),
            content,
            model: response.model.clone(),
            stop_reason: Some(stop_reason(choice.finish_reason.unwrap_or(FinishReason::Stop)).to_owned()),
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        }))
    }

    fn new_stream_state(&self) -> StreamState {
        StreamState::Anthropic(AnthropicStreamState::new())
    }

    fn next_canonical_chunk(&self, chunk: NativeChunk, state: &mut StreamState) -> Vec<StreamEvent> {
        let found = chunk.protocol();
        let NativeChunk::Anthropic(event) = chunk else {
            return skip_foreign_chunk(Protocol::Anthropic, found);
        };
        let found = state.protocol();
        let StreamState::Anthropic(state) = state else {
            return skip_foreign_state(Protocol::Anthropic, found);
        };
        if state.terminated {
            return Vec::new();
        }

        state.decode(event)
    }

    fn finish_stream(&self, state: &mut StreamState) -> Vec<StreamEvent> {
        match state {
            StreamState::Anthropic(state) if !state.terminated => {
                state.terminated = true;
                vec![StreamEvent::Done]
            }
            _ => Vec::new(),
        }
    }

    fn from_canonical_chunk(&self, event: &StreamEvent, state: &mut StreamState) -> Result<Vec<NativeChunk>, ConvertError> {
        let found = state.protocol();
        let StreamState::Anthropic(state) = state else {
            return Err(mismatch(Protocol::Anthropic, found));
        };
        if state.terminated {
            return Ok(Vec::new());
        }

        Ok(state.encode(event).into_iter().map(NativeChunk::Anthropic).collect())
    }
}

/// Error detail for stream error events and error bodies
pub fn error_detail(failure: &StreamFailure) -> AnthropicErrorDetail {
    AnthropicErrorDetail {
        error_type: failure.kind.error_type().to_owned(),
        message: failure.message.clone(),
        kind: Some(failure.kind.as_str().to_owned()),
        fallback_attempted: Some(failure.fallback_attempted),
    }
}

const fn stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ContentFilter => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
    }
}

// -- Inbound: Anthropic wire format -> canonical types --

impl From<AnthropicRequest> for CompletionRequest {
    fn from(request: AnthropicRequest) -> Self {
        let mut messages = Vec::new();
        if let Some(system) = request.system.as_ref().map(AnthropicSystem::joined).filter(|s| !s.is_empty()) {
            messages.push(Message::text(Role::System, system));
        }
        for message in request.messages {
            push_canonical_messages(message, &mut messages);
        }

        Self {
            model: request.model,
            messages,
            params: CompletionParams {
                temperature: request.temperature,
                top_p: request.top_p,
                top_k: request.top_k,
                max_tokens: Some(request.max_tokens),
                stop: request.stop_sequences,
                frequency_penalty: None,
                presence_penalty: None,
                seed: None,
            },
            tools: request
                .tools
                .unwrap_or_default()
                .into_iter()
                .map(|tool| ToolDefinition {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                })
                .collect(),
            tool_choice: request.tool_choice.as_ref().and_then(tool_choice_from_wire),
            reasoning: request.thinking.as_ref().and_then(ReasoningConfig::from_value),
            stream: request.stream.unwrap_or(false),
        }
    }
}

/// One Anthropic message may hold several tool results; each becomes its own
/// canonical `tool` message
fn push_canonical_messages(message: AnthropicMessage, out: &mut Vec<Message>) {
    let role = Role::parse(&message.role).unwrap_or(Role::User);

    let blocks = match message.content {
        AnthropicContent::Text(text) => {
            out.push(Message::text(role, text));
            return;
        }
        AnthropicContent::Blocks(blocks) => blocks,
    };

    let mut content = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            AnthropicContentBlock::Text { text } => content.push(ContentPart::Text { text }),
            AnthropicContentBlock::Image { source } => content.push(ContentPart::Image {
                url: source_to_url(source),
                detail: None,
            }),
            AnthropicContentBlock::Document { source } => content.push(ContentPart::File {
                data: source_to_url(source),
                filename: None,
            }),
            AnthropicContentBlock::Thinking { .. } => {}
            AnthropicContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::from_value(id, name, &input));
            }
            AnthropicContentBlock::ToolResult {
                tool_use_id, content, ..
            } => {
                out.push(Message::tool_result(tool_use_id, tool_result_text(content.as_ref())));
            }
        }
    }

    if !content.is_empty() || !tool_calls.is_empty() {
        out.push(Message {
            role,
            content,
            name: None,
            tool_calls,
            tool_call_id: None,
        });
    }
}

fn source_to_url(source: AnthropicSource) -> String {
    match (source.source_type.as_str(), source.data) {
        ("base64", Some(data)) => {
            let mime = source.media_type.as_deref().unwrap_or("image/png");
            format!("data:{mime};base64,{data}")
        }
        (_, data) => source.url.or(data).unwrap_or_default(),
    }
}

/// Tool result content is a string or a list of text blocks
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

fn tool_choice_from_wire(choice: &AnthropicToolChoice) -> Option<ToolChoice> {
    match choice.choice_type.as_str() {
        "auto" => Some(ToolChoice::Auto),
        "any" => Some(ToolChoice::Required),
        "none" => Some(ToolChoice::None),
        "tool" => choice.name.clone().map(ToolChoice::Function),
        _ => None,
    }
}

impl From<AnthropicResponse> for CompletionResponse {
    fn from(response: AnthropicResponse) -> Self {
        let mut message = ChoiceMessage::default();
        for block in response.content {
            match block {
                AnthropicResponseBlock::Thinking { thinking, .. } => message.push_reasoning(&thinking),
                AnthropicResponseBlock::Text { text } => message.push_text(&text),
                AnthropicResponseBlock::ToolUse { id, name, input } => {
                    message.tool_calls.push(ToolCall::from_value(id, name, &input));
                }
            }
        }

        let finish_reason = response.stop_reason.as_deref().and_then(parse_finish_reason);
        let usage = Usage::new(response.usage.input_tokens, response.usage.output_tokens);

        Self::single(response.id, response.model, message, finish_reason, Some(usage))
    }
}

// -- Outbound: canonical types -> Anthropic wire format --

impl From<&CompletionRequest> for AnthropicRequest {
    fn from(request: &CompletionRequest) -> Self {
        let mut messages: Vec<AnthropicMessage> = Vec::new();
        for message in request.conversation() {
            let role = if message.role == Role::Assistant { "assistant" } else { "user" };
            let blocks = wire_blocks(message);
            if blocks.is_empty() {
                continue;
            }

            // consecutive same-role turns are merged; tool results ride on user turns
            match messages.last_mut() {
                Some(AnthropicMessage {
                    role: last_role,
                    content: AnthropicContent::Blocks(existing),
                }) if last_role == role => existing.extend(blocks),
                _ => messages.push(AnthropicMessage {
                    role: role.to_owned(),
                    content: AnthropicContent::Blocks(blocks),
                }),
            }
        }

        let mut max_tokens = request.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let thinking = request.reasoning.map(|reasoning| match reasoning {
            ReasoningConfig::Enabled { budget_tokens } => {
                // the thinking budget must stay below max_tokens
                if budget_tokens >= max_tokens {
                    max_tokens = budget_tokens.saturating_add(DEFAULT_MAX_TOKENS);
                }
                json!({"type": "enabled", "budget_tokens": budget_tokens})
            }
            ReasoningConfig::Adaptive { effort } => json!({"type": "adaptive", "effort": effort}),
        });

        let tools: Vec<AnthropicTool> = request
            .tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.parameters.clone(),
            })
            .collect();

        Self {
            model: request.model.clone(),
            max_tokens,
            system: request.system_prompt().map(AnthropicSystem::Text),
            messages,
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            top_k: request.params.top_k,
            stop_sequences: request.params.stop.clone(),
            stream: request.stream.then_some(true),
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice: request.tool_choice.as_ref().map(tool_choice_to_wire),
            thinking,
        }
    }
}

fn wire_blocks(message: &Message) -> Vec<AnthropicContentBlock> {
    if message.role == Role::Tool {
        return vec![AnthropicContentBlock::ToolResult {
            tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
            content: Some(Value::String(message.text_content())),
            is_error: None,
        }];
    }

    let mut blocks: Vec<AnthropicContentBlock> = message.content.iter().filter_map(wire_part).collect();
    blocks.extend(message.tool_calls.iter().map(|call| AnthropicContentBlock::ToolUse {
        id: call.id.clone(),
        name: call.name.clone(),
        input: call.arguments_value(),
    }));
    blocks
}

fn wire_part(part: &ContentPart) -> Option<AnthropicContentBlock> {
    match part {
        ContentPart::Text { text } if text.is_empty() => None,
        ContentPart::Text { text } => Some(AnthropicContentBlock::Text { text: text.clone() }),
        ContentPart::Image { url, .. } => Some(AnthropicContentBlock::Image {
            source: wire_source(url, "image/png"),
        }),
        ContentPart::File { data, .. } => Some(AnthropicContentBlock::Document {
            source: wire_source(data, "application/pdf"),
        }),
        ContentPart::Audio { format, .. } => {
            tracing::debug!(format = %format, "dropping audio part unsupported by anthropic");
            None
        }
    }
}

fn wire_source(reference: &str, default_mime: &str) -> AnthropicSource {
    if let Some((mime, data)) = parse_data_uri(reference) {
        return AnthropicSource {
            source_type: "base64".to_owned(),
            media_type: Some(mime.to_owned()),
            data: Some(data.to_owned()),
            url: None,
        };
    }

    if reference.starts_with("http://") || reference.starts_with("https://") {
        AnthropicSource {
            source_type: "url".to_owned(),
            media_type: None,
            data: None,
            url: Some(reference.to_owned()),
        }
    } else {
        AnthropicSource {
            source_type: "base64".to_owned(),
            media_type: Some(default_mime.to_owned()),
            data: Some(reference.to_owned()),
            url: None,
        }
    }
}

fn tool_choice_to_wire(choice: &ToolChoice) -> AnthropicToolChoice {
    let (choice_type, name) = match choice {
        ToolChoice::None => ("none", None),
        ToolChoice::Auto => ("auto", None),
        ToolChoice::Required => ("any", None),
        ToolChoice::Function(name) => ("tool", Some(name.clone())),
    };

    AnthropicToolChoice {
        choice_type: choice_type.to_owned(),
        name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EffortLevel;

    fn wire_request(body: Value) -> NativeRequest {
        NativeRequest::Anthropic(serde_json::from_value(body).unwrap())
    }

    fn event(body: Value) -> NativeChunk {
        NativeChunk::Anthropic(serde_json::from_value(body).unwrap())
    }

    fn decode_all(events: Vec<Value>) -> Vec<StreamEvent> {
        let converter = AnthropicConverter;
        let mut state = converter.new_stream_state();
        let mut out: Vec<StreamEvent> = events
            .into_iter()
            .flat_map(|body| converter.next_canonical_chunk(event(body), &mut state))
            .collect();
        out.extend(converter.finish_stream(&mut state));
        out
    }

    fn encode_all(events: &[StreamEvent]) -> Vec<&'static str> {
        let converter = AnthropicConverter;
        let mut state = converter.new_stream_state();
        events
            .iter()
            .flat_map(|event| converter.from_canonical_chunk(event, &mut state).unwrap())
            .map(|chunk| match chunk {
                NativeChunk::Anthropic(event) => event.event_type(),
                other => panic!("unexpected chunk {other:?}"),
            })
            .collect()
    }

    #[test]
    fn request_splits_tool_results_and_reads_thinking() {
        let request = AnthropicConverter
            .to_canonical_request(wire_request(json!({
                "model": "claude-sonnet-4",
                "max_tokens": 1024,
                "system": [{"type": "text", "text": "be terse"}],
                "thinking": {"type": "adaptive", "effort": "Medium"},
                "messages": [
                    {"role": "user", "content": "weather in Oslo and Rome?"},
                    {"role": "assistant", "content": [
                        {"type": "thinking", "thinking": "two lookups", "signature": "sig"},
                        {"type": "tool_use", "id": "toolu_1", "name": "weather", "input": {"city": "Oslo"}},
                        {"type": "tool_use", "id": "toolu_2", "name": "weather", "input": {"city": "Rome"}}
                    ]},
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "toolu_1", "content": "rain"},
                        {"type": "tool_result", "tool_use_id": "toolu_2", "content": [{"type": "text", "text": "sun"}]}
                    ]}
                ]
            })))
            .unwrap();

        assert_eq!(
            request.reasoning,
            Some(ReasoningConfig::Adaptive {
                effort: EffortLevel::Medium
            })
        );
        assert_eq!(request.system_prompt().as_deref(), Some("be terse"));
        assert_eq!(request.messages.len(), 5);
        assert_eq!(request.messages[2].tool_calls[1].arguments, r#"{"city":"Rome"}"#);
        assert_eq!(request.messages[3].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(request.messages[4].text_content(), "sun");
        assert_eq!(request.tool_name_for("toolu_2"), Some("weather"));
    }

    #[test]
    fn outbound_request_merges_tool_results_into_one_user_turn() {
        let mut request = CompletionRequest::new(
            "claude-sonnet-4",
            vec![
                Message::text(Role::System, "sys"),
                Message::text(Role::User, "go"),
                Message {
                    tool_calls: vec![
                        ToolCall {
                            id: "a".into(),
                            name: "f".into(),
                            arguments: "{}".into(),
                        },
                        ToolCall {
                            id: "b".into(),
                            name: "f".into(),
                            arguments: r#"{"x":1}"#.into(),
                        },
                    ],
                    ..Message::text(Role::Assistant, "calling")
                },
                Message::tool_result("a", "1"),
                Message::tool_result("b", "2"),
            ],
        );
        request.params.max_tokens = Some(1000);
        request.reasoning = Some(ReasoningConfig::Enabled { budget_tokens: 2048 });

        let NativeRequest::Anthropic(wire) = AnthropicConverter.from_canonical_request(&request).unwrap() else {
            panic!("expected an Anthropic request");
        };

        assert_eq!(wire.messages.len(), 3);
        assert_eq!(wire.system.unwrap().joined(), "sys");
        let AnthropicContent::Blocks(results) = &wire.messages[2].content else {
            panic!("expected blocks");
        };
        assert_eq!(results.len(), 2);
        assert!(wire.max_tokens > 2048);
        assert_eq!(wire.thinking, Some(json!({"type": "enabled", "budget_tokens": 2048})));
    }

    #[test]
    fn adaptive_thinking_from_openai_reaches_claude_as_adaptive() {
        let openai: crate::protocol::openai::OpenAiRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 512,
            "messages": [{"role": "user", "content": "hi"}],
            "extra_body": {"anthropic": {"thinking": {"type": "adaptive", "effort": "Medium"}}}
        }))
        .unwrap();
        let canonical = crate::convert::openai::OpenAiConverter
            .to_canonical_request(NativeRequest::OpenAi(openai))
            .unwrap();

        let NativeRequest::Anthropic(wire) = AnthropicConverter.from_canonical_request(&canonical).unwrap() else {
            panic!("expected an Anthropic request");
        };

        assert_eq!(wire.thinking, Some(json!({"type": "adaptive", "effort": "medium"})));
        assert_eq!(wire.max_tokens, 512);
    }

    #[test]
    fn response_partitions_thinking_text_and_tools() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4",
            "content": [
                {"type": "thinking", "thinking": "let me check", "signature": "s"},
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "weather", "input": {"city": "Oslo", "days": 2}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 20}
        }))
        .unwrap();

        let canonical = AnthropicConverter
            .to_canonical_response(NativeResponse::Anthropic(response))
            .unwrap();
        let choice = canonical.first().unwrap();

        assert_eq!(choice.message.reasoning_content.as_deref(), Some("let me check"));
        assert_eq!(choice.message.content.as_deref(), Some("Checking."));
        assert_eq!(choice.message.tool_calls[0].arguments, r#"{"city":"Oslo","days":2}"#);
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(canonical.usage, Some(Usage::new(10, 20)));

        let NativeResponse::Anthropic(back) = AnthropicConverter.from_canonical_response(&canonical).unwrap() else {
            panic!("expected an Anthropic response");
        };
        assert_eq!(back.content.len(), 3);
        assert_eq!(back.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn stream_tool_indices_are_sequential() {
        let events = decode_all(vec![
            json!({"type": "message_start", "message": {"id": "m", "type": "message", "role": "assistant", "model": "c", "usage": {"input_tokens": 9, "output_tokens": 0}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "hm"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "x"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "hi"}}),
            json!({"type": "content_block_start", "index": 2, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "f", "input": {}}}),
            json!({"type": "content_block_delta", "index": 2, "delta": {"type": "input_json_delta", "partial_json": "{}"}}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 4}}),
            json!({"type": "message_stop"}),
        ]);

        assert_eq!(events[0], StreamEvent::Delta(StreamDelta::reasoning("hm")));
        assert_eq!(events[1], StreamEvent::Delta(StreamDelta::text("hi")));
        assert_eq!(events[2], StreamEvent::Delta(StreamDelta::tool_call_start(0, "toolu_1", "f")));
        assert_eq!(events[3], StreamEvent::Delta(StreamDelta::tool_call_arguments(0, "{}")));
        assert_eq!(events[4], StreamEvent::Delta(StreamDelta::finish(FinishReason::ToolCalls)));
        assert_eq!(events[5], StreamEvent::Usage(Usage::new(9, 4)));
        assert_eq!(events[6], StreamEvent::Done);
        assert_eq!(events.len(), 7);
    }

    #[test]
    fn in_band_error_terminates_the_stream() {
        let events = decode_all(vec![
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "par"}}),
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "tial"}}),
        ]);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], StreamEvent::Error(failure) if failure.kind == ErrorKind::Transport));
    }

    #[test]
    fn encoder_opens_blocks_on_kind_change() {
        let kinds = encode_all(&[
            StreamEvent::Delta(StreamDelta::reasoning("a")),
            StreamEvent::Delta(StreamDelta::reasoning("b")),
            StreamEvent::Delta(StreamDelta::text("c")),
            StreamEvent::Delta(StreamDelta::tool_call_start(0, "call_1", "f")),
            StreamEvent::Delta(StreamDelta::tool_call_arguments(0, "{}")),
            StreamEvent::Delta(StreamDelta::finish(FinishReason::ToolCalls)),
            StreamEvent::Usage(Usage::new(1, 2)),
            StreamEvent::Done,
            StreamEvent::Done,
        ]);

        assert_eq!(
            kinds,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn encoder_error_is_the_only_terminal() {
        let kinds = encode_all(&[
            StreamEvent::Delta(StreamDelta::text("partial")),
            StreamEvent::Error(StreamFailure::new(ErrorKind::Transport, "reset")),
            StreamEvent::Done,
        ]);

        assert_eq!(
            kinds,
            ["message_start", "content_block_start", "content_block_delta", "error"]
        );
    }
}
