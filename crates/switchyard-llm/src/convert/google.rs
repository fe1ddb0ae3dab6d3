//! Conversion between canonical types and the Gemini `generateContent` API

use serde_json::{Value, json};

use super::{
    ConvertError, ConverterRole, ProtocolConverter, StreamState, ToolCallBuffer, mismatch, new_id,
    skip_foreign_chunk, skip_foreign_state,
};
use crate::error::ErrorKind;
use crate::protocol::google::{
    GoogleCandidate, GoogleContent, GoogleErrorDetail, GoogleErrorResponse, GoogleFileData, GoogleFunctionCall,
    GoogleFunctionCallingConfig, GoogleFunctionDeclaration, GoogleFunctionResponse, GoogleGenerationConfig,
    GoogleInlineData, GooglePart, GoogleRequest, GoogleResponse, GoogleStreamFrame, GoogleThinkingConfig, GoogleTool,
    GoogleToolConfig, GoogleUsageMetadata,
};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};
use crate::types::message::parse_data_uri;
use crate::types::{
    ChoiceMessage, CompletionParams, CompletionRequest, CompletionResponse, ContentPart, FinishReason, Message,
    ReasoningConfig, Role, StreamDelta, StreamEvent, StreamFailure, ToolCall, ToolChoice, ToolDefinition, Usage,
};

/// Gemini `generateContent`, on both sides of the gateway
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiConverter;

/// Stream state for Gemini chunks
#[derive(Debug)]
pub struct GeminiStreamState {
    pub(super) model: String,
    response_id: String,

    next_tool_call_index: u32,
    saw_tool_call: bool,
    pending_usage: Option<Usage>,

    tool_calls: ToolCallBuffer,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,

    terminated: bool,
}

impl GeminiStreamState {
    fn new() -> Self {
        Self {
            model: String::new(),
            response_id: new_id(""),
            next_tool_call_index: 0,
            saw_tool_call: false,
            pending_usage: None,
            tool_calls: ToolCallBuffer::default(),
            finish_reason: None,
            usage: None,
            terminated: false,
        }
    }

    fn decode(&mut self, response: GoogleResponse) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        // usage is cumulative on every chunk; only the last value matters
        if let Some(metadata) = response.usage_metadata {
            self.pending_usage = Some(usage_from_metadata(&metadata));
        }

        let Some(candidate) = response.candidates.into_iter().next() else {
            return events;
        };

        for part in candidate.content.parts {
            if let Some(call) = part.function_call {
                let index = self.next_tool_call_index;
                self.next_tool_call_index += 1;
                self.saw_tool_call = true;

                let call = tool_call_from_wire(call);
                events.push(StreamEvent::Delta(StreamDelta::tool_call_start(index, call.id, call.name)));
                events.push(StreamEvent::Delta(StreamDelta::tool_call_arguments(index, call.arguments)));
                continue;
            }

            match part.text {
                Some(text) if text.is_empty() => {}
                Some(text) if part.thought.unwrap_or(false) => {
                    events.push(StreamEvent::Delta(StreamDelta::reasoning(text)));
                }
                Some(text) => events.push(StreamEvent::Delta(StreamDelta::text(text))),
                None => {}
            }
        }

        if let Some(reason) = candidate.finish_reason.as_deref().and_then(parse_finish_reason) {
            let reason = if reason == FinishReason::Stop && self.saw_tool_call {
                FinishReason::ToolCalls
            } else {
                reason
            };
            events.push(StreamEvent::Delta(StreamDelta::finish(reason)));
            events.extend(self.pending_usage.take().map(StreamEvent::Usage));
        }

        events
    }

    fn encode(&mut self, event: &StreamEvent) -> Vec<GoogleStreamFrame> {
        match event {
            StreamEvent::Delta(delta) => {
                let mut parts = Vec::new();
                if let Some(reasoning) = &delta.reasoning {
                    parts.push(GooglePart {
                        thought: Some(true),
                        ..GooglePart::text(reasoning.clone())
                    });
                }
                if let Some(text) = &delta.content {
                    parts.push(GooglePart::text(text.clone()));
                }
                // function calls are emitted whole once their arguments are complete
                if let Some(call) = &delta.tool_call {
                    self.tool_calls.apply(call);
                }
                if let Some(reason) = delta.finish_reason {
                    self.finish_reason = Some(reason);
                }

                if parts.is_empty() {
                    return Vec::new();
                }
                vec![GoogleStreamFrame::Chunk(self.chunk(parts, None, None))]
            }
            StreamEvent::Usage(usage) => {
                self.usage = Some(*usage);
                Vec::new()
            }
            StreamEvent::Done => {
                self.terminated = true;
                let parts = self.tool_calls.take().iter().map(function_call_part).collect();
                let reason = self.finish_reason.unwrap_or(FinishReason::Stop);
                let usage = self.usage.map(|usage| metadata_from_usage(&usage));
                vec![GoogleStreamFrame::Chunk(self.chunk(parts, Some(reason), usage))]
            }
            StreamEvent::Error(failure) => {
                self.terminated = true;
                vec![GoogleStreamFrame::Error(error_body(failure))]
            }
        }
    }

    fn chunk(
        &self,
        parts: Vec<GooglePart>,
        finish_reason: Option<FinishReason>,
        usage_metadata: Option<GoogleUsageMetadata>,
    ) -> GoogleResponse {
        GoogleResponse {
            candidates: vec![GoogleCandidate {
                content: GoogleContent {
                    role: Some("model".to_owned()),
                    parts,
                },
                finish_reason: finish_reason.map(|reason| wire_finish_reason(reason).to_owned()),
                index: Some(0),
            }],
            usage_metadata,
            model_version: Some(self.model.clone()),
            response_id: Some(self.response_id.clone()),
        }
    }
}

impl ProtocolConverter for GeminiConverter {
    fn protocol(&self) -> Protocol {
        Protocol::Gemini
    }

    fn roles(&self) -> ConverterRole {
        ConverterRole::Both
    }

    fn to_canonical_request(&self, request: NativeRequest) -> Result<CompletionRequest, ConvertError> {
        let found = request.protocol();
        let NativeRequest::Gemini { model, request } = request else {
            return Err(mismatch(Protocol::Gemini, found));
        };
        if request.contents.is_empty() {
            return Err(ConvertError::MissingField("contents"));
        }

        Ok(canonical_request(model, request))
    }

    fn from_canonical_request(&self, request: &CompletionRequest) -> Result<NativeRequest, ConvertError> {
        Ok(NativeRequest::Gemini {
            model: request.model.clone(),
            request: request.into(),
        })
    }

    fn to_canonical_response(&self, response: NativeResponse) -> Result<CompletionResponse, ConvertError> {
        let found = response.protocol();
        let NativeResponse::Gemini(response) = response else {
            return Err(mismatch(Protocol::Gemini, found));
        };

        canonical_response(response)
    }

    fn from_canonical_response(&self, response: &CompletionResponse) -> Result<NativeResponse, ConvertError> {
        let choice = response.first().ok_or(ConvertError::MissingField("choices"))?;
        let message = &choice.message;

        let mut parts = Vec::new();
        if let Some(reasoning) = message.reasoning_content.clone().filter(|r| !r.is_empty()) {
            parts.push(GooglePart {
                thought: Some(true),
                ..GooglePart::text(reasoning)
            });
        }
        if let Some(text) = message.content.clone().filter(|t| !t.is_empty()) {
            parts.push(GooglePart::text(text));
        }
        parts.extend(message.tool_calls.iter().map(function_call_part));

        Ok(NativeResponse::Gemini(GoogleResponse {
            candidates: vec![GoogleCandidate {
                content: GoogleContent {
                    role: Some("model".to_owned()),
                    parts,
                },
                finish_reason: Some(wire_finish_reason(choice.finish_reason.unwrap_or(FinishReason::Stop)).to_owned()),
                index: Some(0),
            }],
            usage_metadata: response.usage.as_ref().map(metadata_from_usage),
            model_version: Some(response.model.clone()),
            response_id: Some(response.id.clone()),
        }))
    }

    fn new_stream_state(&self) -> StreamState {
        StreamState::Gemini(GeminiStreamState::new())
    }

    fn next_canonical_chunk(&self, chunk: NativeChunk, state: &mut StreamState) -> Vec<StreamEvent> {
        let found = chunk.protocol();
        let NativeChunk::Gemini(frame) = chunk else {
            return skip_foreign_chunk(Protocol::Gemini, found);
        };
        let found = state.protocol();
        let StreamState::Gemini(state) = state else {
            return skip_foreign_state(Protocol::Gemini, found);
        };
        if state.terminated {
            return Vec::new();
        }

        match frame {
            GoogleStreamFrame::Chunk(response) => state.decode(response),
            GoogleStreamFrame::Error(error) => {
                state.terminated = true;
                let kind = match error.error.code {
                    401 | 403 => ErrorKind::Auth,
                    400 | 404 => ErrorKind::Protocol,
                    _ => ErrorKind::Transport,
                };
                vec![StreamEvent::Error(StreamFailure::new(kind, error.error.message))]
            }
        }
    }

    /// Gemini streams end with the body; there is no terminal frame
    fn finish_stream(&self, state: &mut StreamState) -> Vec<StreamEvent> {
        let StreamState::Gemini(state) = state else {
            return Vec::new();
        };
        if state.terminated {
            return Vec::new();
        }

        state.terminated = true;
        let mut events: Vec<StreamEvent> = state.pending_usage.take().map(StreamEvent::Usage).into_iter().collect();
        events.push(StreamEvent::Done);
        events
    }

    fn from_canonical_chunk(&self, event: &StreamEvent, state: &mut StreamState) -> Result<Vec<NativeChunk>, ConvertError> {
        let found = state.protocol();
        let StreamState::Gemini(state) = state else {
            return Err(mismatch(Protocol::Gemini, found));
        };
        if state.terminated {
            return Ok(Vec::new());
        }

        Ok(state.encode(event).into_iter().map(NativeChunk::Gemini).collect())
    }
}

/// Error body in the Google API shape
pub fn error_body(failure: &StreamFailure) -> GoogleErrorResponse {
    let (code, status) = match failure.kind {
        ErrorKind::Auth => (401, "UNAUTHENTICATED"),
        ErrorKind::InvalidRequest => (400, "INVALID_ARGUMENT"),
        ErrorKind::Protocol | ErrorKind::Configuration => (500, "INTERNAL"),
        ErrorKind::Transport | ErrorKind::PoolExhausted => (503, "UNAVAILABLE"),
    };

    GoogleErrorResponse {
        error: GoogleErrorDetail {
            code,
            message: failure.message.clone(),
            status: status.to_owned(),
            kind: Some(failure.kind.as_str().to_owned()),
            fallback_attempted: Some(failure.fallback_attempted),
        },
    }
}

fn parse_finish_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "STOP" => Some(FinishReason::Stop),
        "MAX_TOKENS" => Some(FinishReason::Length),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => Some(FinishReason::ContentFilter),
        "FINISH_REASON_UNSPECIFIED" => None,
        _ => Some(FinishReason::Stop),
    }
}

const fn wire_finish_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ToolCalls => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ContentFilter => "SAFETY",
    }
}

/// Gemini carries no call ids; calls are keyed by function name
fn tool_call_from_wire(call: GoogleFunctionCall) -> ToolCall {
    let id = call.id.unwrap_or_else(|| format!("call_{}", call.name));
    ToolCall::from_value(id, call.name, &call.args)
}

fn function_call_part(call: &ToolCall) -> GooglePart {
    GooglePart {
        function_call: Some(GoogleFunctionCall {
            id: None,
            name: call.name.clone(),
            args: call.arguments_value(),
        }),
        ..GooglePart::default()
    }
}

fn usage_from_metadata(metadata: &GoogleUsageMetadata) -> Usage {
    let completion = metadata
        .candidates_token_count
        .saturating_add(metadata.thoughts_token_count.unwrap_or(0));
    Usage::new(metadata.prompt_token_count, completion)
}

const fn metadata_from_usage(usage: &Usage) -> GoogleUsageMetadata {
    GoogleUsageMetadata {
        prompt_token_count: usage.prompt_tokens,
        candidates_token_count: usage.completion_tokens,
        thoughts_token_count: None,
        total_token_count: usage.total_tokens,
    }
}

// -- Inbound: Gemini wire format -> canonical types --

fn canonical_request(model: String, request: GoogleRequest) -> CompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = request.system_instruction {
        let text = joined_text(&system.parts);
        if !text.is_empty() {
            messages.push(Message::text(Role::System, text));
        }
    }
    for content in request.contents {
        push_canonical_messages(content, &mut messages);
    }

    let config = request.generation_config.unwrap_or_default();
    let reasoning = config
        .thinking_config
        .as_ref()
        .and_then(|thinking| thinking.thinking_budget)
        .filter(|budget| *budget > 0)
        .map(|budget_tokens| ReasoningConfig::Enabled { budget_tokens });

    CompletionRequest {
        model,
        messages,
        params: CompletionParams {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_tokens: config.max_output_tokens,
            stop: config.stop_sequences,
            frequency_penalty: None,
            presence_penalty: None,
            seed: config.seed,
        },
        tools: request
            .tools
            .unwrap_or_default()
            .into_iter()
            .flat_map(|tool| tool.function_declarations)
            .map(|declaration| ToolDefinition {
                name: declaration.name,
                description: declaration.description,
                parameters: declaration.parameters.unwrap_or_else(crate::types::tool::empty_schema),
            })
            .collect(),
        tool_choice: request.tool_config.map(|config| tool_choice_from_wire(config.function_calling_config)),
        reasoning,
        stream: false,
    }
}

fn joined_text(parts: &[GooglePart]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_thought())
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_canonical_messages(content: GoogleContent, out: &mut Vec<Message>) {
    let role = match content.role.as_deref() {
        Some("model") => Role::Assistant,
        _ => Role::User,
    };

    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for part in content.parts {
        if let Some(call) = part.function_call {
            tool_calls.push(tool_call_from_wire(call));
        } else if let Some(response) = part.function_response {
            out.push(tool_result_message(response));
        } else if let Some(inline) = part.inline_data {
            parts.push(inline_part(inline));
        } else if let Some(file) = part.file_data {
            let is_image = file.mime_type.as_deref().is_some_and(|mime| mime.starts_with("image/"));
            parts.push(if is_image {
                ContentPart::Image {
                    url: file.file_uri,
                    detail: None,
                }
            } else {
                ContentPart::File {
                    data: file.file_uri,
                    filename: None,
                }
            });
        } else if let Some(text) = part.text.filter(|_| !part.thought.unwrap_or(false)) {
            parts.push(ContentPart::Text { text });
        }
    }

    if !parts.is_empty() || !tool_calls.is_empty() {
        out.push(Message {
            role,
            content: parts,
            name: None,
            tool_calls,
            tool_call_id: None,
        });
    }
}

fn tool_result_message(response: GoogleFunctionResponse) -> Message {
    let id = response.id.unwrap_or_else(|| format!("call_{}", response.name));
    let text = match response.response {
        Value::String(text) => text,
        Value::Object(mut object) if object.len() == 1 && object.contains_key("result") => match object.remove("result") {
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
            None => String::new(),
        },
        other => other.to_string(),
    };

    Message {
        name: Some(response.name),
        ..Message::tool_result(id, text)
    }
}

fn inline_part(inline: GoogleInlineData) -> ContentPart {
    let mime = inline.mime_type;
    if let Some(format) = mime.strip_prefix("audio/") {
        return ContentPart::Audio {
            format: format.to_owned(),
            data: inline.data,
        };
    }

    let url = format!("data:{mime};base64,{}", inline.data);
    if mime.starts_with("image/") {
        ContentPart::Image { url, detail: None }
    } else {
        ContentPart::File {
            data: url,
            filename: None,
        }
    }
}

fn tool_choice_from_wire(config: GoogleFunctionCallingConfig) -> ToolChoice {
    match config.mode.as_str() {
        "NONE" => ToolChoice::None,
        "ANY" => match config.allowed_function_names.as_deref() {
            Some([name]) => ToolChoice::Function(name.clone()),
            _ => ToolChoice::Required,
        },
        _ => ToolChoice::Auto,
    }
}

fn canonical_response(response: GoogleResponse) -> Result<CompletionResponse, ConvertError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(ConvertError::MissingField("candidates"))?;

    let mut message = ChoiceMessage::default();
    for part in candidate.content.parts {
        if let Some(call) = part.function_call {
            message.tool_calls.push(tool_call_from_wire(call));
        } else if let Some(text) = part.text {
            if part.thought.unwrap_or(false) {
                message.push_reasoning(&text);
            } else {
                message.push_text(&text);
            }
        }
    }

    let finish_reason = match candidate.finish_reason.as_deref().and_then(parse_finish_reason) {
        Some(FinishReason::Stop) | None if !message.tool_calls.is_empty() => Some(FinishReason::ToolCalls),
        reason => reason,
    };

    Ok(CompletionResponse::single(
        response.response_id.unwrap_or_else(|| new_id("")),
        response.model_version.unwrap_or_default(),
        message,
        finish_reason,
        response.usage_metadata.as_ref().map(usage_from_metadata),
    ))
}

// -- Outbound: canonical types -> Gemini wire format --

impl From<&CompletionRequest> for GoogleRequest {
    fn from(request: &CompletionRequest) -> Self {
        let mut contents: Vec<GoogleContent> = Vec::new();
        for message in request.conversation() {
            let role = if message.role == Role::Assistant { "model" } else { "user" };
            let parts = wire_parts(message, request);
            if parts.is_empty() {
                continue;
            }

            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
                _ => contents.push(GoogleContent {
                    role: Some(role.to_owned()),
                    parts,
                }),
            }
        }

        let declarations: Vec<GoogleFunctionDeclaration> = request
            .tools
            .iter()
            .map(|tool| GoogleFunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: Some(tool.parameters.clone()),
            })
            .collect();

        Self {
            contents,
            system_instruction: request.system_prompt().map(|text| GoogleContent {
                role: None,
                parts: vec![GooglePart::text(text)],
            }),
            generation_config: Some(GoogleGenerationConfig {
                temperature: request.params.temperature,
                top_p: request.params.top_p,
                top_k: request.params.top_k,
                max_output_tokens: request.params.max_tokens,
                stop_sequences: request.params.stop.clone(),
                seed: request.params.seed,
                thinking_config: request.reasoning.map(|reasoning| GoogleThinkingConfig {
                    thinking_budget: Some(reasoning.budget_tokens()),
                    include_thoughts: Some(true),
                }),
            }),
            tools: (!declarations.is_empty()).then(|| {
                vec![GoogleTool {
                    function_declarations: declarations,
                }]
            }),
            tool_config: request.tool_choice.as_ref().map(tool_choice_to_wire),
        }
    }
}

fn wire_parts(message: &Message, request: &CompletionRequest) -> Vec<GooglePart> {
    if message.role == Role::Tool {
        let id = message.tool_call_id.as_deref().unwrap_or_default();
        let name = message
            .name
            .as_deref()
            .or_else(|| request.tool_name_for(id))
            .unwrap_or("unknown");
        let text = message.text_content();
        let response = match serde_json::from_str::<Value>(&text) {
            Ok(object @ Value::Object(_)) => object,
            _ => json!({"result": text}),
        };

        return vec![GooglePart {
            function_response: Some(GoogleFunctionResponse {
                id: None,
                name: name.to_owned(),
                response,
            }),
            ..GooglePart::default()
        }];
    }

    let mut parts: Vec<GooglePart> = message.content.iter().filter_map(wire_part).collect();
    parts.extend(message.tool_calls.iter().map(function_call_part));
    parts
}

fn wire_part(part: &ContentPart) -> Option<GooglePart> {
    let (reference, default_mime) = match part {
        ContentPart::Text { text } if text.is_empty() => return None,
        ContentPart::Text { text } => return Some(GooglePart::text(text.clone())),
        ContentPart::Audio { data, format } => {
            return Some(GooglePart {
                inline_data: Some(GoogleInlineData {
                    mime_type: format!("audio/{format}"),
                    data: data.clone(),
                }),
                ..GooglePart::default()
            });
        }
        ContentPart::Image { url, .. } => (url, "image/png"),
        ContentPart::File { data, .. } => (data, "application/pdf"),
    };

    if let Some((mime, data)) = parse_data_uri(reference) {
        return Some(GooglePart {
            inline_data: Some(GoogleInlineData {
                mime_type: mime.to_owned(),
                data: data.to_owned(),
            }),
            ..GooglePart::default()
        });
    }

    Some(GooglePart {
        file_data: Some(GoogleFileData {
            mime_type: Some(default_mime.to_owned()),
            file_uri: reference.clone(),
        }),
        ..GooglePart::default()
    })
}

fn tool_choice_to_wire(choice: &ToolChoice) -> GoogleToolConfig {
    let (mode, allowed_function_names) = match choice {
        ToolChoice::None => ("NONE", None),
        ToolChoice::Auto => ("AUTO", None),
        ToolChoice::Required => ("ANY", None),
        ToolChoice::Function(name) => ("ANY", Some(vec![name.clone()])),
    };

    GoogleToolConfig {
        function_calling_config: GoogleFunctionCallingConfig {
            mode: mode.to_owned(),
            allowed_function_names,
        },
    }
}
