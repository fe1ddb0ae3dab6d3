//! Conversion between canonical types and `OpenAI` chat completions

use serde_json::{Value, json};

use super::{
    ConvertError, ConverterRole, ProtocolConverter, StreamState, mismatch, new_id, parse_finish_reason,
    skip_foreign_chunk, skip_foreign_state,
};
use crate::protocol::openai::{
    OpenAiChoice, OpenAiChoiceMessage, OpenAiContent, OpenAiContentPart, OpenAiErrorDetail, OpenAiErrorResponse,
    OpenAiFile, OpenAiFunction, OpenAiFunctionCall, OpenAiImageUrl, OpenAiInputAudio, OpenAiMessage, OpenAiRequest,
    OpenAiResponse, OpenAiStop, OpenAiStreamChoice, OpenAiStreamChunk, OpenAiStreamDelta, OpenAiStreamFrame,
    OpenAiStreamFunctionCall, OpenAiStreamOptions, OpenAiStreamToolCall, OpenAiTool, OpenAiToolCall, OpenAiUsage,
};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};
use crate::types::response::unix_now;
use crate::types::{
    Choice, ChoiceMessage, CompletionParams, CompletionRequest, CompletionResponse, ContentPart, Message,
    ReasoningConfig, Role, StreamDelta, StreamEvent, StreamFailure, StreamFunctionCall, StreamToolCall, ToolCall,
    ToolChoice, ToolDefinition, Usage, tool::empty_schema,
};

/// `OpenAI` chat completions, on both sides of the gateway
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiConverter;

/// Stream state for `OpenAI` chunks
#[derive(Debug)]
pub struct OpenAiStreamState {
    pub(super) model: String,
    id: String,
    created: u64,
    role_sent: bool,
    terminated: bool,
}

impl OpenAiStreamState {
    fn new() -> Self {
        Self {
            model: String::new(),
            id: new_id("chatcmpl-"),
            created: unix_now(),
            role_sent: false,
            terminated: false,
        }
    }

    fn chunk(&self, choices: Vec<OpenAiStreamChoice>, usage: Option<OpenAiUsage>) -> OpenAiStreamChunk {
        OpenAiStreamChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage,
        }
    }

    fn terminate(&mut self) -> bool {
        !std::mem::replace(&mut self.terminated, true)
    }
}

impl ProtocolConverter for OpenAiConverter {
    fn protocol(&self) -> Protocol {
        Protocol::OpenAi
    }

    fn roles(&self) -> ConverterRole {
        ConverterRole::Both
    }

    fn to_canonical_request(&self, request: NativeRequest) -> Result<CompletionRequest, ConvertError> {
        let found = request.protocol();
        let NativeRequest::OpenAi(request) = request else {
            return Err(mismatch(Protocol::OpenAi, found));
        };
        if request.messages.is_empty() {
            return Err(ConvertError::MissingField("messages"));
        }

        Ok(request.into())
    }

    fn from_canonical_request(&self, request: &CompletionRequest) -> Result<NativeRequest, ConvertError> {
        Ok(NativeRequest::OpenAi(request.into()))
    }

    fn to_canonical_response(&self, response: NativeResponse) -> Result<CompletionResponse, ConvertError> {
        let found = response.protocol();
        let NativeResponse::OpenAi(response) = response else {
            return Err(mismatch(Protocol::OpenAi, found));
        };
        if response.choices.is_empty() {
            return Err(ConvertError::MissingField("choices"));
        }

        Ok(response.into())
    }

    fn from_canonical_response(&self, response: &CompletionResponse) -> Result<NativeResponse, ConvertError> {
        Ok(NativeResponse::OpenAi(response.into()))
    }

    fn new_stream_state(&self) -> StreamState {
        StreamState::OpenAi(OpenAiStreamState::new())
    }

    fn next_canonical_chunk(&self, chunk: NativeChunk, state: &mut StreamState) -> Vec<StreamEvent> {
        let found = chunk.protocol();
        let NativeChunk::OpenAi(frame) = chunk else {
            return skip_foreign_chunk(Protocol::OpenAi, found);
        };
        let found = state.protocol();
        let StreamState::OpenAi(state) = state else {
            return skip_foreign_state(Protocol::OpenAi, found);
        };
        if state.terminated {
            return Vec::new();
        }

        match frame {
            OpenAiStreamFrame::Chunk(chunk) => decode_chunk(chunk),
            OpenAiStreamFrame::Done => {
                state.terminate();
                vec![StreamEvent::Done]
            }
            OpenAiStreamFrame::Error(error) => {
                state.terminate();
                vec![StreamEvent::Error(StreamFailure::new(
                    crate::error::ErrorKind::Transport,
                    error.error.message,
                ))]
            }
        }
    }

    fn finish_stream(&self, state: &mut StreamState) -> Vec<StreamEvent> {
        let StreamState::OpenAi(state) = state else {
            return Vec::new();
        };
        if state.terminate() { vec![StreamEvent::Done] } else { Vec::new() }
    }

    fn from_canonical_chunk(&self, event: &StreamEvent, state: &mut StreamState) -> Result<Vec<NativeChunk>, ConvertError> {
        let found = state.protocol();
        let StreamState::OpenAi(state) = state else {
            return Err(mismatch(Protocol::OpenAi, found));
        };
        if state.terminated {
            return Ok(Vec::new());
        }

        let frame = match event {
            StreamEvent::Delta(delta) => {
                let role = (!state.role_sent).then(|| "assistant".to_owned());
                state.role_sent = true;

                let choice = OpenAiStreamChoice {
                    index: delta.index,
                    delta: OpenAiStreamDelta {
                        role,
                        content: delta.content.clone(),
                        reasoning_content: delta.reasoning.clone(),
                        tool_calls: delta.tool_call.as_ref().map(|call| vec![call.into()]),
                    },
                    finish_reason: delta.finish_reason.map(|reason| reason.as_str().to_owned()),
                };
                OpenAiStreamFrame::Chunk(state.chunk(vec![choice], None))
            }
            StreamEvent::Usage(usage) => OpenAiStreamFrame::Chunk(state.chunk(Vec::new(), Some((*usage).into()))),
            StreamEvent::Done => {
                state.terminate();
                OpenAiStreamFrame::Done
            }
            StreamEvent::Error(failure) => {
                state.terminate();
                OpenAiStreamFrame::Error(error_body(failure))
            }
        };

        Ok(vec![NativeChunk::OpenAi(frame)])
    }
}

/// In-band error frame for a failed stream
pub fn error_body(failure: &StreamFailure) -> OpenAiErrorResponse {
    OpenAiErrorResponse {
        error: OpenAiErrorDetail {
            message: failure.message.clone(),
            error_type: failure.kind.error_type().to_owned(),
            code: None,
            kind: Some(failure.kind.as_str().to_owned()),
            fallback_attempted: Some(failure.fallback_attempted),
        },
    }
}

fn decode_chunk(chunk: OpenAiStreamChunk) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    for choice in chunk.choices {
        let index = choice.index;
        let delta = choice.delta;

        if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
            events.push(StreamEvent::Delta(StreamDelta {
                index,
                ..StreamDelta::reasoning(reasoning)
            }));
        }
        if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::Delta(StreamDelta {
                index,
                ..StreamDelta::text(text)
            }));
        }
        for call in delta.tool_calls.unwrap_or_default() {
            events.push(StreamEvent::Delta(StreamDelta {
                index,
                tool_call: Some(call.into()),
                ..StreamDelta::default()
            }));
        }
        if let Some(reason) = choice.finish_reason.as_deref().and_then(parse_finish_reason) {
            events.push(StreamEvent::Delta(StreamDelta {
                index,
                ..StreamDelta::finish(reason)
            }));
        }
    }

    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage(usage.into()));
    }

    events
}

/// Read a `tool_choice` given as a mode string or a function object
pub(super) fn parse_tool_choice(value: &Value) -> Option<ToolChoice> {
    match value {
        Value::String(mode) => match mode.as_str() {
            "none" => Some(ToolChoice::None),
            "auto" => Some(ToolChoice::Auto),
            "required" | "any" => Some(ToolChoice::Required),
            _ => None,
        },
        Value::Object(object) => object
            .get("function")
            .and_then(|function| function.get("name"))
            .or_else(|| object.get("name"))
            .and_then(Value::as_str)
            .map(|name| ToolChoice::Function(name.to_owned())),
        _ => None,
    }
}

fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::None => json!("none"),
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Function(name) => json!({"type": "function", "function": {"name": name}}),
    }
}

/// Empty argument strings are not valid JSON
pub(super) fn normalize_arguments(arguments: String) -> String {
    if arguments.trim().is_empty() {
        "{}".to_owned()
    } else {
        arguments
    }
}

// -- Inbound: OpenAI wire format -> canonical types --

impl From<OpenAiRequest> for CompletionRequest {
    fn from(request: OpenAiRequest) -> Self {
        let reasoning = request
            .extra_body
            .as_ref()
            .and_then(|extra| extra.pointer("/anthropic/thinking"))
            .and_then(ReasoningConfig::from_value)
            .or_else(|| request.reasoning_effort.as_deref().and_then(ReasoningConfig::from_effort));

        Self {
            model: request.model,
            messages: request.messages.into_iter().map(Into::into).collect(),
            params: CompletionParams {
                temperature: request.temperature,
                top_p: request.top_p,
                top_k: None,
                max_tokens: request.max_completion_tokens.or(request.max_tokens),
                stop: request.stop.map(OpenAiStop::into_vec),
                frequency_penalty: request.frequency_penalty,
                presence_penalty: request.presence_penalty,
                seed: request.seed,
            },
            tools: request
                .tools
                .unwrap_or_default()
                .into_iter()
                .map(|tool| ToolDefinition {
                    name: tool.function.name,
                    description: tool.function.description,
                    parameters: tool.function.parameters.unwrap_or_else(empty_schema),
                })
                .collect(),
            tool_choice: request.tool_choice.as_ref().and_then(parse_tool_choice),
            reasoning,
            stream: request.stream.unwrap_or(false),
        }
    }
}

impl From<OpenAiMessage> for Message {
    fn from(message: OpenAiMessage) -> Self {
        let content = match message.content {
            Some(OpenAiContent::Text(text)) if !text.is_empty() => vec![ContentPart::Text { text }],
            Some(OpenAiContent::Parts(parts)) => parts.into_iter().map(Into::into).collect(),
            _ => Vec::new(),
        };

        Self {
            role: Role::parse(&message.role).unwrap_or(Role::User),
            content,
            name: message.name,
            tool_calls: message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
            tool_call_id: message.tool_call_id,
        }
    }
}

impl From<OpenAiContentPart> for ContentPart {
    fn from(part: OpenAiContentPart) -> Self {
        match part {
            OpenAiContentPart::Text { text } => Self::Text { text },
            OpenAiContentPart::ImageUrl { image_url } => Self::Image {
                url: image_url.url,
                detail: image_url.detail,
            },
            OpenAiContentPart::InputAudio { input_audio } => Self::Audio {
                data: input_audio.data,
                format: input_audio.format,
            },
            OpenAiContentPart::File { file } => Self::File {
                data: file.file_data.unwrap_or_default(),
                filename: file.filename,
            },
        }
    }
}

impl From<OpenAiToolCall> for ToolCall {
    fn from(call: OpenAiToolCall) -> Self {
        Self {
            id: call.id,
            name: call.function.name,
            arguments: normalize_arguments(call.function.arguments),
        }
    }
}

impl From<OpenAiUsage> for Usage {
    fn from(usage: OpenAiUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<OpenAiResponse> for CompletionResponse {
    fn from(response: OpenAiResponse) -> Self {
        Self {
            id: response.id,
            created: if response.created == 0 { unix_now() } else { response.created },
            model: response.model,
            choices: response
                .choices
                .into_iter()
                .map(|choice| Choice {
                    index: choice.index,
                    message: ChoiceMessage {
                        content: choice.message.content,
                        reasoning_content: choice.message.reasoning_content,
                        tool_calls: choice
                            .message
                            .tool_calls
                            .unwrap_or_default()
                            .into_iter()
                            .map(Into::into)
                            .collect(),
                    },
                    finish_reason: choice.finish_reason.as_deref().and_then(parse_finish_reason),
                })
                .collect(),
            usage: response.usage.map(Into::into),
        }
    }
}

impl From<OpenAiStreamToolCall> for StreamToolCall {
    fn from(call: OpenAiStreamToolCall) -> Self {
        Self {
            index: call.index,
            id: call.id,
            function: call.function.map(|function| StreamFunctionCall {
                name: function.name,
                arguments: function.arguments,
            }),
        }
    }
}

// -- Outbound: canonical types -> OpenAI wire format --

impl From<&CompletionRequest> for OpenAiRequest {
    fn from(request: &CompletionRequest) -> Self {
        let tools: Vec<OpenAiTool> = request
            .tools
            .iter()
            .map(|tool| OpenAiTool {
                tool_type: "function".to_owned(),
                function: OpenAiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.parameters.clone()),
                },
            })
            .collect();

        Self {
            model: request.model.clone(),
            messages: request.messages.iter().map(Into::into).collect(),
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_tokens: request.params.max_tokens,
            max_completion_tokens: None,
            stop: request.params.stop.clone().map(OpenAiStop::Many),
            frequency_penalty: request.params.frequency_penalty,
            presence_penalty: request.params.presence_penalty,
            seed: request.params.seed,
            stream: request.stream.then_some(true),
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice: request.tool_choice.as_ref().map(tool_choice_value),
            stream_options: request
                .stream
                .then_some(OpenAiStreamOptions { include_usage: true }),
            reasoning_effort: request.reasoning.map(|reasoning| reasoning.effort().as_str().to_owned()),
            extra_body: None,
        }
    }
}

impl From<&Message> for OpenAiMessage {
    fn from(message: &Message) -> Self {
        let content = openai_content(&message.content).or_else(|| {
            // tool results must carry content, even when empty
            (message.role == Role::Tool).then(|| OpenAiContent::Text(String::new()))
        });
        let tool_calls: Vec<OpenAiToolCall> = message.tool_calls.iter().map(Into::into).collect();

        Self {
            role: message.role.as_str().to_owned(),
            content,
            reasoning_content: None,
            name: message.name.clone(),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

fn openai_content(parts: &[ContentPart]) -> Option<OpenAiContent> {
    if parts.is_empty() {
        return None;
    }
    if parts.iter().all(|part| part.as_text().is_some()) {
        let text: String = parts.iter().filter_map(ContentPart::as_text).collect();
        return Some(OpenAiContent::Text(text));
    }

    Some(OpenAiContent::Parts(parts.iter().map(Into::into).collect()))
}

impl From<&ContentPart> for OpenAiContentPart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => Self::Text { text: text.clone() },
            ContentPart::Image { url, detail } => Self::ImageUrl {
                image_url: OpenAiImageUrl {
                    url: url.clone(),
                    detail: detail.clone(),
                },
            },
            ContentPart::Audio { data, format } => Self::InputAudio {
                input_audio: OpenAiInputAudio {
                    data: data.clone(),
                    format: format.clone(),
                },
            },
            ContentPart::File { data, filename } => Self::File {
                file: OpenAiFile {
                    file_data: Some(data.clone()),
                    filename: filename.clone(),
                },
            },
        }
    }
}

impl From<&ToolCall> for OpenAiToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            tool_type: "function".to_owned(),
            function: OpenAiFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

impl From<Usage> for OpenAiUsage {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl From<&CompletionResponse> for OpenAiResponse {
    fn from(response: &CompletionResponse) -> Self {
        Self {
            id: response.id.clone(),
            object: "chat.completion".to_owned(),
            created: response.created,
            model: response.model.clone(),
            choices: response
                .choices
                .iter()
                .map(|choice| {
                    let tool_calls: Vec<OpenAiToolCall> = choice.message.tool_calls.iter().map(Into::into).collect();
                    OpenAiChoice {
                        index: choice.index,
                        message: OpenAiChoiceMessage {
                            role: "assistant".to_owned(),
                            content: choice.message.content.clone(),
                            reasoning_content: choice.message.reasoning_content.clone(),
                            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        },
                        finish_reason: choice.finish_reason.map(|reason| reason.as_str().to_owned()),
                    }
                })
                .collect(),
            usage: response.usage.map(Into::into),
        }
    }
}

impl From<&StreamToolCall> for OpenAiStreamToolCall {
    fn from(call: &StreamToolCall) -> Self {
        Self {
            index: call.index,
            id: call.id.clone(),
            tool_type: call.id.as_ref().map(|_| "function".to_owned()),
            function: call.function.as_ref().map(|function| OpenAiStreamFunctionCall {
                name: function.name.clone(),
                arguments: function.arguments.clone(),
            }),
        }
    }
}
