//! Conversion between canonical types and the `OpenAI` Responses API
//!
//! Client side only: requests are decoded and responses encoded.

use super::openai::{normalize_arguments, parse_tool_choice};
use super::{ConvertError, ConverterRole, ProtocolConverter, StreamState, mismatch, new_id};
use crate::protocol::openai_responses::{
    ResponsesContent, ResponsesContentPart, ResponsesInput, ResponsesInputItem, ResponsesOutputItem,
    ResponsesOutputText, ResponsesRequest, ResponsesResponse, ResponsesStreamEvent, ResponsesSummaryText,
    ResponsesUsage,
};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};
use crate::types::response::unix_now;
use crate::types::{
    ChoiceMessage, CompletionParams, CompletionRequest, CompletionResponse, ContentPart, Message, ReasoningConfig,
    Role, StreamEvent, StreamToolCall, ToolCall, ToolDefinition, Usage,
};

/// `OpenAI` Responses API, client side
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsesConverter;

/// Stream state for Responses API events
///
/// The output items are built up as deltas arrive so that
/// `response.completed` can carry the full response.
#[derive(Debug)]
pub struct ResponsesStreamState {
    pub(super) model: String,
    response_id: String,
    created_at: u64,
    started: bool,
    output: Vec<ResponsesOutputItem>,
    /// Canonical tool-call index to output position
    tool_items: Vec<(u32, usize)>,
    usage: Option<Usage>,
    terminated: bool,
}

impl ResponsesStreamState {
    fn new() -> Self {
        Self {
            model: String::new(),
            response_id: new_id("resp_"),
            created_at: unix_now(),
            started: false,
            output: Vec::new(),
            tool_items: Vec::new(),
            usage: None,
            terminated: false,
        }
    }

    fn response(&self, status: &str, output: Vec<ResponsesOutputItem>) -> ResponsesResponse {
        ResponsesResponse {
            id: self.response_id.clone(),
            object: "response".to_owned(),
            created_at: self.created_at,
            model: self.model.clone(),
            status: status.to_owned(),
            output,
            usage: self.usage.map(Into::into),
        }
    }

    fn encode(&mut self, event: &StreamEvent) -> Vec<ResponsesStreamEvent> {
        let mut out = Vec::new();

        if !self.started && !matches!(event, StreamEvent::Error(_)) {
            self.started = true;
            out.push(ResponsesStreamEvent::Created {
                response: self.response("in_progress", Vec::new()),
            });
        }

        match event {
            StreamEvent::Delta(delta) => {
                if let Some(reasoning) = &delta.reasoning {
                    self.reasoning_delta(reasoning, &mut out);
                }
                if let Some(text) = &delta.content {
                    self.text_delta(text, &mut out);
                }
                if let Some(call) = &delta.tool_call {
                    self.tool_call_delta(call, &mut out);
                }
            }
            StreamEvent::Usage(usage) => self.usage = Some(*usage),
            StreamEvent::Done => {
                self.terminated = true;
                let mut output = std::mem::take(&mut self.output);
                for item in &mut output {
                    complete(item);
                }
                out.push(ResponsesStreamEvent::Completed {
                    response: self.response("completed", output),
                });
            }
            StreamEvent::Error(failure) => {
                self.terminated = true;
                out.push(ResponsesStreamEvent::Error {
                    code: failure.kind.error_type().to_owned(),
                    message: failure.message.clone(),
                    fallback_attempted: Some(failure.fallback_attempted),
                });
            }
        }

        out
    }

    /// Position of the open item when it is the last one added
    fn open_position(&self, is_kind: fn(&ResponsesOutputItem) -> bool) -> Option<usize> {
        self.output
            .last()
            .filter(|item| is_kind(item))
            .map(|_| self.output.len() - 1)
    }

    fn add_item(&mut self, item: ResponsesOutputItem, out: &mut Vec<ResponsesStreamEvent>) -> usize {
        let position = self.output.len();
        out.push(ResponsesStreamEvent::OutputItemAdded {
            output_index: output_index(position),
            item: item.clone(),
        });
        self.output.push(item);
        position
    }

    fn reasoning_delta(&mut self, delta: &str, out: &mut Vec<ResponsesStreamEvent>) {
        let position = match self.open_position(|item| matches!(item, ResponsesOutputItem::Reasoning { .. })) {
            Some(position) => position,
            None => self.add_item(
                ResponsesOutputItem::Reasoning {
                    id: new_id("rs_"),
                    summary: Vec::new(),
                },
                out,
            ),
        };

        if let ResponsesOutputItem::Reasoning { id, summary } = &mut self.output[position] {
            match summary.first_mut() {
                Some(part) => part.text.push_str(delta),
                None => summary.push(summary_text(delta.to_owned())),
            }
            out.push(ResponsesStreamEvent::ReasoningSummaryTextDelta {
                item_id: id.clone(),
                output_index: output_index(position),
                summary_index: 0,
                delta: delta.to_owned(),
            });
        }
    }

    fn text_delta(&mut self, delta: &str, out: &mut Vec<ResponsesStreamEvent>) {
        let position = match self.open_position(|item| matches!(item, ResponsesOutputItem::Message { .. })) {
            Some(position) => position,
            None => self.add_item(
                ResponsesOutputItem::Message {
                    id: new_id("msg_"),
                    role: "assistant".to_owned(),
                    status: "in_progress".to_owned(),
                    content: Vec::new(),
                },
                out,
            ),
        };

        if let ResponsesOutputItem::Message { id, content, .. } = &mut self.output[position] {
            match content.first_mut() {
                Some(part) => part.text.push_str(delta),
                None => content.push(output_text(delta.to_owned())),
            }
            out.push(ResponsesStreamEvent::OutputTextDelta {
                item_id: id.clone(),
                output_index: output_index(position),
                content_index: 0,
                delta: delta.to_owned(),
            });
        }
    }

    fn tool_call_delta(&mut self, call: &StreamToolCall, out: &mut Vec<ResponsesStreamEvent>) {
        let function = call.function.as_ref();
        let known = self.tool_items.iter().find(|(index, _)| *index == call.index).map(|(_, position)| *position);

        let position = match (known, &call.id) {
            (Some(position), _) => position,
            (None, id) => {
                let position = self.add_item(
                    ResponsesOutputItem::FunctionCall {
                        id: new_id("fc_"),
                        call_id: id.clone().unwrap_or_else(|| new_id("call_")),
                        name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
                        arguments: String::new(),
                        status: "in_progress".to_owned(),
                    },
                    out,
                );
                self.tool_items.push((call.index, position));
                position
            }
        };

        let Some(delta) = function.and_then(|f| f.arguments.as_deref()).filter(|a| !a.is_empty()) else {
            return;
        };
        if let ResponsesOutputItem::FunctionCall { id, arguments, .. } = &mut self.output[position] {
            arguments.push_str(delta);
            out.push(ResponsesStreamEvent::FunctionCallArgumentsDelta {
                item_id: id.clone(),
                output_index: output_index(position),
                delta: delta.to_owned(),
            });
        }
    }
}

impl ProtocolConverter for ResponsesConverter {
    fn protocol(&self) -> Protocol {
        Protocol::OpenAiResponses
    }

    fn roles(&self) -> ConverterRole {
        ConverterRole::ClientOnly
    }

    fn to_canonical_request(&self, request: NativeRequest) -> Result<CompletionRequest, ConvertError> {
        let found = request.protocol();
        let NativeRequest::OpenAiResponses(request) = request else {
            return Err(mismatch(Protocol::OpenAiResponses, found));
        };

        let canonical = CompletionRequest::from(request);
        if canonical.conversation().next().is_none() {
            return Err(ConvertError::MissingField("input"));
        }
        Ok(canonical)
    }

    fn from_canonical_response(&self, response: &CompletionResponse) -> Result<NativeResponse, ConvertError> {
        let choice = response.first().ok_or(ConvertError::MissingField("choices"))?;

        Ok(NativeResponse::OpenAiResponses(ResponsesResponse {
            id: response.id.clone(),
            object: "response".to_owned(),
            created_at: response.created,
            model: response.model.clone(),
            status: "completed".to_owned(),
            output: output_items(&choice.message),
            usage: response.usage.map(Into::into),
        }))
    }

    fn new_stream_state(&self) -> StreamState {
        StreamState::OpenAiResponses(ResponsesStreamState::new())
    }

    fn from_canonical_chunk(&self, event: &StreamEvent, state: &mut StreamState) -> Result<Vec<NativeChunk>, ConvertError> {
        let found = state.protocol();
        let StreamState::OpenAiResponses(state) = state else {
            return Err(mismatch(Protocol::OpenAiResponses, found));
        };
        if state.terminated {
            return Ok(Vec::new());
        }

        Ok(state.encode(event).into_iter().map(NativeChunk::OpenAiResponses).collect())
    }
}

fn output_index(position: usize) -> u32 {
    u32::try_from(position).unwrap_or(u32::MAX)
}

fn summary_text(text: String) -> ResponsesSummaryText {
    ResponsesSummaryText {
        part_type: "summary_text".to_owned(),
        text,
    }
}

fn output_text(text: String) -> ResponsesOutputText {
    ResponsesOutputText {
        part_type: "output_text".to_owned(),
        text,
        annotations: Vec::new(),
    }
}

fn complete(item: &mut ResponsesOutputItem) {
    match item {
        ResponsesOutputItem::Message { status, .. } | ResponsesOutputItem::FunctionCall { status, .. } => {
            "completed".clone_into(status);
        }
        ResponsesOutputItem::Reasoning { .. } => {}
    }
}

fn output_items(message: &ChoiceMessage) -> Vec<ResponsesOutputItem> {
    let mut items = Vec::new();

    if let Some(reasoning) = message.reasoning_content.clone().filter(|r| !r.is_empty()) {
        items.push(ResponsesOutputItem::Reasoning {
            id: new_id("rs_"),
            summary: vec![summary_text(reasoning)],
        });
    }
    if let Some(text) = message.content.clone().filter(|t| !t.is_empty()) {
        items.push(ResponsesOutputItem::Message {
            id: new_id("msg_"),
            role: "assistant".to_owned(),
            status: "completed".to_owned(),
            content: vec![output_text(text)],
        });
    }
    items.extend(message.tool_calls.iter().map(|call| ResponsesOutputItem::FunctionCall {
        id: new_id("fc_"),
        call_id: call.id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
        status: "completed".to_owned(),
    }));

    items
}

impl From<Usage> for ResponsesUsage {
    fn from(usage: Usage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

// -- Inbound: Responses wire format -> canonical types --

impl From<ResponsesRequest> for CompletionRequest {
    fn from(request: ResponsesRequest) -> Self {
        let mut messages = Vec::new();
        if let Some(instructions) = request.instructions.filter(|i| !i.is_empty()) {
            messages.push(Message::text(Role::System, instructions));
        }

        match request.input {
            ResponsesInput::Text(text) => messages.push(Message::text(Role::User, text)),
            ResponsesInput::Items(items) => {
                for item in items {
                    push_input_item(item, &mut messages);
                }
            }
        }

        let tools = request
            .tools
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tool| match (tool.tool_type.as_str(), tool.name) {
                ("function", Some(name)) => Some(ToolDefinition {
                    name,
                    description: tool.description,
                    parameters: tool.parameters.unwrap_or_else(crate::types::tool::empty_schema),
                }),
                (tool_type, _) => {
                    tracing::debug!(tool_type = %tool_type, "skipping built-in responses tool");
                    None
                }
            })
            .collect();

        Self {
            model: request.model,
            messages,
            params: CompletionParams {
                temperature: request.temperature,
                top_p: request.top_p,
                max_tokens: request.max_output_tokens,
                ..CompletionParams::default()
            },
            tools,
            tool_choice: request.tool_choice.as_ref().and_then(parse_tool_choice),
            reasoning: request
                .reasoning
                .map(|reasoning| ReasoningConfig::from_responses_effort(reasoning.effort.as_deref().unwrap_or_default())),
            stream: request.stream.unwrap_or(false),
        }
    }
}

fn push_input_item(item: ResponsesInputItem, out: &mut Vec<Message>) {
    match item.item_type.as_deref() {
        Some("function_call") => {
            let call = ToolCall {
                id: item.call_id.unwrap_or_else(|| new_id("call_")),
                name: item.name.unwrap_or_default(),
                arguments: normalize_arguments(item.arguments.unwrap_or_default()),
            };
            // parallel calls arrive as consecutive items of one assistant turn
            match out.last_mut() {
                Some(last) if last.role == Role::Assistant && last.tool_call_id.is_none() => last.tool_calls.push(call),
                _ => out.push(Message {
                    tool_calls: vec![call],
                    content: Vec::new(),
                    ..Message::text(Role::Assistant, "")
                }),
            }
        }
        Some("function_call_output") => {
            out.push(Message::tool_result(
                item.call_id.unwrap_or_default(),
                item.output.unwrap_or_default(),
            ));
        }
        Some("message") | None => {
            let role = item.role.as_deref().and_then(Role::parse).unwrap_or(Role::User);
            let content = match item.content {
                Some(ResponsesContent::Text(text)) => vec![ContentPart::Text { text }],
                Some(ResponsesContent::Parts(parts)) => parts.into_iter().filter_map(content_part).collect(),
                None => Vec::new(),
            };
            out.push(Message {
                role,
                content,
                name: None,
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        Some(other) => tracing::debug!(item_type = %other, "skipping unsupported responses input item"),
    }
}

fn content_part(part: ResponsesContentPart) -> Option<ContentPart> {
    match part {
        ResponsesContentPart::InputText { text } | ResponsesContentPart::OutputText { text } => {
            Some(ContentPart::Text { text })
        }
        ResponsesContentPart::InputImage { image_url, detail } => {
            image_url.map(|url| ContentPart::Image { url, detail })
        }
        ResponsesContentPart::InputFile { file_data, filename } => {
            file_data.map(|data| ContentPart::File { data, filename })
        }
        ResponsesContentPart::Unknown => None,
    }
}
