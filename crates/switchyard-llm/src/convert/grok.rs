//! Grok web chat (provider side)
//!
//! Grok takes a single prompt string, so the conversation is flattened into
//! labelled blocks. Tool definitions ride ahead of it as instructions, since
//! the web chat has no function calling of its own. Replies arrive as NDJSON
//! tokens, some flagged as thinking and the rest possibly carrying inline
//! `<thinking>` tags.

use super::{
    ConvertError, ConverterRole, ProtocolConverter, ResponseAccumulator, StreamState, mismatch, new_id,
    segment_events, skip_foreign_chunk, skip_foreign_state,
};
use crate::protocol::grok::{GrokChunk, GrokRequest, resolve_model};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};
use crate::thinking::ThinkingTagParser;
use crate::types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, Role, StreamDelta, StreamEvent, ToolChoice,
};

/// Prompt sent when the conversation holds only attachments
const MEDIA_ONLY_PROMPT: &str = "Refer to the following content:";

pub struct GrokConverter;

#[derive(Debug, Default)]
pub struct GrokStreamState {
    pub(super) model: String,
    parser: ThinkingTagParser,
    response_id: Option<String>,
    saw_token: bool,
    terminated: bool,
}

impl GrokStreamState {
    fn decode(&mut self, chunk: GrokChunk) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }

        if let Some(id) = chunk.response_id.filter(|id| !id.is_empty()) {
            self.response_id = Some(id);
        }

        let mut events = Vec::new();

        if let Some(token) = chunk.token.filter(|token| !token.is_empty()) {
            self.saw_token = true;
            if chunk.is_thinking {
                events.push(StreamEvent::Delta(StreamDelta::reasoning(token)));
            } else {
                events.extend(segment_events(self.parser.feed(&token)));
            }
        }

        // The final model response repeats the streamed tokens; only use it
        // when nothing was streamed.
        if let Some(response) = chunk.model_response {
            if let Some(id) = response.response_id.filter(|id| !id.is_empty()) {
                self.response_id = Some(id);
            }
            if !self.saw_token && !response.message.is_empty() {
                self.saw_token = true;
                events.extend(segment_events(self.parser.feed(&response.message)));
            }
        }

        if chunk.is_done {
            events.extend(self.finish());
        }

        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;

        let mut events: Vec<StreamEvent> = segment_events(self.parser.finish()).collect();
        events.push(StreamEvent::Delta(StreamDelta::finish(FinishReason::Stop)));
        events.push(StreamEvent::Done);
        events
    }
}

impl ProtocolConverter for GrokConverter {
    fn protocol(&self) -> Protocol {
        Protocol::Grok
    }

    fn roles(&self) -> ConverterRole {
        ConverterRole::ProviderOnly
    }

    fn from_canonical_request(&self, request: &CompletionRequest) -> Result<NativeRequest, ConvertError> {
        if request.messages.is_empty() {
            return Err(ConvertError::MissingField("messages"));
        }

        let attachments = request.messages.iter().flat_map(Message::media).count();
        if attachments > 0 {
            tracing::warn!(attachments, "Grok attachments are not uploaded; sending text only");
        }

        let conversation = flatten_prompt(request);
        let prompt = match tool_prompt(request) {
            Some(tools) if conversation.is_empty() => tools,
            Some(tools) => format!("{tools}\n\n{conversation}"),
            None => conversation,
        };
        Ok(NativeRequest::Grok(GrokRequest::new(prompt, resolve_model(&request.model))))
    }

    fn to_canonical_response(&self, response: NativeResponse) -> Result<CompletionResponse, ConvertError> {
        let found = response.protocol();
        let NativeResponse::Grok(response) = response else {
            return Err(mismatch(Protocol::Grok, found));
        };

        if response.chunks.is_empty() {
            return Err(ConvertError::MissingField("result.response"));
        }

        let mut state = GrokStreamState::default();
        let mut accumulator = ResponseAccumulator::default();
        for chunk in response.chunks {
            for event in state.decode(chunk) {
                accumulator.push(&event);
            }
        }
        for event in state.finish() {
            accumulator.push(&event);
        }

        let id = state.response_id.unwrap_or_else(|| new_id("grok-"));
        Ok(accumulator.finish(id, response.model))
    }

    fn new_stream_state(&self) -> StreamState {
        StreamState::Grok(GrokStreamState::default())
    }

    fn next_canonical_chunk(&self, chunk: NativeChunk, state: &mut StreamState) -> Vec<StreamEvent> {
        let found = chunk.protocol();
        let NativeChunk::Grok(chunk) = chunk else {
            return skip_foreign_chunk(Protocol::Grok, found);
        };
        let found = state.protocol();
        let StreamState::Grok(state) = state else {
            return skip_foreign_state(Protocol::Grok, found);
        };

        state.decode(chunk)
    }

    fn finish_stream(&self, state: &mut StreamState) -> Vec<StreamEvent> {
        let found = state.protocol();
        let StreamState::Grok(state) = state else {
            return skip_foreign_state(Protocol::Grok, found);
        };

        state.finish()
    }
}

/// Render the conversation as one prompt
///
/// Every message becomes a `role: text` block except the final user turn,
/// which is left bare so the model answers it directly.
fn flatten_prompt(request: &CompletionRequest) -> String {
    let last_user = request.messages.iter().rposition(|message| message.role == Role::User);

    let blocks: Vec<String> = request
        .messages
        .iter()
        .enumerate()
        .filter_map(|(i, message)| {
            let text = message_text(message);
            if text.is_empty() {
                return None;
            }
            if Some(i) == last_user {
                return Some(text);
            }
            Some(format!("{}: {text}", label(message, request)))
        })
        .collect();

    let prompt = blocks.join("\n\n");
    if prompt.is_empty() && request.messages.iter().any(|message| message.media().next().is_some()) {
        return MEDIA_ONLY_PROMPT.to_owned();
    }
    prompt
}

/// Instructions describing the callable tools
///
/// Calls are requested in the same `[tool_call] name args` form the
/// conversation history uses.
fn tool_prompt(request: &CompletionRequest) -> Option<String> {
    if request.tools.is_empty() {
        return None;
    }
    if request.tool_choice == Some(ToolChoice::None) {
        tracing::debug!(tools = request.tools.len(), "tool choice is none; not offering tools to Grok");
        return None;
    }

    let mut prompt = String::from("You can call these tools:");
    for tool in &request.tools {
        prompt.push_str("\n- ");
        prompt.push_str(&tool.name);
        if let Some(description) = tool.description.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            prompt.push_str(": ");
            prompt.push_str(description);
        }
        prompt.push_str("\n  parameters: ");
        prompt.push_str(&tool.parameters.to_string());
    }
    prompt.push_str("\nTo call a tool, reply with one line per call: [tool_call] <name> <JSON arguments>");

    match &request.tool_choice {
        Some(ToolChoice::Required) => prompt.push_str("\nYou must call at least one tool."),
        Some(ToolChoice::Function(name)) => {
            prompt.push_str("\nYou must call the ");
            prompt.push_str(name);
            prompt.push_str(" tool.");
        }
        _ => {}
    }

    Some(prompt)
}

fn message_text(message: &Message) -> String {
    let text = message
        .content
        .iter()
        .filter_map(|part| part.as_text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if !text.is_empty() || message.tool_calls.is_empty() {
        return text;
    }

    message
        .tool_calls
        .iter()
        .map(|call| format!("[tool_call] {} {}", call.name, call.arguments))
        .collect::<Vec<_>>()
        .join("\n")
}

fn label(message: &Message, request: &CompletionRequest) -> String {
    if message.role != Role::Tool {
        return message.role.as_str().to_owned();
    }

    let id = message.tool_call_id.as_deref().unwrap_or_default();
    let name = message
        .name
        .as_deref()
        .or_else(|| request.tool_name_for(id))
        .unwrap_or("unknown");
    if id.is_empty() {
        format!("tool[{name}]")
    } else {
        format!("tool[{name}]#{id}")
    }
}
