//! Kiro `CodeWhisperer` (provider side)
//!
//! Kiro expects strictly alternating user and assistant turns with the
//! newest user turn split out as `currentMessage`. Replies are loose JSON
//! events whose text may embed `<thinking>` tags.

use uuid::Uuid;

use super::{
    ConvertError, ConverterRole, ProtocolConverter, ResponseAccumulator, StreamState, mismatch, new_id,
    segment_events, skip_foreign_chunk, skip_foreign_state,
};
use crate::protocol::kiro::{
    KiroAssistantResponseMessage, KiroConversationState, KiroCurrentMessage, KiroEvent, KiroHistoryEntry, KiroImage,
    KiroImageSource, KiroInputSchema, KiroRequest, KiroText, KiroTool, KiroToolResult, KiroToolSpecification,
    KiroToolUse, KiroUserInputMessage, KiroUserInputMessageContext, ORIGIN, normalize_model_id,
};
use crate::protocol::{NativeChunk, NativeRequest, NativeResponse, Protocol};
use crate::thinking::ThinkingTagParser;
use crate::types::message::parse_data_uri;
use crate::types::{
    CompletionRequest, CompletionResponse, ContentPart, FinishReason, Message, Role, StreamDelta, StreamEvent, Usage,
};

/// Stand-in for turns Kiro would reject as empty
const EMPTY_CONTENT: &str = "(empty)";

/// User turn appended when the conversation ends on the assistant
const CONTINUE_PROMPT: &str = "Continue";

const CHAT_TRIGGER: &str = "MANUAL";

pub struct KiroConverter;

#[derive(Debug, Default)]
pub struct KiroStreamState {
    pub(super) model: String,
    parser: ThinkingTagParser,
    tool_ids: Vec<String>,
    current_tool: Option<usize>,
    usage: Option<Usage>,
    terminated: bool,
}

impl KiroStreamState {
    fn decode(&mut self, event: KiroEvent) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }

        match event {
            KiroEvent::Content(text) => segment_events(self.parser.feed(&text)).collect(),
            KiroEvent::ToolUseStart { tool_use_id, name } => self.start_tool(tool_use_id, &name).into_iter().collect(),
            KiroEvent::ToolInputDelta {
                tool_use_id,
                name,
                input,
            } => {
                let mut events = Vec::new();
                let index = match tool_use_id {
                    Some(id) => match self.tool_ids.iter().position(|known| *known == id) {
                        Some(index) => Some(index),
                        None => {
                            events.extend(self.start_tool(id, name.as_deref().unwrap_or_default()));
                            self.current_tool
                        }
                    },
                    None => self.current_tool,
                };

                match index {
                    Some(index) if !input.is_empty() => {
                        events.push(StreamEvent::Delta(StreamDelta::tool_call_arguments(
                            tool_index(index),
                            input,
                        )));
                    }
                    Some(_) => {}
                    None => tracing::debug!("skipping Kiro tool input with no open tool call"),
                }
                events
            }
            KiroEvent::ToolUseStop { .. } => {
                self.current_tool = None;
                Vec::new()
            }
            KiroEvent::Usage(usage) => {
                if usage.input_tokens.is_some() || usage.output_tokens.is_some() {
                    self.usage = Some(Usage::new(
                        usage.input_tokens.unwrap_or_default(),
                        usage.output_tokens.unwrap_or_default(),
                    ));
                } else {
                    tracing::debug!(credits = ?usage.credits, "Kiro usage without token counts");
                }
                Vec::new()
            }
            KiroEvent::ContextUsage(percentage) => {
                tracing::debug!(percentage, "Kiro context usage");
                Vec::new()
            }
            KiroEvent::Unknown(value) => {
                tracing::debug!(event = %value, "skipping unrecognized Kiro event");
                Vec::new()
            }
        }
    }

    fn start_tool(&mut self, id: String, name: &str) -> Option<StreamEvent> {
        if let Some(index) = self.tool_ids.iter().position(|known| *known == id) {
            self.current_tool = Some(index);
            return None;
        }

        let index = self.tool_ids.len();
        let event = StreamEvent::Delta(StreamDelta::tool_call_start(tool_index(index), id.clone(), name));
        self.tool_ids.push(id);
        self.current_tool = Some(index);
        Some(event)
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;

        let reason = if self.tool_ids.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };

        let mut events: Vec<StreamEvent> = segment_events(self.parser.finish()).collect();
        events.push(StreamEvent::Delta(StreamDelta::finish(reason)));
        if let Some(usage) = self.usage.take() {
            events.push(StreamEvent::Usage(usage));
        }
        events.push(StreamEvent::Done);
        events
    }
}

fn tool_index(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

impl ProtocolConverter for KiroConverter {
    fn protocol(&self) -> Protocol {
        Protocol::Kiro
    }

    fn roles(&self) -> ConverterRole {
        ConverterRole::ProviderOnly
    }

    fn from_canonical_request(&self, request: &CompletionRequest) -> Result<NativeRequest, ConvertError> {
        let model_id = normalize_model_id(&request.model);
        let mut turns = build_turns(request);

        if turns.first().is_none_or(|turn| !turn.is_user()) {
            turns.insert(0, Turn::user(EMPTY_CONTENT));
        }
        if let Some(system) = request.system_prompt()
            && let Some(Turn::User { content, .. }) = turns.first_mut()
        {
            *content = if content.is_empty() {
                system
            } else {
                format!("{system}\n\n{content}")
            };
        }
        if turns.last().is_some_and(|turn| !turn.is_user()) {
            turns.push(Turn::user(CONTINUE_PROMPT));
        }

        let Some(Turn::User {
            content,
            images,
            tool_results,
        }) = turns.pop()
        else {
            return Err(ConvertError::MissingField("messages"));
        };

        let tools: Vec<KiroTool> = request
            .tools
            .iter()
            .map(|tool| KiroTool {
                tool_specification: KiroToolSpecification {
                    name: tool.name.clone(),
                    description: tool
                        .description
                        .clone()
                        .filter(|d| !d.is_empty())
                        .unwrap_or_else(|| format!("Tool: {}", tool.name)),
                    input_schema: KiroInputSchema {
                        json: tool.parameters.clone(),
                    },
                },
            })
            .collect();

        let current = user_input(content, images, tool_results, tools, &model_id);
        let history: Vec<KiroHistoryEntry> = turns.into_iter().map(|turn| turn.into_history(&model_id)).collect();

        Ok(NativeRequest::Kiro(KiroRequest {
            conversation_state: KiroConversationState {
                chat_trigger_type: CHAT_TRIGGER.to_owned(),
                conversation_id: Uuid::new_v4().to_string(),
                current_message: KiroCurrentMessage {
                    user_input_message: current,
                },
                history: (!history.is_empty()).then_some(history),
            },
            profile_arn: None,
        }))
    }

    fn to_canonical_response(&self, response: NativeResponse) -> Result<CompletionResponse, ConvertError> {
        let found = response.protocol();
        let NativeResponse::Kiro(response) = response else {
            return Err(mismatch(Protocol::Kiro, found));
        };

        if response.events.is_empty() {
            return Err(ConvertError::MissingField("events"));
        }

        let mut state = KiroStreamState::default();
        let mut accumulator = ResponseAccumulator::default();
        for event in response.events {
            for canonical in state.decode(event) {
                accumulator.push(&canonical);
            }
        }
        for canonical in state.finish() {
            accumulator.push(&canonical);
        }

        Ok(accumulator.finish(new_id("kiro-"), response.model))
    }

    fn new_stream_state(&self) -> StreamState {
        StreamState::Kiro(KiroStreamState::default())
    }

    fn next_canonical_chunk(&self, chunk: NativeChunk, state: &mut StreamState) -> Vec<StreamEvent> {
        let found = chunk.protocol();
        let NativeChunk::Kiro(event) = chunk else {
            return skip_foreign_chunk(Protocol::Kiro, found);
        };
        let found = state.protocol();
        let StreamState::Kiro(state) = state else {
            return skip_foreign_state(Protocol::Kiro, found);
        };

        state.decode(event)
    }

    fn finish_stream(&self, state: &mut StreamState) -> Vec<StreamEvent> {
        let found = state.protocol();
        let StreamState::Kiro(state) = state else {
            return skip_foreign_state(Protocol::Kiro, found);
        };

        state.finish()
    }
}

/// One merged conversation turn
enum Turn {
    User {
        content: String,
        images: Vec<KiroImage>,
        tool_results: Vec<KiroToolResult>,
    },
    Assistant {
        content: String,
        tool_uses: Vec<KiroToolUse>,
    },
}

impl Turn {
    fn user(content: &str) -> Self {
        Self::User {
            content: content.to_owned(),
            images: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    const fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    fn into_history(self, model_id: &str) -> KiroHistoryEntry {
        match self {
            Self::User {
                content,
                images,
                tool_results,
            } => KiroHistoryEntry::UserInputMessage(user_input(content, images, tool_results, Vec::new(), model_id)),
            Self::Assistant { content, tool_uses } => {
                KiroHistoryEntry::AssistantResponseMessage(KiroAssistantResponseMessage {
                    content: non_empty(content),
                    tool_uses: (!tool_uses.is_empty()).then_some(tool_uses),
                })
            }
        }
    }
}

/// Merge the conversation into alternating turns; tool results ride on user turns
fn build_turns(request: &CompletionRequest) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();

    for message in request.conversation() {
        match message.role {
            Role::Assistant => {
                let text = message.text_content();
                let uses = message.tool_calls.iter().map(|call| KiroToolUse {
                    tool_use_id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments_value(),
                });

                if let Some(Turn::Assistant { content, tool_uses }) = turns.last_mut() {
                    append_text(content, &text);
                    tool_uses.extend(uses);
                } else {
                    turns.push(Turn::Assistant {
                        content: text,
                        tool_uses: uses.collect(),
                    });
                }
            }
            Role::User | Role::Tool => {
                if !matches!(turns.last(), Some(Turn::User { .. })) {
                    turns.push(Turn::user(""));
                }
                let Some(Turn::User {
                    content,
                    images,
                    tool_results,
                }) = turns.last_mut()
                else {
                    continue;
                };

                if message.role == Role::Tool {
                    tool_results.push(tool_result(message));
                } else {
                    append_text(content, &message.text_content());
                    images.extend(message.media().filter_map(image));
                }
            }
            Role::System => {}
        }
    }

    turns
}

fn append_text(content: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !content.is_empty() {
        content.push_str("\n\n");
    }
    content.push_str(text);
}

fn non_empty(content: String) -> String {
    if content.trim().is_empty() {
        EMPTY_CONTENT.to_owned()
    } else {
        content
    }
}

fn user_input(
    content: String,
    images: Vec<KiroImage>,
    tool_results: Vec<KiroToolResult>,
    tools: Vec<KiroTool>,
    model_id: &str,
) -> KiroUserInputMessage {
    let context = KiroUserInputMessageContext {
        tools: (!tools.is_empty()).then_some(tools),
        tool_results: (!tool_results.is_empty()).then_some(tool_results),
    };

    KiroUserInputMessage {
        content: non_empty(content),
        model_id: model_id.to_owned(),
        origin: ORIGIN.to_owned(),
        images: (!images.is_empty()).then_some(images),
        user_input_message_context: (!context.is_empty()).then_some(context),
    }
}

fn tool_result(message: &Message) -> KiroToolResult {
    KiroToolResult {
        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
        content: vec![KiroText {
            text: non_empty(message.text_content()),
        }],
        status: "success".to_owned(),
    }
}

fn image(part: &ContentPart) -> Option<KiroImage> {
    let ContentPart::Image { url, .. } = part else {
        tracing::debug!("dropping non-image attachment for Kiro");
        return None;
    };

    let Some((mime, data)) = parse_data_uri(url) else {
        tracing::debug!("dropping Kiro image that is not a data URI");
        return None;
    };

    Some(KiroImage {
        format: mime.strip_prefix("image/").unwrap_or(mime).to_owned(),
        source: KiroImageSource { bytes: data.to_owned() },
    })
}
