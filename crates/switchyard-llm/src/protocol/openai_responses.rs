//! `OpenAI` Responses API wire format types

use serde::{Deserialize, Serialize};

// -- Request types --

/// `POST /v1/responses` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    /// Model identifier
    pub model: String,
    /// Prompt text or a list of input items
    pub input: ResponsesInput,
    /// System-level instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Reasoning options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ResponsesReasoning>,
    /// Tool definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,
    /// Tool choice: a mode string or `{type: "function", name}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    /// Whether to stream the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// Reasoning options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesReasoning {
    /// `low`, `medium` or `high`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
}

/// Request input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    /// A single user prompt
    Text(String),
    /// Conversation items
    Items(Vec<ResponsesInputItem>),
}

/// One input item
///
/// Messages may omit `type`; function calls and their outputs carry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesInputItem {
    /// `message`, `function_call` or `function_call_output`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Message role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Message content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ResponsesContent>,
    /// Function call identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// JSON-encoded arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Message content as a string or typed parts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesContent {
    /// Plain text
    Text(String),
    /// Typed parts
    Parts(Vec<ResponsesContentPart>),
}

/// Typed content part
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesContentPart {
    /// User-supplied text
    InputText {
        /// The text string
        text: String,
    },
    /// Text from an earlier assistant turn
    OutputText {
        /// The text string
        text: String,
    },
    /// Image by URL or data URI
    InputImage {
        /// Image location
        #[serde(default)]
        image_url: Option<String>,
        /// Detail level
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Inline file
    InputFile {
        /// Base64 data URI
        #[serde(default)]
        file_data: Option<String>,
        /// Original filename
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// Anything this gateway does not model
    #[serde(other)]
    Unknown,
}

/// Function tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesTool {
    /// Tool type (`function` is the only one converted)
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    #[serde(default)]
    pub name: Option<String>,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// -- Response types --

/// Response object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    /// Response identifier
    pub id: String,
    /// Object type (always "response")
    pub object: String,
    /// Creation timestamp
    pub created_at: u64,
    /// Model used
    pub model: String,
    /// `in_progress`, `completed` or `incomplete`
    pub status: String,
    /// Output items
    pub output: Vec<ResponsesOutputItem>,
    /// Token usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
}

/// Output item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesOutputItem {
    /// Reasoning summary
    Reasoning {
        /// Item identifier
        id: String,
        /// Summary parts
        summary: Vec<ResponsesSummaryText>,
    },
    /// Assistant message
    Message {
        /// Item identifier
        id: String,
        /// Role (always "assistant")
        role: String,
        /// Item status
        status: String,
        /// Output text parts
        content: Vec<ResponsesOutputText>,
    },
    /// Tool invocation
    FunctionCall {
        /// Item identifier
        id: String,
        /// Call identifier referenced by the tool output
        call_id: String,
        /// Function name
        name: String,
        /// JSON-encoded arguments
        arguments: String,
        /// Item status
        status: String,
    },
}

/// Reasoning summary text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesSummaryText {
    /// Always "`summary_text`"
    #[serde(rename = "type")]
    pub part_type: String,
    /// The text string
    pub text: String,
}

/// Output text part
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesOutputText {
    /// Always "`output_text`"
    #[serde(rename = "type")]
    pub part_type: String,
    /// The text string
    pub text: String,
    /// Citations (always empty here)
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
}

/// Token usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesUsage {
    /// Prompt tokens
    pub input_tokens: u32,
    /// Generated tokens
    pub output_tokens: u32,
    /// Sum of both
    pub total_tokens: u32,
}

// -- Streaming types --

/// Streaming event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesStreamEvent {
    /// Response accepted
    #[serde(rename = "response.created")]
    Created {
        /// Response snapshot
        response: ResponsesResponse,
    },
    /// New output item
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Position in `output`
        output_index: u32,
        /// The item
        item: ResponsesOutputItem,
    },
    /// Visible text fragment
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        /// Owning item
        item_id: String,
        /// Position in `output`
        output_index: u32,
        /// Position in the item's content
        content_index: u32,
        /// Text fragment
        delta: String,
    },
    /// Reasoning summary fragment
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta {
        /// Owning item
        item_id: String,
        /// Position in `output`
        output_index: u32,
        /// Position in the item's summary
        summary_index: u32,
        /// Text fragment
        delta: String,
    },
    /// Tool arguments fragment
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        /// Owning item
        item_id: String,
        /// Position in `output`
        output_index: u32,
        /// JSON fragment
        delta: String,
    },
    /// Response finished
    #[serde(rename = "response.completed")]
    Completed {
        /// Final response
        response: ResponsesResponse,
    },
    /// Stream failed
    #[serde(rename = "error")]
    Error {
        /// Error class
        code: String,
        /// Error message
        message: String,
        /// Whether a fallback chain was walked
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback_attempted: Option<bool>,
    },
}

impl ResponsesStreamEvent {
    /// SSE `event:` name for this payload
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "response.created",
            Self::OutputItemAdded { .. } => "response.output_item.added",
            Self::OutputTextDelta { .. } => "response.output_text.delta",
            Self::ReasoningSummaryTextDelta { .. } => "response.reasoning_summary_text.delta",
            Self::FunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta",
            Self::Completed { .. } => "response.completed",
            Self::Error { .. } => "error",
        }
    }
}
