use serde::{Deserialize, Serialize};

use super::response::{FinishReason, Usage};
use crate::error::ErrorKind;

/// Canonical chunk of a streaming exchange
///
/// Every exchange ends with exactly one terminal chunk: `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// Incremental content delta
    Delta(StreamDelta),
    /// Usage statistics
    Usage(Usage),
    /// Stream has completed
    Done,
    /// Stream failed after the exchange was committed
    Error(StreamFailure),
}

impl StreamEvent {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

/// Terminal failure carried by [`StreamEvent::Error`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFailure {
    /// Failure class
    pub kind: ErrorKind,
    /// Client-safe description
    pub message: String,
    /// Whether providers beyond the primary were tried
    #[serde(default)]
    pub fallback_attempted: bool,
}

impl StreamFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fallback_attempted: false,
        }
    }
}

/// Lifecycle of a committed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Chunks are still flowing
    Streaming,
    /// `Done` was emitted
    Terminal,
    /// `Error` was emitted
    Errored,
}

/// Incremental update within a streaming response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Choice index this delta belongs to
    pub index: u32,
    /// Incremental visible text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Incremental reasoning text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Incremental tool call data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<StreamToolCall>,
    /// Reason generation finished (present on final delta)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl StreamDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: Some(reasoning.into()),
            ..Self::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }

    /// First fragment of a tool call, carrying its id and name
    pub fn tool_call_start(index: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tool_call: Some(StreamToolCall {
                index,
                id: Some(id.into()),
                function: Some(StreamFunctionCall {
                    name: Some(name.into()),
                    arguments: Some(String::new()),
                }),
            }),
            ..Self::default()
        }
    }

    /// Later fragment of a tool call's arguments
    pub fn tool_call_arguments(index: u32, arguments: impl Into<String>) -> Self {
        Self {
            tool_call: Some(StreamToolCall {
                index,
                id: None,
                function: Some(StreamFunctionCall {
                    name: None,
                    arguments: Some(arguments.into()),
                }),
            }),
            ..Self::default()
        }
    }
}

/// Partial tool call data within a stream delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamToolCall {
    /// Index of this tool call in the `tool_calls` array
    pub index: u32,
    /// Tool call ID (present on first chunk only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Partial function call data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<StreamFunctionCall>,
}

/// Partial function call data within a streaming tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFunctionCall {
    /// Function name (present on first chunk only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Incremental arguments JSON fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}
