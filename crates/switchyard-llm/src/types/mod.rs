//! Canonical request, response and stream types
//!
//! Every wire format converts to and from these. They carry the union of
//! what the supported protocols can express: reasoning next to visible
//! text, tool calls, and multimodal parts.

pub mod message;
pub mod reasoning;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use message::{ContentPart, Message, Role, ToolCall};
pub use reasoning::{EffortLevel, ReasoningConfig};
pub use request::{CompletionParams, CompletionRequest};
pub use response::{Choice, ChoiceMessage, CompletionResponse, FinishReason, Usage};
pub use stream::{StreamDelta, StreamEvent, StreamFailure, StreamFunctionCall, StreamPhase, StreamToolCall};
pub use tool::{ToolChoice, ToolDefinition};
