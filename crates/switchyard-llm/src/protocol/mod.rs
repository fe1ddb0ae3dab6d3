//! Wire format types for the protocols the gateway speaks
//!
//! Each module contains pure serde structs matching one API's JSON shape.
//! They are only used at the boundary; everything in between works on the
//! canonical types. [`NativeRequest`], [`NativeResponse`] and
//! [`NativeChunk`] tag a wire value with the protocol it belongs to.

pub mod anthropic;
pub mod google;
pub mod grok;
pub mod kiro;
pub mod openai;
pub mod openai_responses;

use std::fmt;

use serde::{Deserialize, Serialize};
use switchyard_config::ProviderType;

use self::anthropic::{AnthropicRequest, AnthropicResponse, AnthropicStreamEvent};
use self::google::{GoogleRequest, GoogleResponse, GoogleStreamFrame};
use self::grok::{GrokChunk, GrokRequest, GrokResponse};
use self::kiro::{KiroEvent, KiroRequest, KiroResponse};
use self::openai::{OpenAiRequest, OpenAiResponse, OpenAiStreamFrame};
use self::openai_responses::{ResponsesRequest, ResponsesResponse, ResponsesStreamEvent};

/// Wire protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// `OpenAI` chat completions
    OpenAi,
    /// `OpenAI` Responses API
    OpenAiResponses,
    /// Anthropic Messages
    Anthropic,
    /// Google Generative Language
    Gemini,
    /// Grok web chat
    Grok,
    /// Kiro `CodeWhisperer` streaming
    Kiro,
}

impl Protocol {
    pub const ALL: [Self; 6] = [
        Self::OpenAi,
        Self::OpenAiResponses,
        Self::Anthropic,
        Self::Gemini,
        Self::Grok,
        Self::Kiro,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::OpenAiResponses => "openai_responses",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Grok => "grok",
            Self::Kiro => "kiro",
        }
    }

    /// Native protocol of a provider family
    pub const fn of_provider(provider: ProviderType) -> Self {
        match provider {
            ProviderType::Openai => Self::OpenAi,
            ProviderType::Claude => Self::Anthropic,
            ProviderType::Gemini => Self::Gemini,
            ProviderType::Grok => Self::Grok,
            ProviderType::Kiro => Self::Kiro,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body in some wire protocol
#[derive(Debug, Clone)]
pub enum NativeRequest {
    OpenAi(OpenAiRequest),
    OpenAiResponses(ResponsesRequest),
    Anthropic(AnthropicRequest),
    /// Gemini carries the model and action in the URL rather than the body
    Gemini {
        model: String,
        request: GoogleRequest,
    },
    Grok(GrokRequest),
    Kiro(KiroRequest),
}

impl NativeRequest {
    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::OpenAi(_) => Protocol::OpenAi,
            Self::OpenAiResponses(_) => Protocol::OpenAiResponses,
            Self::Anthropic(_) => Protocol::Anthropic,
            Self::Gemini { .. } => Protocol::Gemini,
            Self::Grok(_) => Protocol::Grok,
            Self::Kiro(_) => Protocol::Kiro,
        }
    }

    /// Body as JSON, for capture logs
    pub fn to_json(&self) -> serde_json::Value {
        let encoded = match self {
            Self::OpenAi(request) => serde_json::to_value(request),
            Self::OpenAiResponses(request) => serde_json::to_value(request),
            Self::Anthropic(request) => serde_json::to_value(request),
            Self::Gemini { request, .. } => serde_json::to_value(request),
            Self::Grok(request) => serde_json::to_value(request),
            Self::Kiro(request) => serde_json::to_value(request),
        };
        encoded.unwrap_or(serde_json::Value::Null)
    }
}

/// Unary response body in some wire protocol
#[derive(Debug, Clone)]
pub enum NativeResponse {
    OpenAi(OpenAiResponse),
    OpenAiResponses(ResponsesResponse),
    Anthropic(AnthropicResponse),
    Gemini(GoogleResponse),
    Grok(GrokResponse),
    Kiro(KiroResponse),
}

impl NativeResponse {
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
}

/// One decoded stream frame in some wire protocol
#[derive(Debug, Clone)]
pub enum NativeChunk {
    OpenAi(OpenAiStreamFrame),
    OpenAiResponses(ResponsesStreamEvent),
    Anthropic(AnthropicStreamEvent),
    Gemini(GoogleStreamFrame),
    Grok(GrokChunk),
    Kiro(KiroEvent),
}

impl NativeChunk {
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
}
