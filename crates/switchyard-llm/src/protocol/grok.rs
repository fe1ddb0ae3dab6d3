//! Grok web chat wire format types
//!
//! Grok takes a single flattened prompt per request and answers with
//! newline-delimited JSON (optionally `data: `-prefixed) carrying
//! `result.response` chunks.

use serde::{Deserialize, Serialize};

/// Model id whose quota the rate-limit endpoint reports
pub const USAGE_MODEL_NAME: &str = "grok-4-1-thinking-1129";

/// Query allowance the usage figures are reported against
pub const QUERY_ALLOWANCE: i64 = 80;

/// Upstream model name and mode for a public model id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrokModel {
    pub name: &'static str,
    pub mode: &'static str,
}

const MODELS: &[(&str, GrokModel)] = &[
    ("grok-3", GrokModel { name: "grok-3", mode: "MODEL_MODE_GROK_3" }),
    ("grok-3-mini", GrokModel { name: "grok-3", mode: "MODEL_MODE_GROK_3_MINI_THINKING" }),
    ("grok-3-thinking", GrokModel { name: "grok-3", mode: "MODEL_MODE_GROK_3_THINKING" }),
    ("grok-4", GrokModel { name: "grok-4", mode: "MODEL_MODE_GROK_4" }),
    ("grok-4-mini", GrokModel { name: "grok-4-mini", mode: "MODEL_MODE_GROK_4_MINI_THINKING" }),
    ("grok-4-thinking", GrokModel { name: "grok-4", mode: "MODEL_MODE_GROK_4_THINKING" }),
    ("grok-4-heavy", GrokModel { name: "grok-4", mode: "MODEL_MODE_HEAVY" }),
    ("grok-4.1-mini", GrokModel { name: "grok-4-1-thinking-1129", mode: "MODEL_MODE_GROK_4_1_MINI_THINKING" }),
    ("grok-4.1-fast", GrokModel { name: "grok-4-1-thinking-1129", mode: "MODEL_MODE_FAST" }),
    ("grok-4.1-expert", GrokModel { name: "grok-4-1-thinking-1129", mode: "MODEL_MODE_EXPERT" }),
    ("grok-4.1-thinking", GrokModel { name: "grok-4-1-thinking-1129", mode: "MODEL_MODE_GROK_4_1_THINKING" }),
    ("grok-4.20-beta", GrokModel { name: "grok-420", mode: "MODEL_MODE_GROK_420" }),
];

/// Resolve a public model id; unknown ids get the `grok-3` mapping
pub fn resolve_model(model: &str) -> GrokModel {
    MODELS
        .iter()
        .find(|(id, _)| *id == model)
        .map_or(MODELS[0].1, |(_, mapped)| *mapped)
}

/// Public model ids
pub fn model_ids() -> impl Iterator<Item = &'static str> {
    MODELS.iter().map(|(id, _)| *id)
}

// -- Request types --

/// `POST /rest/app-chat/conversations/new` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrokRequest {
    pub device_env_info: GrokDeviceEnvInfo,
    pub disable_memory: bool,
    pub disable_search: bool,
    pub disable_self_harm_short_circuit: bool,
    pub disable_text_follow_ups: bool,
    pub enable_image_generation: bool,
    pub enable_image_streaming: bool,
    pub enable_side_by_side: bool,
    pub file_attachments: Vec<String>,
    pub force_concise: bool,
    pub force_side_by_side: bool,
    pub image_attachments: Vec<String>,
    pub image_generation_count: u32,
    pub is_async_chat: bool,
    pub is_reasoning: bool,
    /// Flattened conversation
    pub message: String,
    pub model_mode: String,
    pub model_name: String,
    pub response_metadata: GrokResponseMetadata,
    pub return_image_bytes: bool,
    pub return_raw_grok_in_xai_request: bool,
    pub send_final_metadata: bool,
    pub temporary: bool,
    pub tool_overrides: serde_json::Map<String, serde_json::Value>,
}

impl GrokRequest {
    /// Request for `message` against a resolved model, with the web client's defaults
    pub fn new(message: String, model: GrokModel) -> Self {
        Self {
            device_env_info: GrokDeviceEnvInfo::default(),
            disable_memory: false,
            disable_search: false,
            disable_self_harm_short_circuit: false,
            disable_text_follow_ups: false,
            enable_image_generation: true,
            enable_image_streaming: true,
            enable_side_by_side: true,
            file_attachments: Vec::new(),
            force_concise: false,
            force_side_by_side: false,
            image_attachments: Vec::new(),
            image_generation_count: 2,
            is_async_chat: false,
            is_reasoning: false,
            message,
            model_mode: model.mode.to_owned(),
            model_name: model.name.to_owned(),
            response_metadata: GrokResponseMetadata {
                request_model_details: GrokModelDetails {
                    model_id: model.name.to_owned(),
                },
                model_config_override: serde_json::Map::new(),
            },
            return_image_bytes: false,
            return_raw_grok_in_xai_request: false,
            send_final_metadata: true,
            temporary: true,
            tool_overrides: serde_json::Map::new(),
        }
    }
}

/// Browser environment the web client reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrokDeviceEnvInfo {
    pub dark_mode_enabled: bool,
    pub device_pixel_ratio: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for GrokDeviceEnvInfo {
    fn default() -> Self {
        Self {
            dark_mode_enabled: false,
            device_pixel_ratio: 2,
            screen_width: 2056,
            screen_height: 1329,
            viewport_width: 2056,
            viewport_height: 1083,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrokResponseMetadata {
    pub request_model_details: GrokModelDetails,
    pub model_config_override: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrokModelDetails {
    pub model_id: String,
}

// -- Streaming types --

/// One `result.response` object of the stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrokChunk {
    /// Next token of text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Conversation response identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Whether `token` is reasoning
    #[serde(default)]
    pub is_thinking: bool,
    /// End-of-stream marker
    #[serde(default)]
    pub is_done: bool,
    /// Final assembled message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_response: Option<GrokModelResponse>,
}

impl GrokChunk {
    /// Synthetic end-of-stream chunk
    pub fn done(response_id: impl Into<String>) -> Self {
        Self {
            response_id: Some(response_id.into()),
            is_done: true,
            ..Self::default()
        }
    }
}

/// Final message attached to the last content chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrokModelResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GrokEnvelope {
    #[serde(default)]
    result: Option<GrokResult>,
}

#[derive(Debug, Deserialize)]
struct GrokResult {
    #[serde(default)]
    response: Option<GrokChunk>,
}

/// What one stream line turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum GrokLine {
    /// A `result.response` chunk
    Chunk(GrokChunk),
    /// Valid JSON without a response object
    Ignored,
    /// `[DONE]` sentinel
    Done,
}

/// Decode one line of the response body
///
/// Blank lines and SSE comments decode to `Ignored`.
pub fn parse_line(line: &str) -> Result<GrokLine, serde_json::Error> {
    let trimmed = line.trim();
    let data = trimmed.strip_prefix("data: ").map_or(trimmed, str::trim);

    if data.is_empty() || data.starts_with(':') {
        return Ok(GrokLine::Ignored);
    }
    if data == "[DONE]" {
        return Ok(GrokLine::Done);
    }

    let envelope: GrokEnvelope = serde_json::from_str(data)?;
    Ok(envelope
        .result
        .and_then(|result| result.response)
        .map_or(GrokLine::Ignored, GrokLine::Chunk))
}

// -- Response types --

/// Non-streaming result: every chunk the stream produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrokResponse {
    /// Model name the request was sent with
    pub model: String,
    /// Chunks in arrival order
    pub chunks: Vec<GrokChunk>,
}

// -- Usage types --

/// `POST /rest/rate-limits` body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrokRateLimitRequest {
    pub request_kind: &'static str,
    pub model_name: &'static str,
}

impl Default for GrokRateLimitRequest {
    fn default() -> Self {
        Self {
            request_kind: "DEFAULT",
            model_name: USAGE_MODEL_NAME,
        }
    }
}

/// `POST /rest/rate-limits` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrokRateLimits {
    #[serde(default)]
    pub remaining_tokens: Option<i64>,
    #[serde(default)]
    pub remaining_queries: Option<i64>,
    #[serde(default)]
    pub total_queries: Option<i64>,
}

/// Usage snapshot stored on a Grok credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GrokUsage {
    pub remaining: Option<i64>,
    pub total: i64,
    pub used: i64,
}

impl GrokRateLimits {
    pub fn usage(&self) -> GrokUsage {
        let remaining = self.remaining_tokens.or(self.remaining_queries).or(self.total_queries);
        let used = self
            .remaining_queries
            .or(self.total_queries)
            .map_or(0, |left| (QUERY_ALLOWANCE - left).max(0));

        GrokUsage {
            remaining,
            total: QUERY_ALLOWANCE,
            used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_map_to_name_and_mode() {
        assert_eq!(
            resolve_model("grok-4-heavy"),
            GrokModel {
                name: "grok-4",
                mode: "MODEL_MODE_HEAVY"
            }
        );
        assert_eq!(resolve_model("grok-4.1-fast").name, "grok-4-1-thinking-1129");
        assert_eq!(resolve_model("grok-4.20-beta").mode, "MODEL_MODE_GROK_420");
        assert_eq!(model_ids().count(), 12);
    }

    #[test]
    fn unknown_model_falls_back_to_grok_3() {
        assert_eq!(resolve_model("grok-99"), resolve_model("grok-3"));
    }

    #[test]
    fn payload_carries_web_client_defaults() {
        let request = GrokRequest::new("hi".into(), resolve_model("grok-4"));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["modelMode"], "MODEL_MODE_GROK_4");
        assert_eq!(value["responseMetadata"]["requestModelDetails"]["modelId"], "grok-4");
        assert_eq!(value["deviceEnvInfo"]["viewportHeight"], 1083);
        assert_eq!(value["imageGenerationCount"], 2);
        assert_eq!(value["sendFinalMetadata"], true);
        assert_eq!(value["temporary"], true);
        assert_eq!(value["toolOverrides"], serde_json::json!({}));
    }

    #[test]
    fn lines_decode_with_or_without_data_prefix() {
        let raw = r#"{"result":{"response":{"token":"Hi","isThinking":true,"responseId":"r1"}}}"#;
        let GrokLine::Chunk(chunk) = parse_line(raw).unwrap() else {
            panic!("expected a chunk");
        };
        assert_eq!(chunk.token.as_deref(), Some("Hi"));
        assert!(chunk.is_thinking);
        assert_eq!(chunk.response_id.as_deref(), Some("r1"));

        let prefixed = format!("data: {raw}  ");
        assert!(matches!(parse_line(&prefixed).unwrap(), GrokLine::Chunk(_)));
    }

    #[test]
    fn sentinels_and_noise() {
        assert_eq!(parse_line("data: [DONE]").unwrap(), GrokLine::Done);
        assert_eq!(parse_line("   ").unwrap(), GrokLine::Ignored);
        assert_eq!(parse_line(": keep-alive").unwrap(), GrokLine::Ignored);
        assert_eq!(parse_line(r#"{"result":{}}"#).unwrap(), GrokLine::Ignored);
        assert!(parse_line("<html>").is_err());
    }

    #[test]
    fn usage_prefers_remaining_tokens() {
        let limits = GrokRateLimits {
            remaining_tokens: Some(500),
            remaining_queries: Some(30),
            total_queries: None,
        };
        assert_eq!(
            limits.usage(),
            GrokUsage {
                remaining: Some(500),
                total: 80,
                used: 50
            }
        );
    }

    #[test]
    fn usage_never_goes_negative() {
        let limits = GrokRateLimits {
            remaining_tokens: None,
            remaining_queries: None,
            total_queries: Some(120),
        };
        let usage = limits.usage();
        assert_eq!(usage.remaining, Some(120));
        assert_eq!(usage.used, 0);

        assert_eq!(GrokRateLimits::default().usage().remaining, None);
    }
}
