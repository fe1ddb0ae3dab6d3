//! Kiro (`CodeWhisperer` streaming) wire format types
//!
//! Requests wrap the conversation in a `conversationState` envelope. The
//! response is an AWS event stream whose binary frames embed small JSON
//! payloads; [`scan_events`] pulls those payloads out of the raw bytes
//! without decoding the framing.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Origin tag the IDE sends with every user message
pub const ORIGIN: &str = "AI_EDITOR";

// -- Model ids --

fn hidden_models() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&str, &str>> = OnceLock::new();
    MAP.get_or_init(|| HashMap::from([("claude-3.7-sonnet", "CLAUDE_3_7_SONNET_20250219_V1_0")]))
}

struct ModelPatterns {
    standard: Regex,
    no_minor: Regex,
    legacy: Regex,
    dotted_date: Regex,
    inverted: Regex,
}

fn model_patterns() -> &'static ModelPatterns {
    static PATTERNS: OnceLock<ModelPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ModelPatterns {
        standard: Regex::new(r"^(claude-(?:haiku|sonnet|opus)-\d+)-(\d{1,2})(?:-(?:\d{8}|latest|\d+))?$")
            .expect("must be valid regex"),
        no_minor: Regex::new(r"^(claude-(?:haiku|sonnet|opus)-\d+)(?:-\d{8})?$").expect("must be valid regex"),
        legacy: Regex::new(r"^claude-(\d+)-(\d+)-(haiku|sonnet|opus)(?:-(?:\d{8}|latest|\d+))?$")
            .expect("must be valid regex"),
        dotted_date: Regex::new(r"^(claude-(?:\d+\.\d+-)?(?:haiku|sonnet|opus)(?:-\d+\.\d+)?)-\d{8}$")
            .expect("must be valid regex"),
        inverted: Regex::new(r"^claude-(\d+)\.(\d+)-(haiku|sonnet|opus)-.+$").expect("must be valid regex"),
    })
}

/// Map a Claude model name onto the id Kiro expects
///
/// Date suffixes are dropped and minor versions become dotted, e.g.
/// `claude-haiku-4-5-20251001` becomes `claude-haiku-4.5`. Names that match
/// no known shape pass through unchanged.
pub fn normalize_model_id(model: &str) -> String {
    let lower = model.to_lowercase();
    let patterns = model_patterns();

    let normalized = if let Some(caps) = patterns.standard.captures(&lower) {
        Some(format!("{}.{}", &caps[1], &caps[2]))
    } else if let Some(caps) = patterns.no_minor.captures(&lower) {
        Some(caps[1].to_owned())
    } else if let Some(caps) = patterns.legacy.captures(&lower) {
        Some(format!("claude-{}.{}-{}", &caps[1], &caps[2], &caps[3]))
    } else if let Some(caps) = patterns.dotted_date.captures(&lower) {
        Some(caps[1].to_owned())
    } else {
        patterns
            .inverted
            .captures(&lower)
            .map(|caps| format!("claude-{}-{}.{}", &caps[3], &caps[1], &caps[2]))
    };

    let key = normalized.as_deref().unwrap_or(&lower);
    if let Some(internal) = hidden_models().get(key) {
        return (*internal).to_owned();
    }

    normalized.unwrap_or_else(|| model.to_owned())
}

// -- Request types --

/// `POST /generateAssistantResponse` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroRequest {
    pub conversation_state: KiroConversationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroConversationState {
    /// Always `MANUAL`
    pub chat_trigger_type: String,
    /// Fresh per request
    pub conversation_id: String,
    pub current_message: KiroCurrentMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<KiroHistoryEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroCurrentMessage {
    pub user_input_message: KiroUserInputMessage,
}

/// Earlier turn of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KiroHistoryEntry {
    UserInputMessage(KiroUserInputMessage),
    AssistantResponseMessage(KiroAssistantResponseMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroUserInputMessage {
    pub content: String,
    pub model_id: String,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<KiroImage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_input_message_context: Option<KiroUserInputMessageContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroUserInputMessageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<KiroTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<KiroToolResult>>,
}

impl KiroUserInputMessageContext {
    pub const fn is_empty(&self) -> bool {
        self.tools.is_none() && self.tool_results.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroAssistantResponseMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_uses: Option<Vec<KiroToolUse>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroTool {
    pub tool_specification: KiroToolSpecification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolSpecification {
    pub name: String,
    pub description: String,
    pub input_schema: KiroInputSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KiroInputSchema {
    pub json: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolUse {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroToolResult {
    pub tool_use_id: String,
    pub content: Vec<KiroText>,
    /// `success` or `error`
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KiroText {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KiroImage {
    /// Image subtype, e.g. `png`
    pub format: String,
    pub source: KiroImageSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KiroImageSource {
    /// Base64 image data
    pub bytes: String,
}

// -- Streaming types --

/// Token accounting reported near the end of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KiroUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    /// Credits charged, when reported as a bare number
    pub credits: Option<f64>,
}

/// Payload extracted from the event stream
#[derive(Debug, Clone, PartialEq)]
pub enum KiroEvent {
    /// Assistant text, possibly containing `<thinking>` markup
    Content(String),
    /// A tool call begins
    ToolUseStart { tool_use_id: String, name: String },
    /// Fragment of a tool call's JSON input
    ToolInputDelta {
        tool_use_id: Option<String>,
        name: Option<String>,
        input: String,
    },
    /// The current tool call is complete
    ToolUseStop { tool_use_id: Option<String> },
    Usage(KiroUsage),
    /// Share of the context window in use
    ContextUsage(f64),
    /// Anything else (`followupPrompt`, new event kinds)
    Unknown(Value),
}

impl KiroEvent {
    /// Classify a decoded payload by the keys it carries
    pub fn classify(value: Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_owned);

        if value.get("stop").and_then(Value::as_bool).unwrap_or(false) {
            return Self::ToolUseStop {
                tool_use_id: text("toolUseId"),
            };
        }

        if let Some(usage) = value.get("usage") {
            return Self::Usage(parse_usage(usage));
        }

        if let Some(percentage) = value.get("contextUsagePercentage").and_then(Value::as_f64) {
            return Self::ContextUsage(percentage);
        }

        if let Some(input) = text("input") {
            return Self::ToolInputDelta {
                tool_use_id: text("toolUseId"),
                name: text("name"),
                input,
            };
        }

        if let (Some(name), Some(tool_use_id)) = (text("name"), text("toolUseId")) {
            return Self::ToolUseStart { tool_use_id, name };
        }

        if let Some(content) = text("content") {
            return Self::Content(content);
        }

        Self::Unknown(value)
    }
}

fn parse_usage(usage: &Value) -> KiroUsage {
    let count = |camel: &str, snake: &str| {
        usage
            .get(camel)
            .or_else(|| usage.get(snake))
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    };

    KiroUsage {
        input_tokens: count("inputTokens", "input_tokens"),
        output_tokens: count("outputTokens", "output_tokens"),
        credits: usage.as_f64(),
    }
}

const EVENT_PREFIXES: [&[u8]; 7] = [
    br#"{"content":"#,
    br#"{"name":"#,
    br#"{"input":"#,
    br#"{"stop":"#,
    br#"{"followupPrompt":"#,
    br#"{"usage":"#,
    br#"{"contextUsagePercentage":"#,
];

/// Extract every complete event payload from `buffer`
///
/// Returns the events and the number of leading bytes the caller may
/// discard. An incomplete payload, or a tail that could be the start of
/// one, is never counted as consumed.
pub fn scan_events(buffer: &[u8]) -> (Vec<KiroEvent>, usize) {
    let mut events = Vec::new();
    let mut pos = 0;

    while let Some(start) = find_prefix(buffer, pos) {
        let Some(end) = object_end(&buffer[start..]) else {
            return (events, start);
        };

        let payload = &buffer[start..start + end];
        match serde_json::from_slice::<Value>(payload) {
            Ok(value) => events.push(KiroEvent::classify(value)),
            Err(e) => tracing::debug!(error = %e, "skipping unparseable Kiro event payload"),
        }
        pos = start + end;
    }

    let held = partial_prefix_len(&buffer[pos..]);
    (events, buffer.len() - held)
}

fn find_prefix(buffer: &[u8], from: usize) -> Option<usize> {
    (from..buffer.len()).find(|&i| buffer[i] == b'{' && EVENT_PREFIXES.iter().any(|p| buffer[i..].starts_with(p)))
}

/// Length of the balanced JSON object at the start of `bytes`
fn object_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0u32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }

        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Bytes at the end of `tail` that could begin an event payload
fn partial_prefix_len(tail: &[u8]) -> usize {
    let longest = EVENT_PREFIXES.iter().map(|p| p.len()).max().unwrap_or(0);

    (1..longest.min(tail.len() + 1))
        .rev()
        .find(|&len| {
            let suffix = &tail[tail.len() - len..];
            EVENT_PREFIXES.iter().any(|p| p.starts_with(suffix))
        })
        .unwrap_or(0)
}

// -- Response types --

/// Non-streaming result: every event the stream produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KiroResponse {
    /// Model id the request was sent with
    pub model: String,
    /// Events in arrival order
    pub events: Vec<KiroEvent>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn model_ids_are_normalized() {
        let cases = [
            ("claude-haiku-4-5-20251001", "claude-haiku-4.5"),
            ("claude-sonnet-4-5", "claude-sonnet-4.5"),
            ("claude-sonnet-4-20250514", "claude-sonnet-4"),
            ("claude-opus-4", "claude-opus-4"),
            ("claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
            ("claude-3-5-haiku", "claude-3.5-haiku"),
            ("claude-sonnet-4.5-20250929", "claude-sonnet-4.5"),
            ("claude-4.5-opus-high", "claude-opus-4.5"),
            ("Claude-Sonnet-4-5", "claude-sonnet-4.5"),
            ("auto", "auto"),
        ];

        for (input, expected) in cases {
            assert_eq!(normalize_model_id(input), expected, "{input}");
        }
    }

    #[test]
    fn history_entries_are_externally_tagged() {
        let entry = KiroHistoryEntry::AssistantResponseMessage(KiroAssistantResponseMessage {
            content: "ok".into(),
            tool_uses: Some(vec![KiroToolUse {
                tool_use_id: "t1".into(),
                name: "lookup".into(),
                input: json!({"q": 1}),
            }]),
        });

        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"assistantResponseMessage": {
                "content": "ok",
                "toolUses": [{"toolUseId": "t1", "name": "lookup", "input": {"q": 1}}]
            }})
        );
    }

    #[test]
    fn classification_follows_key_precedence() {
        assert_eq!(
            KiroEvent::classify(json!({"name": "f", "toolUseId": "t", "stop": true})),
            KiroEvent::ToolUseStop {
                tool_use_id: Some("t".into())
            }
        );
        assert_eq!(
            KiroEvent::classify(json!({"name": "f", "toolUseId": "t", "input": "{\"a\""})),
            KiroEvent::ToolInputDelta {
                tool_use_id: Some("t".into()),
                name: Some("f".into()),
                input: "{\"a\"".into()
            }
        );
        assert_eq!(
            KiroEvent::classify(json!({"name": "f", "toolUseId": "t"})),
            KiroEvent::ToolUseStart {
                tool_use_id: "t".into(),
                name: "f".into()
            }
        );
        assert_eq!(KiroEvent::classify(json!({"content": "hi"})), KiroEvent::Content("hi".into()));
        assert_eq!(
            KiroEvent::classify(json!({"contextUsagePercentage": 12.5})),
            KiroEvent::ContextUsage(12.5)
        );
        assert!(matches!(
            KiroEvent::classify(json!({"followupPrompt": {"content": "x"}})),
            KiroEvent::Unknown(_)
        ));
    }

    #[test]
    fn usage_accepts_objects_and_numbers() {
        assert_eq!(
            KiroEvent::classify(json!({"usage": {"inputTokens": 10, "outputTokens": 4}})),
            KiroEvent::Usage(KiroUsage {
                input_tokens: Some(10),
                output_tokens: Some(4),
                credits: None
            })
        );
        assert_eq!(
            KiroEvent::classify(json!({"usage": 0.25})),
            KiroEvent::Usage(KiroUsage {
                input_tokens: None,
                output_tokens: None,
                credits: Some(0.25)
            })
        );
    }

    #[test]
    fn payloads_are_found_between_binary_frames() {
        let mut buffer = vec![0x00, 0x00, 0x01, 0x0b, 0xff, b':', b'e'];
        buffer.extend_from_slice(br#"{"content":"Hello {not a brace} \"q\""}"#);
        buffer.extend_from_slice(&[0x8a, 0x13, 0x00]);
        buffer.extend_from_slice(br#"{"content":"!"}"#);

        let (events, consumed) = scan_events(&buffer);
        assert_eq!(
            events,
            vec![
                KiroEvent::Content("Hello {not a brace} \"q\"".into()),
                KiroEvent::Content("!".into())
            ]
        );
        assert_eq!(consumed, buffer.len());
    }

    #[test]
    fn incomplete_payload_is_left_in_the_buffer() {
        let mut buffer = br#"{"content":"a"}"#.to_vec();
        let first_len = buffer.len();
        buffer.extend_from_slice(&[0x00, 0x07]);
        buffer.extend_from_slice(br#"{"content":"partial"#);

        let (events, consumed) = scan_events(&buffer);
        assert_eq!(events, vec![KiroEvent::Content("a".into())]);
        assert_eq!(consumed, first_len + 2);
    }

    #[test]
    fn split_prefix_is_held_back() {
        let buffer = b"\x00\x00junk{\"cont";
        let (events, consumed) = scan_events(buffer);
        assert!(events.is_empty());
        assert_eq!(consumed, buffer.len() - b"{\"cont".len());
    }

    #[test]
    fn multibyte_text_survives() {
        let buffer = "{\"content\":\"héllo ✓\"}".as_bytes();
        let (events, consumed) = scan_events(buffer);
        assert_eq!(events, vec![KiroEvent::Content("héllo ✓".into())]);
        assert_eq!(consumed, buffer.len());
    }
}
