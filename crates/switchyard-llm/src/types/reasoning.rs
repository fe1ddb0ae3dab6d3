//! Normalised extended-reasoning configuration
//!
//! Clients express reasoning in several shapes: Claude's `thinking` object,
//! the same object tunnelled through `OpenAI`'s `extra_body.anthropic`,
//! `reasoning_effort`, and the Responses API `reasoning.effort`. All of them
//! collapse into [`ReasoningConfig`] or into nothing at all.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Budget used when a Responses API effort is missing or unrecognised
pub const DEFAULT_EFFORT_BUDGET: u32 = 20_000;

/// Reasoning effort level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortLevel {
    Low,
    Medium,
    High,
}

impl EffortLevel {
    /// Case-insensitive parse
    pub fn parse(effort: &str) -> Option<Self> {
        match effort.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Token budget granted to this effort level
    pub const fn budget_tokens(self) -> u32 {
        match self {
            Self::Low => 2048,
            Self::Medium => 8192,
            Self::High => DEFAULT_EFFORT_BUDGET,
        }
    }
}

/// Extended reasoning request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReasoningConfig {
    /// Fixed token budget
    Enabled {
        /// Tokens the model may spend reasoning
        budget_tokens: u32,
    },
    /// Provider picks the budget from an effort level
    Adaptive {
        /// Requested effort
        effort: EffortLevel,
    },
}

impl ReasoningConfig {
    /// Normalise a Claude-style `thinking` value
    ///
    /// Accepts `{type: "enabled", budget_tokens}` with an integer or numeric
    /// string budget, and `{type: "adaptive", effort}`. Anything else,
    /// including a bare string or a non-positive budget, yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        match object.get("type")?.as_str()? {
            "enabled" => {
                let budget_tokens = object.get("budget_tokens").and_then(parse_budget)?;
                Some(Self::Enabled { budget_tokens })
            }
            "adaptive" => {
                let effort = object.get("effort")?.as_str().and_then(EffortLevel::parse)?;
                Some(Self::Adaptive { effort })
            }
            _ => None,
        }
    }

    /// Map an `OpenAI` `reasoning_effort` onto an adaptive config
    pub fn from_effort(effort: &str) -> Option<Self> {
        EffortLevel::parse(effort).map(|effort| Self::Adaptive { effort })
    }

    /// Map a Responses API `reasoning.effort` onto a fixed budget
    ///
    /// Unknown efforts get [`DEFAULT_EFFORT_BUDGET`].
    pub fn from_responses_effort(effort: &str) -> Self {
        Self::Enabled {
            budget_tokens: effort_to_budget(effort),
        }
    }

    /// Token budget this config amounts to
    pub const fn budget_tokens(self) -> u32 {
        match self {
            Self::Enabled { budget_tokens } => budget_tokens,
            Self::Adaptive { effort } => effort.budget_tokens(),
        }
    }

    /// Effort level this config amounts to
    pub const fn effort(self) -> EffortLevel {
        match self {
            Self::Adaptive { effort } => effort,
            Self::Enabled { budget_tokens } if budget_tokens <= 2048 => EffortLevel::Low,
            Self::Enabled { budget_tokens } if budget_tokens <= 8192 => EffortLevel::Medium,
            Self::Enabled { .. } => EffortLevel::High,
        }
    }
}

/// Token budget for a Responses API effort string
pub fn effort_to_budget(effort: &str) -> u32 {
    EffortLevel::parse(effort).map_or(DEFAULT_EFFORT_BUDGET, EffortLevel::budget_tokens)
}

fn parse_budget(value: &Value) -> Option<u32> {
    let budget = match value {
        Value::Number(number) => number.as_u64()?,
        Value::String(text) => text.trim().parse::<u64>().ok()?,
        _ => return None,
    };

    u32::try_from(budget).ok().filter(|budget| *budget > 0)
}
