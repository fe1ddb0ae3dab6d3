use std::{collections::BTreeMap, fmt, str::FromStr};

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Back-end provider families the gateway can pool credentials for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// OpenAI-compatible chat completions
    Openai,
    /// Anthropic Messages API
    Claude,
    /// Google Generative Language API
    Gemini,
    /// Grok web chat
    Grok,
    /// Kiro (`CodeWhisperer` streaming)
    Kiro,
}

impl ProviderType {
    pub const ALL: [Self; 5] = [Self::Openai, Self::Claude, Self::Gemini, Self::Grok, Self::Kiro];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Grok => "grok",
            Self::Kiro => "kiro",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown provider `{s}`"))
    }
}

/// Endpoint and credentials for one provider
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Model requested when this provider serves as a fallback
    #[serde(default)]
    pub fallback_model: Option<String>,
    /// Credentials pooled for this provider
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

/// A single credential
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialConfig {
    /// Human-readable name used in logs
    #[serde(default)]
    pub label: Option<String>,
    /// API key, bearer or session token
    pub secret: SecretString,
    /// Provider-specific extras (e.g. `cf_clearance`, `profile_arn`, `region`)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Load the credential but never hand it out
    #[serde(default)]
    pub disabled: bool,
}
