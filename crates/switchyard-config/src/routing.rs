use indexmap::IndexMap;
use serde::Deserialize;

use crate::ProviderType;

/// How a requested model name selects its primary provider
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Provider used when nothing else matches
    #[serde(default)]
    pub default_provider: Option<ProviderType>,
    /// Model-name prefixes mapped to providers; the longest match wins
    #[serde(default)]
    pub models: IndexMap<String, ProviderType>,
}
