//! Primary provider resolution for a requested model

use indexmap::IndexMap;
use switchyard_config::{Config, ProviderType};

use crate::error::GatewayError;

/// Primary provider and the model name to ask it for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub provider: ProviderType,
    pub model: String,
}

/// Picks the primary provider of an exchange
///
/// In order: the `model-provider` header, a `provider/model` prefix, the
/// longest configured model prefix, the model family, the configured
/// default, and finally the first provider with credentials.
#[derive(Debug, Clone, Default)]
pub struct ProviderRouter {
    models: IndexMap<String, ProviderType>,
    default_provider: Option<ProviderType>,
    registered: Vec<ProviderType>,
}

impl ProviderRouter {
    pub fn new(registered: Vec<ProviderType>) -> Self {
        Self {
            registered,
            ..Self::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            models: config.routing.models.clone(),
            default_provider: config.routing.default_provider,
            registered: config
                .providers
                .iter()
                .filter(|(_, provider)| !provider.credentials.is_empty())
                .map(|(provider, _)| *provider)
                .collect(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, prefix: impl Into<String>, provider: ProviderType) -> Self {
        self.models.insert(prefix.into(), provider);
        self
    }

    #[must_use]
    pub const fn with_default(mut self, provider: ProviderType) -> Self {
        self.default_provider = Some(provider);
        self
    }

    /// # Errors
    ///
    /// `UnknownProvider` when the hint names no provider, `Configuration`
    /// when no provider is registered at all.
    pub fn resolve(&self, model: &str, hint: Option<&str>) -> Result<ResolvedRoute, GatewayError> {
        if let Some(hint) = hint {
            let provider = hint
                .parse::<ProviderType>()
                .map_err(|_| GatewayError::UnknownProvider(hint.to_owned()))?;
            return Ok(ResolvedRoute {
                provider,
                model: strip_provider_prefix(model, provider).to_owned(),
            });
        }

        if let Some((prefix, rest)) = model.split_once('/')
            && let Ok(provider) = prefix.parse::<ProviderType>()
        {
            return Ok(ResolvedRoute {
                provider,
                model: rest.to_owned(),
            });
        }

        let provider = self
            .configured(model)
            .or_else(|| family(model))
            .or(self.default_provider)
            .or_else(|| self.registered.first().copied())
            .ok_or_else(|| GatewayError::Configuration("no provider is registered".to_owned()))?;

        Ok(ResolvedRoute {
            provider,
            model: model.to_owned(),
        })
    }

    /// Longest matching prefix from the routing table
    fn configured(&self, model: &str) -> Option<ProviderType> {
        self.models
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, provider)| *provider)
    }
}

fn strip_provider_prefix(model: &str, provider: ProviderType) -> &str {
    model
        .split_once('/')
        .filter(|(prefix, _)| prefix.eq_ignore_ascii_case(provider.as_str()))
        .map_or(model, |(_, rest)| rest)
}

/// Provider implied by well-known model name families
fn family(model: &str) -> Option<ProviderType> {
    let model = model.to_ascii_lowercase();
    let provider = if model.starts_with("claude") {
        ProviderType::Claude
    } else if model.starts_with("gemini") {
        ProviderType::Gemini
    } else if model.starts_with("grok") {
        ProviderType::Grok
    } else if ["gpt", "o1", "o3", "o4", "chatgpt"].iter().any(|p| model.starts_with(p)) {
        ProviderType::Openai
    } else {
        return None;
    };
    Some(provider)
}
