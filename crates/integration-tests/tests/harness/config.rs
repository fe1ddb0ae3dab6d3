//! Programmatic configuration builder for integration tests
//!
//! Renders TOML and loads it through [`Config::from_toml`], so the tests go
//! through the same parsing and validation as a config file.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use switchyard_config::Config;

struct MockProviderEntry {
    name: String,
    base_url: String,
    keys: Vec<String>,
    fallback_model: Option<String>,
}

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    providers: Vec<MockProviderEntry>,
    pool: BTreeMap<String, String>,
    fallback_chain: Vec<(String, Vec<String>)>,
    default_provider: Option<String>,
    health: bool,
}

impl ConfigBuilder {
    /// Create a new builder with fast retries and no background refresh
    pub fn new() -> Self {
        let pool = [
            ("refresh_enabled", "false"),
            ("request_base_delay_ms", "10"),
            ("request_timeout_secs", "10"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        Self {
            providers: Vec::new(),
            pool,
            fallback_chain: Vec::new(),
            default_provider: None,
            health: true,
        }
    }

    /// Register a provider pointed at a mock backend with one credential per key
    pub fn with_provider(mut self, name: &str, base_url: &str, keys: &[&str]) -> Self {
        self.providers.push(MockProviderEntry {
            name: name.to_owned(),
            base_url: base_url.to_owned(),
            keys: keys.iter().map(|k| (*k).to_owned()).collect(),
            fallback_model: None,
        });
        self
    }

    /// Model requested from `name` when it serves as a fallback
    pub fn with_fallback_model(mut self, name: &str, model: &str) -> Self {
        if let Some(entry) = self.providers.iter_mut().find(|p| p.name == name) {
            entry.fallback_model = Some(model.to_owned());
        }
        self
    }

    pub fn with_fallback_chain(mut self, primary: &str, chain: &[&str]) -> Self {
        self.fallback_chain
            .push((primary.to_owned(), chain.iter().map(|p| (*p).to_owned()).collect()));
        self
    }

    pub fn with_default_provider(mut self, name: &str) -> Self {
        self.default_provider = Some(name.to_owned());
        self
    }

    /// Override one `[pool]` setting with a raw TOML value
    pub fn with_pool(mut self, key: &str, value: impl ToString) -> Self {
        self.pool.insert(key.to_owned(), value.to_string());
        self
    }

    /// Disable health endpoint
    pub fn without_health(mut self) -> Self {
        self.health = false;
        self
    }

    pub fn to_toml(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "[server.health]\nenabled = {}\n", self.health);

        out.push_str("[pool]\n");
        for (key, value) in &self.pool {
            let _ = writeln!(out, "{key} = {value}");
        }

        for provider in &self.providers {
            let _ = writeln!(out, "\n[providers.{}]", provider.name);
            let _ = writeln!(out, "base_url = \"{}\"", provider.base_url);
            if let Some(model) = &provider.fallback_model {
                let _ = writeln!(out, "fallback_model = \"{model}\"");
            }
            for key in &provider.keys {
                let _ = writeln!(out, "\n[[providers.{}.credentials]]", provider.name);
                let _ = writeln!(out, "label = \"{key}\"\nsecret = \"{key}\"");
            }
        }

        if let Some(provider) = &self.default_provider {
            let _ = writeln!(out, "\n[routing]\ndefault_provider = \"{provider}\"");
        }

        if !self.fallback_chain.is_empty() {
            out.push_str("\n[fallback_chain]\n");
            for (primary, chain) in &self.fallback_chain {
                let chain: Vec<String> = chain.iter().map(|p| format!("\"{p}\"")).collect();
                let _ = writeln!(out, "{primary} = [{}]", chain.join(", "));
            }
        }

        out
    }

    /// Build the final config
    pub fn build(self) -> Config {
        Config::from_toml(&self.to_toml()).expect("test config is valid")
    }
}
