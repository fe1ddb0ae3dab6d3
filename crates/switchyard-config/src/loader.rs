use std::path::Path;

use crate::{Config, ProviderType};

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing or validation fails
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error naming the first inconsistency found
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_has_credentials()?;
        self.validate_fallback_chain()?;
        self.validate_routing()?;
        self.validate_pool()?;
        Ok(())
    }

    /// Providers that have at least one credential configured
    pub fn registered_providers(&self) -> impl Iterator<Item = ProviderType> + '_ {
        self.providers
            .iter()
            .filter(|(_, provider)| !provider.credentials.is_empty())
            .map(|(provider_type, _)| *provider_type)
    }

    fn is_registered(&self, provider: ProviderType) -> bool {
        self.providers
            .get(&provider)
            .is_some_and(|config| !config.credentials.is_empty())
    }

    fn validate_has_credentials(&self) -> anyhow::Result<()> {
        if self.registered_providers().next().is_none() {
            anyhow::bail!("at least one provider must have credentials configured");
        }

        Ok(())
    }

    fn validate_fallback_chain(&self) -> anyhow::Result<()> {
        for (primary, chain) in &self.fallback_chain {
            if !self.is_registered(*primary) {
                anyhow::bail!("fallback_chain references unregistered provider '{primary}'");
            }

            if let Some(missing) = chain.iter().find(|provider| !self.is_registered(**provider)) {
                anyhow::bail!("fallback_chain for '{primary}' references unregistered provider '{missing}'");
            }
        }

        Ok(())
    }

    fn validate_routing(&self) -> anyhow::Result<()> {
        if let Some(provider) = self.routing.default_provider
            && !self.is_registered(provider)
        {
            anyhow::bail!("routing.default_provider references unregistered provider '{provider}'");
        }

        for (prefix, provider) in &self.routing.models {
            if !self.is_registered(*provider) {
                anyhow::bail!("routing.models entry '{prefix}' references unregistered provider '{provider}'");
            }
        }

        Ok(())
    }

    fn validate_pool(&self) -> anyhow::Result<()> {
        if self.pool.max_credential_switches == 0 {
            anyhow::bail!("pool.max_credential_switches must be greater than 0");
        }

        if self.pool.refresh_enabled && self.pool.refresh_interval_secs == 0 {
            anyhow::bail!("pool.refresh_interval_secs must be greater than 0 when refresh is enabled");
        }

        Ok(())
    }
}
