use std::time::Duration;

use serde::Deserialize;

/// Credential pool, failover and refresh policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Credential switches allowed per provider within one exchange
    #[serde(default = "default_max_credential_switches")]
    pub max_credential_switches: u32,
    /// Consecutive failures after which a credential is disabled
    #[serde(default = "default_max_error_count")]
    pub max_error_count: u32,
    /// Age of the last usage sync after which a credential is flagged for refresh
    #[serde(default = "default_near_expiry_minutes")]
    pub near_expiry_minutes: u64,
    /// Run the background refresh task
    #[serde(default = "default_true")]
    pub refresh_enabled: bool,
    /// Interval between refresh scans, in seconds
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Upper bound on a single provider call, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries on the same credential after a transport failure
    #[serde(default = "default_request_max_retries")]
    pub request_max_retries: u32,
    /// Base delay of the exponential retry backoff, in milliseconds
    #[serde(default = "default_request_base_delay_ms")]
    pub request_base_delay_ms: u64,
    /// How long a rate-limited credential sits out when no retry-after is given
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
    /// Clear a credential's error count after a successful request
    #[serde(default = "default_true")]
    pub reset_errors_on_success: bool,
    /// Clear a credential's error count after a successful usage sync
    #[serde(default = "default_true")]
    pub reset_errors_on_sync: bool,
}

impl PoolConfig {
    pub const fn near_expiry(&self) -> Duration {
        Duration::from_secs(self.near_expiry_minutes * 60)
    }

    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn request_base_delay(&self) -> Duration {
        Duration::from_millis(self.request_base_delay_ms)
    }

    pub const fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_credential_switches: default_max_credential_switches(),
            max_error_count: default_max_error_count(),
            near_expiry_minutes: default_near_expiry_minutes(),
            refresh_enabled: true,
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            request_max_retries: default_request_max_retries(),
            request_base_delay_ms: default_request_base_delay_ms(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            reset_errors_on_success: true,
            reset_errors_on_sync: true,
        }
    }
}

const fn default_max_credential_switches() -> u32 {
    5
}

const fn default_max_error_count() -> u32 {
    10
}

const fn default_near_expiry_minutes() -> u64 {
    15
}

const fn default_refresh_interval_secs() -> u64 {
    60
}

const fn default_request_timeout_secs() -> u64 {
    60
}

const fn default_request_max_retries() -> u32 {
    3
}

const fn default_request_base_delay_ms() -> u64 {
    1000
}

const fn default_rate_limit_cooldown_secs() -> u64 {
    60
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}
