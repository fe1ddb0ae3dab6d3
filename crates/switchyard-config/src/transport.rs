use std::time::Duration;

use serde::Deserialize;

/// Outbound transport selection
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Prefer the fingerprinting backend when one is installed
    #[serde(default)]
    pub fingerprint: bool,
    /// Browser profile the fingerprinting backend should impersonate
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Timeout for buffered calls, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Timeout for streamed calls, in seconds
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
}

impl TransportConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub const fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            fingerprint: false,
            profile: default_profile(),
            timeout_secs: default_timeout_secs(),
            stream_timeout_secs: default_stream_timeout_secs(),
        }
    }
}

fn default_profile() -> String {
    "chrome_131".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_stream_timeout_secs() -> u64 {
    120
}
