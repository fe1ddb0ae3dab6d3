use serde::Deserialize;

/// Diagnostic capture of requests, responses and stream aggregates
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    /// Log converted exchanges at debug level
    #[serde(default)]
    pub enabled: bool,
    /// Delay before a finished stream's aggregate is logged and dropped
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grace_ms: default_grace_ms(),
        }
    }
}

const fn default_grace_ms() -> u64 {
    2000
}
