#![allow(clippy::must_use_candidate)]

pub mod capture;
mod env;
mod loader;
pub mod pool;
pub mod providers;
pub mod routing;
pub mod server;
pub mod telemetry;
pub mod transport;

use indexmap::IndexMap;
use serde::Deserialize;

pub use capture::*;
pub use pool::*;
pub use providers::*;
pub use routing::*;
pub use server::*;
pub use telemetry::TelemetryConfig;
pub use transport::*;

/// Top-level Switchyard configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listener and health endpoint
    #[serde(default)]
    pub server: ServerConfig,
    /// Credential pool policy
    #[serde(default)]
    pub pool: PoolConfig,
    /// Provider endpoints and their credentials
    #[serde(default)]
    pub providers: IndexMap<ProviderType, ProviderConfig>,
    /// Model to provider resolution
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Providers tried, in order, once a provider's pool is exhausted
    #[serde(default)]
    pub fallback_chain: IndexMap<ProviderType, Vec<ProviderType>>,
    /// Outbound HTTP transport
    #[serde(default)]
    pub transport: TransportConfig,
    /// Diagnostic capture of converted exchanges
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}
