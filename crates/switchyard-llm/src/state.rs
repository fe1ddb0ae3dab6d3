//! Shared gateway state built once from configuration

use std::sync::Arc;
use std::time::Duration;

use switchyard_config::{Config, ProviderType};
use switchyard_telemetry::{Counter, Histogram, metrics};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchPolicy, FallbackRouter};
use crate::error::GatewayError;
use crate::observer::{CaptureObserver, NoopObserver, Observer};
use crate::pool::PoolManager;
use crate::provider::{ClientMap, build_clients};
use crate::refresh;
use crate::registry::ConverterRegistry;
use crate::routing::ProviderRouter;
use crate::transport::{FingerprintBackend, select_transport};

/// Shared state for exchange handlers
#[derive(Clone)]
pub struct GatewayState {
    pub(crate) inner: Arc<GatewayInner>,
}

pub(crate) struct GatewayInner {
    pub(crate) registry: ConverterRegistry,
    pub(crate) router: ProviderRouter,
    pub(crate) dispatcher: FallbackRouter,
    pub(crate) pools: Arc<PoolManager>,
    pub(crate) clients: Arc<ClientMap>,
    pub(crate) refresh_interval: Option<Duration>,
    pub(crate) exchange_duration: Histogram<f64>,
    pub(crate) exchange_count: Counter<u64>,
}

impl GatewayState {
    /// Build clients, pools and routing from configuration
    ///
    /// The fingerprinting transport is used when enabled and a backend is
    /// supplied; otherwise requests go through the generic HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if a client cannot be built or the fallback
    /// chain names a provider without a client.
    pub fn from_config(config: &Config, fingerprint: Option<Arc<dyn FingerprintBackend>>) -> Result<Self, GatewayError> {
        let transport = select_transport(&config.transport, fingerprint);
        let clients = build_clients(config, &transport)?;
        Self::with_clients(config, clients)
    }

    /// Build state around an existing set of provider clients
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the fallback chain names a provider without
    /// a client.
    pub fn with_clients(config: &Config, clients: ClientMap) -> Result<Self, GatewayError> {
        for (primary, chain) in &config.fallback_chain {
            if let Some(missing) = std::iter::once(primary).chain(chain).find(|p| !clients.contains_key(*p)) {
                return Err(GatewayError::Configuration(format!(
                    "fallback chain references provider `{missing}` with no client"
                )));
            }
        }

        let observer: Arc<dyn Observer> = if config.capture.enabled {
            tracing::info!(grace_ms = config.capture.grace_ms, "diagnostic capture enabled");
            Arc::new(CaptureObserver::from_config(&config.capture))
        } else {
            Arc::new(NoopObserver)
        };

        let pools = Arc::new(PoolManager::from_config(config, &observer));
        let clients = Arc::new(clients);
        let registry = ConverterRegistry::builtin();

        let dispatcher = FallbackRouter::new(
            Arc::clone(&pools),
            Arc::clone(&clients),
            registry.clone(),
            DispatchPolicy::from(&config.pool),
            observer,
        )
        .with_config(config);

        let meter = metrics::meter();

        Ok(Self {
            inner: Arc::new(GatewayInner {
                registry,
                router: ProviderRouter::from_config(config),
                dispatcher,
                pools,
                clients,
                refresh_interval: config.pool.refresh_enabled.then(|| config.pool.refresh_interval()),
                exchange_duration: meter.f64_histogram(metrics::EXCHANGE_DURATION).with_unit("s").build(),
                exchange_count: meter.u64_counter(metrics::EXCHANGE_COUNT).build(),
            }),
        })
    }

    pub fn pools(&self) -> &PoolManager {
        &self.inner.pools
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.inner.router
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.inner.registry
    }

    /// Providers that currently hold at least one credential
    pub fn providers(&self) -> Vec<ProviderType> {
        self.inner.pools.providers().collect()
    }

    /// Spawn the background refresh loop, if enabled
    pub fn start_refresh(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let interval = self.inner.refresh_interval?;
        Some(refresh::start_refresh(
            Arc::clone(&self.inner.pools),
            Arc::clone(&self.inner.clients),
            interval,
            shutdown,
        ))
    }
}
