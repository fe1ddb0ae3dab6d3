//! Background usage sync for pooled credentials

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use switchyard_telemetry::{KeyValue, metrics};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::pool::PoolManager;
use crate::provider::ClientMap;

/// Outcome of one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub synced: usize,
    pub failed: usize,
}

/// Sync every stale or flagged credential once
///
/// Pools whose client cannot sync usage are skipped. Syncs of one pass run
/// concurrently.
pub async fn refresh_once(pools: &PoolManager, clients: &ClientMap) -> RefreshSummary {
    let counter = metrics::meter().u64_counter(metrics::CREDENTIAL_REFRESH_COUNT).build();
    let mut syncs = Vec::new();

    for pool in pools.iter() {
        let Some(client) = clients.get(&pool.provider()) else {
            continue;
        };
        if !client.supports_usage_sync() {
            continue;
        }

        for record in pool.scan_refresh_candidates() {
            let pool = Arc::clone(pool);
            let client = Arc::clone(client);
            syncs.push(async move {
                let result = client.sync_usage(&record).await;
                let outcome = if result.is_ok() { "success" } else { "failure" };
                match result {
                    Ok(snapshot) => pool.record_sync_success(&record, snapshot),
                    Err(e) => {
                        tracing::warn!(
                            provider = %pool.provider(),
                            credential = %record.id,
                            error = %e,
                            "usage sync failed"
                        );
                        pool.record_sync_failure(&record);
                    }
                }
                (pool.provider(), outcome)
            });
        }
    }

    let mut summary = RefreshSummary::default();
    for (provider, outcome) in join_all(syncs).await {
        counter.add(
            1,
            &[
                KeyValue::new("provider", provider.as_str()),
                KeyValue::new("outcome", outcome),
            ],
        );
        if outcome == "success" {
            summary.synced += 1;
        } else {
            summary.failed += 1;
        }
    }

    if summary != RefreshSummary::default() {
        tracing::debug!(synced = summary.synced, failed = summary.failed, "refresh pass finished");
    }
    summary
}

/// Run [`refresh_once`] every `interval` until `shutdown` fires
pub fn start_refresh(
    pools: Arc<PoolManager>,
    clients: Arc<ClientMap>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "credential refresh started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    refresh_once(&pools, &clients).await;
                }
            }
        }

        tracing::info!("credential refresh stopped");
    })
}
