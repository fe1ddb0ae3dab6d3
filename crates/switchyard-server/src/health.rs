use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use indexmap::IndexMap;
use serde::Serialize;
use switchyard_llm::GatewayState;
use switchyard_llm::pool::CredentialStatus;

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    providers: IndexMap<&'static str, PoolHealth>,
}

#[derive(Debug, Default, Serialize)]
struct PoolHealth {
    credentials: usize,
    active: usize,
    cooling_down: usize,
    disabled: usize,
}

/// Health check handler with a per-provider credential summary
pub async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let providers = state
        .pools()
        .iter()
        .map(|pool| {
            let mut health = PoolHealth::default();
            for record in pool.records() {
                health.credentials += 1;
                match record.state().status {
                    CredentialStatus::Active => health.active += 1,
                    CredentialStatus::CoolingDown { .. } => health.cooling_down += 1,
                    CredentialStatus::Disabled => health.disabled += 1,
                }
            }
            (pool.provider().as_str(), health)
        })
        .collect();

    let status = if state.pools().iter().any(|pool| {
        pool.records()
            .iter()
            .any(|record| record.state().status == CredentialStatus::Active)
    }) {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthReport { status, providers })
}
