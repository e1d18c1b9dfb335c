use axum::{Json, extract::State};
use serde::Serialize;

use crate::infra::{
    app_state::AppState,
    pubsub::RouterStats,
    upstream::{ConsumerState, ConsumerStats},
    websocket::GatewayStats,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub gateway: GatewayStats,
    pub router: RouterStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamHealth>,
}

#[derive(Debug, Serialize)]
pub struct UpstreamHealth {
    #[serde(flatten)]
    pub state: ConsumerState,
    pub stats: ConsumerStats,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    let upstream = state.upstream.as_ref().map(|consumer| UpstreamHealth {
        state: consumer.state().borrow().clone(),
        stats: consumer.stats(),
    });
    let degraded = matches!(
        upstream,
        Some(UpstreamHealth {
            state: ConsumerState::Failed { .. },
            ..
        })
    );

    Json(HealthReport {
        status: if degraded { "degraded" } else { "ok" },
        gateway: state.gateway.stats(),
        router: state.router.stats(),
        upstream,
    })
}
