use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    handlers::{alerts, handle_websocket, health, tasks},
    infra::app_state::AppState,
};

/// Versioned submission API.
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/backtests", post(tasks::submit_backtest))
        .route("/optimizations", post(tasks::submit_optimization))
        .route("/walkforwards", post(tasks::submit_walkforward))
        .route("/alerts", post(alerts::trigger_alert))
}

pub fn create_app(state: AppState) -> Router {
    // Permissive in dev, allow-list otherwise
    let cors_layer = if state.config().dev_mode {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config()
            .gateway
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "ignoring unparsable CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    let gateway_path = state.config().gateway.route_path();

    Router::new()
        .route("/health", get(health::health_handler))
        .route(&gateway_path, get(handle_websocket::websocket_handler))
        .nest("/api/v1", create_v1_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}
