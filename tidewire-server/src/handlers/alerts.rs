use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tidewire_model::UserId;

use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRequest {
    pub user_id: String,
    pub alert: Value,
}

/// Pushes an `alert:triggered` event to every live socket of the user. A user
/// with no sockets is accepted all the same.
pub async fn trigger_alert(
    State(state): State<AppState>,
    payload: Result<Json<AlertRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(request) = payload?;
    let user_id = UserId::new(request.user_id)?;
    let report = state.gateway.notify_alert(&user_id, request.alert);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "userId": user_id,
            "delivered": report.delivered,
        })),
    ))
}
