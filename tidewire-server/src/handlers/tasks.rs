//! Submission endpoints: validate, mint an id, publish, announce.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tidewire_model::{
    BacktestParams, OptimizationParams, TaskEnvelope, TaskId, TaskParams, UserId,
    WalkforwardParams, WorkflowKind,
};
use tracing::info;

use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest<P> {
    pub user_id: String,
    pub params: P,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub id: String,
    pub kind: WorkflowKind,
    pub status: String,
}

type Submitted = AppResult<(StatusCode, Json<SubmitResponse>)>;

pub async fn submit_backtest(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest<BacktestParams>>, JsonRejection>,
) -> Submitted {
    let Json(request) = payload?;
    submit(&state, request.user_id, TaskParams::Backtest(request.params)).await
}

pub async fn submit_optimization(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest<OptimizationParams>>, JsonRejection>,
) -> Submitted {
    let Json(request) = payload?;
    submit(&state, request.user_id, TaskParams::Optimization(request.params)).await
}

pub async fn submit_walkforward(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest<WalkforwardParams>>, JsonRejection>,
) -> Submitted {
    let Json(request) = payload?;
    submit(&state, request.user_id, TaskParams::Walkforward(request.params)).await
}

async fn submit(state: &AppState, user_id: String, params: TaskParams) -> Submitted {
    let user_id = UserId::new(user_id)?;
    params.validate()?;

    let envelope = TaskEnvelope::new(TaskId::generate(), user_id, params);
    let receipt = state.publisher.publish(&envelope).await?;
    let announced = state.gateway.notify_task_started(&envelope);

    info!(
        task_id = %envelope.id,
        user_id = %envelope.user_id,
        channel = %receipt.channel,
        attempts = receipt.attempts,
        notified = announced.delivered,
        "task submitted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            id: envelope.id.to_string(),
            kind: envelope.kind(),
            status: "queued".to_string(),
        }),
    ))
}
