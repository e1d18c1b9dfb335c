mod common;

use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use tidewire_config::PublisherConfig;
use tidewire_model::{Channel, WorkflowKind, protocol::events};
use tidewire_server::{create_app, handlers::tasks::SubmitResponse};

use common::{Harness, backtest_params, optimization_params, walkforward_params};

fn server(harness: &Harness) -> TestServer {
    TestServer::new(create_app(harness.state.clone())).unwrap()
}

#[tokio::test]
async fn backtest_submission_is_published_and_announced() {
    let harness = Harness::start().await;
    let server = server(&harness);
    let (conn, mut rx) = harness.state.gateway.connect();
    harness.state.gateway.subscribe(conn.id, Some("u1")).unwrap();

    let response = server
        .post("/api/v1/backtests")
        .json(&json!({"userId": "u1", "params": backtest_params()}))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: SubmitResponse = response.json();
    assert_eq!(body.kind, WorkflowKind::Backtest);
    assert_eq!(body.status, "queued");

    let published = harness.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, Channel::BacktestTask);
    let wire: Value = serde_json::from_str(&published[0].1).unwrap();
    assert_eq!(wire["taskId"], body.id.as_str());
    assert_eq!(wire["params"]["strategies"][0]["name"], "ema_cross");

    let started = rx.try_recv().unwrap();
    assert_eq!(started.event, events::STARTED);
    assert_eq!(started.data["taskId"], body.id.as_str());

    harness.stop().await;
}

#[tokio::test]
async fn each_workflow_lands_on_its_own_task_channel() {
    let harness = Harness::start().await;
    let server = server(&harness);

    server
        .post("/api/v1/optimizations")
        .json(&json!({"userId": "u1", "params": optimization_params()}))
        .await
        .assert_status(StatusCode::ACCEPTED);
    server
        .post("/api/v1/walkforwards")
        .json(&json!({"userId": "u1", "params": walkforward_params()}))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let channels: Vec<Channel> = harness
        .broker
        .published()
        .into_iter()
        .map(|(channel, _)| channel)
        .collect();
    assert_eq!(
        channels,
        vec![Channel::OptimizationTask, Channel::WalkforwardTask]
    );
    let walkforward: Value = serde_json::from_str(&harness.broker.published()[1].1).unwrap();
    assert!(walkforward["analysisId"].is_string());

    harness.stop().await;
}

#[tokio::test]
async fn invalid_params_are_rejected_before_publishing() {
    let harness = Harness::start().await;
    let server = server(&harness);

    let mut params = backtest_params();
    params["endDate"] = json!("2023-01-01");
    let response = server
        .post("/api/v1/backtests")
        .json(&json!({"userId": "u1", "params": params}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["status"], 400);
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("startDate")
    );
    assert!(harness.broker.published().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn blank_user_is_a_bad_request() {
    let harness = Harness::start().await;
    let server = server(&harness);

    server
        .post("/api/v1/backtests")
        .json(&json!({"userId": "  ", "params": backtest_params()}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    harness.stop().await;
}

#[tokio::test]
async fn unreadable_body_reports_the_rejection() {
    let harness = Harness::start().await;
    let server = server(&harness);

    let response = server
        .post("/api/v1/backtests")
        .json(&json!({"params": backtest_params()}))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["error"]["status"], 422);

    harness.stop().await;
}

#[tokio::test]
async fn exhausted_publish_is_a_service_unavailable() {
    let mut config = common::test_config();
    config.publisher = PublisherConfig {
        max_retries: 2,
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let harness = Harness::start_with(config).await;
    let server = server(&harness);
    let (conn, mut rx) = harness.state.gateway.connect();
    harness.state.gateway.subscribe(conn.id, Some("u1")).unwrap();
    harness.broker.fail_next_publishes(3);

    let response = server
        .post("/api/v1/backtests")
        .json(&json!({"userId": "u1", "params": backtest_params()}))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert!(harness.broker.published().is_empty());
    assert!(rx.try_recv().is_err(), "no started event after a failed publish");

    harness.stop().await;
}

#[tokio::test]
async fn publish_recovering_within_budget_succeeds() {
    let mut config = common::test_config();
    config.publisher = PublisherConfig {
        max_retries: 2,
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let harness = Harness::start_with(config).await;
    let server = server(&harness);
    harness.broker.fail_next_publishes(2);

    server
        .post("/api/v1/backtests")
        .json(&json!({"userId": "u1", "params": backtest_params()}))
        .await
        .assert_status(StatusCode::ACCEPTED);
    assert_eq!(harness.broker.published().len(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn alert_reaches_subscribed_user() {
    let harness = Harness::start().await;
    let server = server(&harness);
    let (conn, mut rx) = harness.state.gateway.connect();
    harness.state.gateway.subscribe(conn.id, Some("u7")).unwrap();

    let response = server
        .post("/api/v1/alerts")
        .json(&json!({"userId": "u7", "alert": {"alertId": "px-1", "symbol": "ETHUSDT"}}))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["delivered"], 1);

    let frame = rx.try_recv().unwrap();
    assert_eq!(frame.event, events::ALERT_TRIGGERED);
    assert_eq!(frame.data["alertId"], "px-1");

    let nobody = server
        .post("/api/v1/alerts")
        .json(&json!({"userId": "offline", "alert": {"alertId": "px-2"}}))
        .await;
    nobody.assert_status(StatusCode::ACCEPTED);
    assert_eq!(nobody.json::<Value>()["delivered"], 0);

    harness.stop().await;
}

#[tokio::test]
async fn health_reports_gateway_and_router() {
    let harness = Harness::start().await;
    let server = server(&harness);
    let (conn, _rx) = harness.state.gateway.connect();
    harness.state.gateway.subscribe(conn.id, Some("u1")).unwrap();
    harness.state.router.dispatch("backtest:progress", "garbage");

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["gateway"]["connections"], 1);
    assert_eq!(body["gateway"]["users"], 1);
    assert_eq!(body["router"]["malformed"], 1);
    assert!(body.get("upstream").is_none());

    harness.stop().await;
}
