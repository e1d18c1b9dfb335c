mod common;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tidewire_model::{
    BacktestParams, Channel, TaskEnvelope, TaskId, TaskParams, UserId, protocol::events,
};
use tidewire_server::create_app;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};

use common::Harness;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(harness: &Harness) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(harness.state.clone());
    let cancel = harness.cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .unwrap();
    });
    format!("ws://{addr}/backtest")
}

async fn send(client: &mut Client, event: &str, data: Value) {
    let frame = json!({"event": event, "data": data}).to_string();
    client.send(Message::Text(frame.into())).await.unwrap();
}

async fn next_frame(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let res = tokio::time::timeout(Duration::from_millis(300), client.next()).await;
    assert!(res.is_err(), "unexpected frame: {res:?}");
}

async fn subscribed_client(url: &str, user: &str) -> Client {
    let (mut client, _) = connect_async(url).await.unwrap();
    send(&mut client, events::SUBSCRIBE, json!({"userId": user})).await;
    let ack = next_frame(&mut client).await;
    assert_eq!(ack["event"], events::SUBSCRIBED);
    assert_eq!(ack["data"]["userId"], user);
    client
}

#[tokio::test]
async fn progress_for_u1_reaches_only_u1() {
    let harness = Harness::start().await;
    let url = serve(&harness).await;

    let mut c1 = subscribed_client(&url, "u1").await;
    let mut c2 = subscribed_client(&url, "u2").await;

    let params: BacktestParams = serde_json::from_value(common::backtest_params()).unwrap();
    let envelope = TaskEnvelope::new(
        TaskId::new("t1").unwrap(),
        UserId::new("u1").unwrap(),
        TaskParams::Backtest(params),
    );
    harness.state.publisher.publish(&envelope).await.unwrap();

    let published = harness.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, Channel::BacktestTask);
    let wire: Value = serde_json::from_str(&published[0].1).unwrap();
    assert_eq!(wire["taskId"], "t1");
    assert_eq!(wire["userId"], "u1");
    assert!(wire["timestamp"].is_string());

    harness.broker.inject(
        Channel::BacktestProgress,
        r#"{"taskId":"t1","userId":"u1","progress":50}"#,
    );

    let frame = next_frame(&mut c1).await;
    assert_eq!(frame["event"], "backtest:progress");
    assert_eq!(frame["data"]["taskId"], "t1");
    assert_eq!(frame["data"]["progress"], 50);
    assert!(frame["data"]["timestamp"].is_string());

    assert_silent(&mut c1).await;
    assert_silent(&mut c2).await;

    harness.stop().await;
}

#[tokio::test]
async fn every_socket_of_a_user_gets_the_outcome() {
    let harness = Harness::start().await;
    let url = serve(&harness).await;

    let mut tab_a = subscribed_client(&url, "u1").await;
    let mut tab_b = subscribed_client(&url, "u1").await;

    harness.broker.inject(
        Channel::WalkforwardComplete,
        r#"{"analysisId":"a9","userId":"u1","resultId":"r3"}"#,
    );

    for client in [&mut tab_a, &mut tab_b] {
        let frame = next_frame(client).await;
        assert_eq!(frame["event"], "walkforward:complete");
        assert_eq!(frame["data"]["analysisId"], "a9");
    }

    harness.stop().await;
}

#[tokio::test]
async fn malformed_outcome_is_dropped_and_stream_continues() {
    let harness = Harness::start().await;
    let url = serve(&harness).await;
    let mut c1 = subscribed_client(&url, "u1").await;

    harness
        .broker
        .inject(Channel::BacktestError, r#"{"taskId":"t1","userId":"#);
    harness.broker.inject(
        Channel::BacktestError,
        r#"{"taskId":"t1","userId":"u1","error":"no candles for range"}"#,
    );

    let frame = next_frame(&mut c1).await;
    assert_eq!(frame["event"], "backtest:error");
    assert_eq!(frame["data"]["error"], "no candles for range");
    assert_eq!(harness.state.router.stats().malformed, 1);

    harness.stop().await;
}

#[tokio::test]
async fn closed_socket_leaves_no_membership_behind() {
    let harness = Harness::start().await;
    let url = serve(&harness).await;

    let mut c1 = subscribed_client(&url, "u1").await;
    assert_eq!(harness.state.gateway.stats().users, 1);

    c1.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.state.gateway.stats().connections > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection removed after close");

    assert_eq!(harness.state.gateway.stats().users, 0);
    let report = harness.state.gateway.broadcast_to_user(
        &UserId::new("u1").unwrap(),
        "backtest:progress",
        json!({}),
    );
    assert!(report.is_noop());

    harness.stop().await;
}

#[tokio::test]
async fn subscribe_without_user_is_rejected() {
    let harness = Harness::start().await;
    let url = serve(&harness).await;

    let (mut client, _) = connect_async(url.as_str()).await.unwrap();
    send(&mut client, events::SUBSCRIBE, json!({})).await;

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["event"], events::ERROR);
    assert_eq!(frame["data"]["message"], "userId is required");
    assert_eq!(harness.state.gateway.stats().users, 0);

    harness.stop().await;
}

#[tokio::test]
async fn user_ids_must_be_strings_on_both_sides() {
    let harness = Harness::start().await;
    let url = serve(&harness).await;

    let (mut client, _) = connect_async(url.as_str()).await.unwrap();
    send(&mut client, events::SUBSCRIBE, json!({"userId": 42})).await;
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["event"], events::ERROR);
    assert_eq!(frame["data"]["message"], "userId is required");
    assert_eq!(harness.state.gateway.stats().users, 0);

    send(&mut client, events::SUBSCRIBE, json!({"userId": "42"})).await;
    let ack = next_frame(&mut client).await;
    assert_eq!(ack["event"], events::SUBSCRIBED);

    harness.broker.inject(
        Channel::BacktestProgress,
        r#"{"taskId":"t1","userId":42,"progress":5}"#,
    );
    harness.broker.inject(
        Channel::BacktestProgress,
        r#"{"taskId":"t1","userId":"42","progress":6}"#,
    );

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["data"]["progress"], 6);
    assert_eq!(harness.state.router.stats().malformed, 1);
    assert_silent(&mut client).await;

    harness.stop().await;
}
