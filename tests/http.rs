//! One-shot HTTP scenarios driven with a real HTTP client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use corelink::{ApiRegistry, Error, HttpApiServer, HttpOptions, MetadataFactory, Value};
use serde_json::{Value as Json, json};
use tracing_subscriber::EnvFilter;

/// Logs go to the test writer; filter with `RUST_LOG=corelink=debug`.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_target(false)
        .try_init();
}

async fn serve(options: HttpOptions) -> HttpApiServer {
    init_logging();

    let mut registry = ApiRegistry::<Option<String>>::new();
    registry
        .register("Math.add", |args: Vec<Value>, _remote| async move {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            Ok(Value::from(sum))
        })
        .register("Peer.address", |_args, remote: Option<String>| async move {
            Ok(Value::from(remote))
        })
        .register("Fail.always", |_args, _remote| async move {
            Err(Error::protocol("always fails"))
        });

    let metadata: MetadataFactory<Option<String>> =
        Arc::new(|_request, _span, remote_id| remote_id.map(str::to_string));

    HttpApiServer::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        Arc::new(registry),
        metadata,
        options,
    )
    .await
    .expect("bind")
}

async fn post(url: String, body: String) -> (u16, Json) {
    let response = reqwest::Client::new()
        .post(url)
        .header("content-type", "application/json")
        .body(body)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .expect("request");

    let status = response.status().as_u16();
    let json = response.json::<Json>().await.expect("json body");
    (status, json)
}

#[tokio::test]
async fn test_command_from_path() {
    let server = serve(HttpOptions::default()).await;
    let (status, json) = post(
        format!("{}/Math/add", server.url()),
        json!({ "args": [2, 3] }).to_string(),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(json["data"], json!(5));
    assert!(json["responseId"].is_string());
}

#[tokio::test]
async fn test_command_from_body_keeps_message_id() {
    let server = serve(HttpOptions::default()).await;
    let (status, json) = post(
        server.url(),
        json!({ "command": "Math.add", "messageId": "req-9", "args": [40, 2] }).to_string(),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(json["responseId"], json!("req-9"));
    assert_eq!(json["data"], json!(42));
}

#[tokio::test]
async fn test_remote_id_is_peer_address() {
    let server = serve(HttpOptions::default()).await;
    let (_, json) = post(format!("{}/Peer/address", server.url()), String::new()).await;

    let address = json["data"].as_str().expect("peer address");
    assert!(address.starts_with("127.0.0.1:"));
}

#[tokio::test]
async fn test_handler_errors_are_response_data() {
    let server = serve(HttpOptions::default()).await;

    let (status, json) = post(format!("{}/Fail/always", server.url()), String::new()).await;
    assert_eq!(status, 200);
    assert_eq!(json["data"]["__type"], json!("Error"));
    assert!(
        json["data"]["value"]["message"]
            .as_str()
            .is_some_and(|message| message.contains("always fails"))
    );

    let (status, json) = post(format!("{}/No/such", server.url()), String::new()).await;
    assert_eq!(status, 200);
    assert!(
        json["data"]["value"]["message"]
            .as_str()
            .is_some_and(|message| message.contains("No.such"))
    );
}

#[tokio::test]
async fn test_oversize_body_is_rejected() {
    let server = serve(HttpOptions::new().with_max_payload_bytes(64)).await;
    let body = json!({ "args": ["x".repeat(256)] }).to_string();

    let (status, json) = post(format!("{}/Math/add", server.url()), body).await;
    assert_eq!(status, 413);
    assert_eq!(json["__type"], json!("Error"));
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let server = serve(HttpOptions::default()).await;

    let (status, _) = post(format!("{}/Math/add", server.url()), "{not json".to_string()).await;
    assert_eq!(status, 400);

    let (status, _) = post(server.url(), "[1, 2]".to_string()).await;
    assert_eq!(status, 400);
}
