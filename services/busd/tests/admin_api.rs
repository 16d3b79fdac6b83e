//! Admin HTTP surface: status, broadcast injection, unicast injection.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use bus_client::BusClient;
use bus_protocol::{Value, key, msg};
use busd::admin::build_router;
use busd::{Bus, BusServer};
use serde_json::{Value as Json, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const QUIET: Duration = Duration::from_millis(300);

async fn start_bus() -> (Arc<Bus>, SocketAddr, BusServer, axum::Router) {
    let bus = Arc::new(Bus::new(None));
    let server = BusServer::start(Arc::clone(&bus), "127.0.0.1:0")
        .await
        .unwrap();
    let addr = server.local_addr();
    let app = build_router(Arc::clone(&bus));
    (bus, addr, server, app)
}

async fn identified_pair(addr: SocketAddr) -> (BusClient, BusClient) {
    let mut a = BusClient::connect(addr).await.unwrap();
    a.identify("botA", false).await.unwrap();
    let mut b = BusClient::connect(addr).await.unwrap();
    b.identify("botB", false).await.unwrap();
    let (message_id, _) = a.recv().await.unwrap();
    assert_eq!(message_id, msg::JOIN);
    (a, b)
}

async fn get(app: axum::Router, path: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header("origin", "http://example.test")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let val = serde_json::from_slice(&body).unwrap_or(Json::Null);
    (status, val)
}

async fn post_json(app: axum::Router, path: &str, body: Json) -> (StatusCode, Json) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let val = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, val)
}

#[tokio::test]
async fn status_reports_listener_and_client_count() {
    let (_bus, addr, _server, app) = start_bus().await;
    let _clients = identified_pair(addr).await;

    let (status, val) = get(app, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(val["running"], json!(true));
    assert_eq!(val["host"], json!("127.0.0.1"));
    assert_eq!(val["port"], json!(addr.port()));
    assert_eq!(val["client_count"], json!(2));
}

#[tokio::test]
async fn status_responses_carry_cors_headers() {
    let (_bus, _addr, _server, app) = start_bus().await;
    let req = Request::builder()
        .method(Method::GET)
        .uri("/api/status")
        .header("origin", "http://example.test")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert!(
        resp.headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn bc_requires_player_and_comm() {
    let (_bus, _addr, _server, app) = start_bus().await;

    let (status, val) = get(app.clone(), "/bc?player=alice").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        val["error"],
        json!("Missing required parameters: player and comm")
    );
    assert_eq!(val["code"], json!(400));

    // Present but empty is still missing.
    let (status, _) = get(app, "/bc?player=alice&comm=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bc_accepts_falsy_looking_param_values() {
    let (_bus, addr, _server, app) = start_bus().await;
    let (mut a, _b) = identified_pair(addr).await;

    // "0" is a real client id and "false" is a real comm string; only
    // absence or the empty string count as missing.
    let (status, val) = get(app, "/bc?player=0&comm=false").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(val["status"], json!("success"));

    let (message_id, received) = a.recv().await.unwrap();
    assert_eq!(message_id, "busComm");
    assert_eq!(received["player"], Value::Text("0".to_owned()));
    assert_eq!(received["comm"], Value::Text("false".to_owned()));
}

#[tokio::test]
async fn bc_broadcasts_bus_comm_with_query_params_as_strings() {
    let (_bus, addr, _server, app) = start_bus().await;
    let (mut a, mut b) = identified_pair(addr).await;

    let (status, val) = get(app, "/bc?player=alice&comm=hello&channel=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(val["status"], json!("success"));
    assert_eq!(val["message_id"], json!("busComm"));
    assert_eq!(val["client_count"], json!(2));
    assert_eq!(val["args"]["channel"], json!("3"));

    for client in [&mut a, &mut b] {
        let (message_id, received) = client.recv().await.unwrap();
        assert_eq!(message_id, "busComm");
        assert_eq!(received["player"], Value::Text("alice".to_owned()));
        assert_eq!(received["comm"], Value::Text("hello".to_owned()));
        assert_eq!(received["channel"], Value::Text("3".to_owned()));
        assert!(!received.contains_key(key::FROM));
    }
}

#[tokio::test]
async fn api_broadcast_defaults_the_message_id() {
    let (_bus, addr, _server, app) = start_bus().await;
    let (mut a, _b) = identified_pair(addr).await;

    let (status, val) = post_json(
        app,
        "/api/broadcast",
        json!({"args": {"text": "hi", "n": 5}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(val["status"], json!("sent"));
    assert_eq!(val["message_id"], json!("API_BROADCAST"));

    let (message_id, received) = a.recv().await.unwrap();
    assert_eq!(message_id, "API_BROADCAST");
    assert_eq!(received["text"], Value::Text("hi".to_owned()));
    assert_eq!(received["n"], Value::Uint(5));
    assert!(!received.contains_key(key::FROM));
}

#[tokio::test]
async fn api_broadcast_rejects_malformed_json() {
    let (_bus, _addr, _server, app) = start_bus().await;
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/broadcast")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    let val: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(val["code"], json!(400));
}

#[tokio::test]
async fn api_message_delivers_to_one_client() {
    let (_bus, addr, _server, app) = start_bus().await;
    let (mut a, mut b) = identified_pair(addr).await;

    let (status, val) = post_json(
        app,
        "/api/message",
        json!({"client_id": "1", "message_id": "NUDGE", "args": {"note": "wake up"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(val["status"], json!("sent"));
    assert_eq!(val["client_id"], json!("1"));

    let (message_id, received) = b.recv().await.unwrap();
    assert_eq!(message_id, "NUDGE");
    assert_eq!(received["note"], Value::Text("wake up".to_owned()));
    assert!(a.recv_timeout(QUIET).await.unwrap().is_none());
}

#[tokio::test]
async fn api_message_requires_a_client_id() {
    let (_bus, _addr, _server, app) = start_bus().await;
    let (status, val) = post_json(app, "/api/message", json!({"message_id": "NUDGE"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(val["error"], json!("client_id required"));
}

#[tokio::test]
async fn api_message_to_unknown_or_unidentified_client_is_not_found() {
    let (_bus, addr, _server, app) = start_bus().await;
    let _clients = identified_pair(addr).await;
    // A third connection that never completes the handshake.
    let _pending = BusClient::connect(addr).await.unwrap();

    let (status, val) = post_json(
        app.clone(),
        "/api/message",
        json!({"client_id": "99"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(val["error"], json!("Client not found"));

    let (status, _) = post_json(app, "/api/message", json!({"client_id": "2"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
