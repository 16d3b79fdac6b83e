//! Admin HTTP surface.
//!
//! A second listener, conventionally on the bus port + 1000, exposing
//! status and out-of-band frame injection. Handlers never touch sockets or
//! the registry directly beyond the shared [`Bus`] facade, and every
//! injection is bounded by a timeout — a wedged bus yields HTTP 500, not a
//! hung admin connection.
//!
//! All responses are JSON with permissive CORS; errors use
//! `{"error": ..., "code": ...}`.

use crate::router::Bus;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bus_protocol::{Args, Value};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Upper bound on waiting for the bus to acknowledge an injected frame.
const INJECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Outgoing message id for `/bc` broadcasts. Fixed: OpenKore-compatible
/// clients dispatch on this id.
const BC_MESSAGE_ID: &str = "busComm";

pub fn build_router(bus: Arc<Bus>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/bc", get(broadcast_from_query))
        .route("/api/broadcast", post(broadcast_from_json))
        .route("/api/message", post(message_from_json))
        .layer(CorsLayer::permissive())
        .with_state(bus)
}

/// Handle to the running admin HTTP server.
pub struct AdminServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl AdminServer {
    pub async fn start(bus: Arc<Bus>, bind_addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "admin API listening");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let app = build_router(bus);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await;
        });

        Ok(AdminServer {
            local_addr,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn api_error(code: StatusCode, message: &str) -> Response {
    (
        code,
        Json(json!({ "error": message, "code": code.as_u16() })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

async fn status(State(bus): State<Arc<Bus>>) -> Json<serde_json::Value> {
    let (host, port) = match bus.listen_addr() {
        Some(addr) => (addr.ip().to_string(), addr.port()),
        None => (String::new(), 0),
    };
    Json(json!({
        "running": bus.is_running(),
        "host": host,
        "port": port,
        "client_count": bus.registry().client_count().await,
    }))
}

// ---------------------------------------------------------------------------
// GET /bc?player=...&comm=...
// ---------------------------------------------------------------------------

async fn broadcast_from_query(
    State(bus): State<Arc<Bus>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let mut args = Args::new();
    for (k, v) in &params {
        args.insert(k.clone(), Value::Text(v.clone()));
    }
    // Presence check only: "0" and "false" are legitimate values.
    let required_present = ["player", "comm"]
        .iter()
        .all(|k| args.get(*k).and_then(Value::as_str).is_some_and(|s| !s.is_empty()));
    if !required_present {
        return api_error(
            StatusCode::BAD_REQUEST,
            "Missing required parameters: player and comm",
        );
    }

    info!(
        player = %args["player"], comm = %args["comm"],
        "broadcast injected via /bc"
    );
    match tokio::time::timeout(INJECT_TIMEOUT, bus.inject_broadcast(BC_MESSAGE_ID, &args)).await {
        Err(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, "Broadcast timeout"),
        Ok(_delivered) => {
            let (_, identified) = bus.registry().counts().await;
            let args_json: serde_json::Map<String, serde_json::Value> = params
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            Json(json!({
                "status": "success",
                "message": "Broadcast sent successfully",
                "message_id": BC_MESSAGE_ID,
                "args": args_json,
                "client_count": identified,
            }))
            .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// POST /api/broadcast
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BroadcastBody {
    message_id: Option<String>,
    #[serde(default)]
    args: serde_json::Map<String, serde_json::Value>,
}

async fn broadcast_from_json(
    State(bus): State<Arc<Bus>>,
    body: Result<Json<BroadcastBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                &format!("Bad Request: {rejection}"),
            );
        }
    };
    let message_id = body
        .message_id
        .unwrap_or_else(|| "API_BROADCAST".to_owned());
    let args = args_from_json(&body.args);

    match tokio::time::timeout(INJECT_TIMEOUT, bus.inject_broadcast(&message_id, &args)).await {
        Err(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, "Broadcast timeout"),
        Ok(_) => Json(json!({ "status": "sent", "message_id": message_id })).into_response(),
    }
}

// ---------------------------------------------------------------------------
// POST /api/message
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MessageBody {
    client_id: Option<String>,
    message_id: Option<String>,
    #[serde(default)]
    args: serde_json::Map<String, serde_json::Value>,
}

async fn message_from_json(
    State(bus): State<Arc<Bus>>,
    body: Result<Json<MessageBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                &format!("Bad Request: {rejection}"),
            );
        }
    };
    let Some(client_id) = body.client_id.filter(|id| !id.is_empty()) else {
        return api_error(StatusCode::BAD_REQUEST, "client_id required");
    };
    let message_id = body.message_id.unwrap_or_else(|| "API_MESSAGE".to_owned());
    let args = args_from_json(&body.args);

    match tokio::time::timeout(
        INJECT_TIMEOUT,
        bus.inject_message(&client_id, &message_id, &args),
    )
    .await
    {
        Err(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, "Message timeout"),
        Ok(true) => Json(json!({ "status": "sent", "client_id": client_id })).into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "Client not found"),
    }
}

// ---------------------------------------------------------------------------
// JSON → typed args
// ---------------------------------------------------------------------------

/// Map JSON argument values onto wire types: strings stay text, booleans
/// and u32-ranged integers become UINT, null becomes empty binary, and
/// everything else is rendered as its JSON text.
fn args_from_json(map: &serde_json::Map<String, serde_json::Value>) -> Args {
    use serde_json::Value as Json;
    let mut args = Args::new();
    for (k, v) in map {
        let value = match v {
            Json::Null => Value::Binary(Vec::new()),
            Json::Bool(b) => Value::from(*b),
            Json::Number(n) => match n.as_u64().and_then(|u| u32::try_from(u).ok()) {
                Some(u) => Value::Uint(u),
                None => Value::Text(n.to_string()),
            },
            Json::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        };
        args.insert(k.clone(), value);
    }
    args
}
