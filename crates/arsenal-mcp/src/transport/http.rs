use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::protocol::{INTERNAL_ERROR, INVALID_REQUEST, JsonRpcResponse, parse_request};
use crate::server::McpServer;
use crate::session::SessionGuard;

pub const SESSION_HEADER: &str = "mcp-session-id";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub fn router(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sse", get(open_stream).post(rpc))
        .route("/mcp", post(rpc))
        .route("/messages", post(post_message))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

pub async fn serve(server: Arc<McpServer>, addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "serving MCP over HTTP");

    let sessions = Arc::clone(server.sessions());
    axum::serve(listener, router(server))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            sessions.close_all();
        })
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutting down");
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Synchronous JSON-RPC: one request, one response.
async fn rpc(State(server): State<Arc<McpServer>>, headers: HeaderMap, body: Bytes) -> Response {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(response) => return (StatusCode::BAD_REQUEST, Json(response)).into_response(),
    };

    let session = if request.method == "initialize" && !request.is_notification() {
        Some(server.sessions().create())
    } else {
        headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|id| server.sessions().touch(id))
            .map(ToString::to_string)
    };

    let Some(response) = server.handle_request(request).await else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let mut res = Json(response).into_response();
    if let Some(value) = session.and_then(|id| HeaderValue::from_str(&id).ok()) {
        res.headers_mut().insert(SESSION_HEADER, value);
    }
    res
}

/// Opens an event stream session. The first event tells the client where to
/// POST its requests; responses arrive as `message` events.
async fn open_stream(
    State(server): State<Arc<McpServer>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let open = server.sessions().open_stream();
    info!(session = %open.id, "event stream opened");

    let guard = SessionGuard::new(Arc::clone(server.sessions()), open.id.clone());
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?sessionId={}", open.id));
    let messages = ReceiverStream::new(open.inbound).map(move |payload| {
        let _session = &guard;
        Event::default().event("message").data(payload)
    });

    let stream = tokio_stream::once(endpoint)
        .chain(messages)
        .map(Ok::<_, Infallible>);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(default, rename = "sessionId", alias = "session_id")]
    session_id: Option<String>,
}

/// Accepts a request for a stream session and answers it on that stream.
async fn post_message(
    State(server): State<Arc<McpServer>>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(id) = query.session_id.filter(|id| !id.is_empty()) else {
        return transport_error(
            StatusCode::BAD_REQUEST,
            &ToolError::TransportState("missing sessionId".to_string()),
        );
    };
    let route = match server.sessions().route(&id) {
        Ok(route) => route,
        Err(err) => return transport_error(StatusCode::NOT_FOUND, &err),
    };
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(response) => return (StatusCode::BAD_REQUEST, Json(response)).into_response(),
    };

    let request_id = request.id.clone().unwrap_or(Value::Null);
    tokio::spawn(async move {
        tokio::select! {
            () = route.cancel.cancelled() => {
                debug!(session = %id, "session closed before the response was ready");
            }
            response = server.handle_request(request) => {
                let Some(response) = response else { return };
                let payload = serde_json::to_string(&response).unwrap_or_else(|err| {
                    json!({
                        "jsonrpc": "2.0",
                        "id": request_id,
                        "error": {"code": INTERNAL_ERROR, "message": format!("failed to encode response: {err}")}
                    })
                    .to_string()
                });
                if route.outbound.send(payload).await.is_err() {
                    debug!(session = %id, "stream gone, response dropped");
                }
            }
        }
    });

    (StatusCode::ACCEPTED, "Accepted").into_response()
}

fn transport_error(status: StatusCode, err: &ToolError) -> Response {
    warn!(error = %err, "rejected message");
    let body = JsonRpcResponse::error(Value::Null, INVALID_REQUEST, err.to_string());
    (status, Json(body)).into_response()
}
