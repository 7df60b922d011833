//! Dashboard HTTP API
//!
//! REST endpoints and the event WebSocket for the browser frontend.

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use super::types::*;
use crate::sync::{SyncOrchestrator, SyncSnapshot, TickOutcome};
use crate::types::SessionKey;

/// Create the API router with all endpoints
pub fn create_router(orchestrator: SyncOrchestrator) -> Router {
    Router::new()
        .route("/api/session", get(get_session))
        .route("/api/start", post(start_fetching))
        .route("/api/stop", post(stop_fetching))
        .route("/api/key", post(set_key))
        .route("/api/clear", post(clear))
        .route("/api/refresh", post(refresh))
        // WebSocket
        .route("/ws", get(websocket_handler))
        .with_state(orchestrator)
        // CORS for frontend
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ─────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────

/// GET /api/session - Current record, polling flag and last error
async fn get_session(State(orchestrator): State<SyncOrchestrator>) -> impl IntoResponse {
    Json(ApiResponse::success(orchestrator.snapshot().await))
}

/// POST /api/start {user, expiry}
async fn start_fetching(
    State(orchestrator): State<SyncOrchestrator>,
    Json(body): Json<KeyRequest>,
) -> Json<ApiResponse<SyncSnapshot>> {
    match orchestrator.start_fetching(&body.user, &body.expiry).await {
        Ok(()) => Json(ApiResponse::success(orchestrator.snapshot().await)),
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}

/// POST /api/stop
async fn stop_fetching(State(orchestrator): State<SyncOrchestrator>) -> impl IntoResponse {
    orchestrator.stop_fetching().await;
    Json(ApiResponse::success(orchestrator.snapshot().await))
}

/// POST /api/key {user, expiry}
async fn set_key(
    State(orchestrator): State<SyncOrchestrator>,
    Json(body): Json<KeyRequest>,
) -> Json<ApiResponse<SyncSnapshot>> {
    match orchestrator.set_key(&body.user, &body.expiry).await {
        Ok(()) => Json(ApiResponse::success(orchestrator.snapshot().await)),
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}

/// POST /api/clear {user, expiry}
///
/// The local clear always happens; `success` reflects the server-side delete.
async fn clear(
    State(orchestrator): State<SyncOrchestrator>,
    Json(body): Json<KeyRequest>,
) -> Json<ApiResponse<SyncSnapshot>> {
    let key = match SessionKey::parse(body.user, body.expiry) {
        Ok(key) => key,
        Err(e) => return Json(ApiResponse::error(e.to_string())),
    };

    match orchestrator.clear(&key).await {
        Ok(()) => Json(ApiResponse::success(orchestrator.snapshot().await)),
        Err(e) => Json(ApiResponse::error(format!(
            "Local data cleared, server delete failed: {}",
            e
        ))),
    }
}

/// POST /api/refresh - Run one tick now
async fn refresh(State(orchestrator): State<SyncOrchestrator>) -> Json<ApiResponse<TickOutcome>> {
    Json(ApiResponse::success(orchestrator.refresh_now().await))
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Handler
// ─────────────────────────────────────────────────────────────────

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
};
use tokio::sync::broadcast::error::RecvError;

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(orchestrator): State<SyncOrchestrator>,
) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, orchestrator))
}

/// Outgoing message type for WebSocket
enum OutgoingMessage {
    Text(String),
    Pong(Vec<u8>),
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, orchestrator: SyncOrchestrator) {
    use futures_util::{SinkExt, StreamExt};

    tracing::info!("🖥️ New WebSocket connection");

    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading state so nothing falls between the two
    let mut rx = orchestrator.subscribe();

    let msg = WsMessage::FullState(orchestrator.snapshot().await);
    if let Ok(json) = serde_json::to_string(&msg) {
        if sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<OutgoingMessage>(32);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let result = match msg {
                OutgoingMessage::Text(text) => sender.send(Message::Text(text)).await,
                OutgoingMessage::Pong(data) => sender.send(Message::Pong(data)).await,
            };
            if result.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            event = rx.recv() => {
                let msg = match event {
                    Ok(event) => WsMessage::Update(event),
                    // Slow client: resync with a full snapshot
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "WebSocket client lagged, resending state");
                        WsMessage::FullState(orchestrator.snapshot().await)
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Ok(json) = serde_json::to_string(&msg) {
                    if out_tx.send(OutgoingMessage::Text(json)).await.is_err() {
                        break;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if out_tx.send(OutgoingMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received WebSocket message: {}", text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    send_task.abort();
    tracing::info!("🖥️ WebSocket connection closed");
}
