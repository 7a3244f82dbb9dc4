//! HTTP surface: the WebSocket upgrade plus health and metrics.

use axum::Json;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;

use crate::state::AppState;
use crate::ws::connection::run_connection;

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
