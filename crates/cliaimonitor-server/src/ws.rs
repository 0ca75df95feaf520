//! `/ws` façade (spec §6): on connect the server sends one
//! `{type: "state_update", data: <snapshot>}` message, then one more
//! per subsequent broadcast. Origin is validated before upgrade.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;
use tracing::debug;

use crate::state::AppState;
use crate::validation::origin_is_allowed;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(origin) = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()) {
        if !origin_is_allowed(origin, &state.allowed_origins) {
            return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let initial = match state.snapshot() {
        Ok(snapshot) => snapshot,
        Err(err) => {
            debug!(error = %err, "failed to build initial ws snapshot");
            return;
        }
    };
    if send_state_update(&mut socket, &initial).await.is_err() {
        return;
    }

    let mut rx = state.broadcast_tx.subscribe();
    loop {
        match rx.recv().await {
            Ok(snapshot) => {
                if send_state_update(&mut socket, &snapshot).await.is_err() {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send_state_update(
    socket: &mut WebSocket,
    snapshot: &crate::state::StateSnapshot,
) -> Result<(), axum::Error> {
    let envelope = json!({ "type": "state_update", "data": snapshot });
    let payload = serde_json::to_string(&envelope).unwrap_or_default();
    socket.send(Message::Text(payload)).await
}
