//! WebSocket connection lifecycle: identity, outbox writer, read loop, cleanup.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{extract::State, response::IntoResponse};
use futures::{SinkExt, StreamExt};

use crate::http::routes::AppState;
use crate::util::id::ConnId;
use crate::ws::dispatch;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = ConnId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut outbox = state.sessions.register(conn);
    tracing::info!(%conn, online = state.sessions.len(), "connected");

    // Ends on its own once the session is unregistered and the outbox closes.
    tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(%conn, error = %err, "failed to encode event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => dispatch::handle_text(&state, conn, &text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(%conn, error = %err, "ws recv error");
                break;
            }
        }
    }

    dispatch::disconnect(&state, conn);
    tracing::info!(%conn, "disconnected");
}
