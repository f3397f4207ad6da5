//! WebSocket endpoint
//!
//! GET /socket upgrades to the upload protocol. One connection is one
//! session; the session is torn down when the socket closes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::protocol::{ConnectionHandler, ServerMessage};
use crate::state::AppState;

/// Create the socket router
pub fn router() -> Router<AppState> {
    Router::new().route("/socket", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let mut handler = match ConnectionHandler::open(
        state.registry().clone(),
        state.orchestrator().clone(),
        tx,
    ) {
        Ok(handler) => handler,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open session");
            return;
        }
    };
    let session_id = handler.session_id();

    // Writer: drains outbound messages until every sender is gone
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "Failed to encode message");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if handler.handle_text(&text).await.is_break() {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(session_id = %session_id, "Dropped binary frame");
            }
            Ok(Message::Close(_)) => break,
            // Pongs are answered by the websocket layer
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    handler.close().await;
    let _ = writer.await;
}
