//! WebSocket terminal endpoint.

use std::future;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use super::error::ApiError;
use super::AppState;
use crate::relay::TerminalRelay;
use crate::session::SessionId;

/// `GET /api/terminal/:session_id`
///
/// Unknown ids are rejected with 404 before the upgrade.
pub async fn terminal(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    state.manager.lookup(&session_id)?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, session_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: SessionId) {
    // The session may have been destroyed between lookup and upgrade.
    let session = match state.manager.lookup(&session_id) {
        Ok(session) => session,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Terminal session vanished");
            let _ = socket.close().await;
            return;
        }
    };
    info!(session_id = %session_id, "Terminal connected");

    let (sink, stream) = socket.split();
    let outbound =
        sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));
    let inbound = stream
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });

    let relay = TerminalRelay::new(session_id.clone(), state.pty.clone());
    match relay
        .run(session.connection(), outbound, inbound)
        .await
    {
        Ok(exit_status) => {
            info!(session_id = %session_id, exit_status = ?exit_status, "Terminal closed");
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Terminal relay failed");
        }
    }
}
