//! WebSocket endpoint for room sessions.

use crate::identity::IdentityError;
use crate::session::RoomSession;
use crate::AppState;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        ConnectInfo, Extension, Path, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use filmhub_types::Identity;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};

/// Query parameters for the WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    /// Signed session token. Absent means the connection is anonymous.
    pub token: Option<String>,
}

/// `GET /ws/player/{room_name}/?token=...`
///
/// The room name arrives percent-decoded. Invalid tokens are rejected with
/// `401` before the upgrade; a missing token yields an anonymous session.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(room_name): Path<String>,
    Query(params): Query<WsConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let resolver = state.identities.clone();
    let token = params.token;
    let has_token = token.is_some();
    let resolved = tokio::task::spawn_blocking(move || resolver.resolve(token.as_deref())).await;

    let identity = match resolved {
        Ok(Ok(identity)) => identity,
        Ok(Err(e @ (IdentityError::Token(_) | IdentityError::UnknownUser(_)))) => {
            tracing::warn!(remote_addr = %addr, room = %room_name, "websocket auth failed: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Ok(Err(e)) => {
            tracing::error!(remote_addr = %addr, room = %room_name, "websocket auth error: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(e) => {
            tracing::error!(remote_addr = %addr, "websocket auth task failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    tracing::info!(
        remote_addr = %addr,
        room = %room_name,
        username = identity.username().unwrap_or("<anonymous>"),
        token_auth = has_token,
        "websocket connection accepted"
    );
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_name, identity))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    room_name: String,
    identity: Identity,
) {
    let (mut session, mut outbox) = RoomSession::new(
        room_name,
        identity,
        state.registry.clone(),
        state.collaborators.clone(),
        state.hub.clone(),
    );
    let connection_id = session.connection_id();

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbox.next_frame().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        if outbox.is_evicted() {
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::AGAIN,
                    reason: "fell behind, reconnect".into(),
                })))
                .await;
        }
    });

    session.join().await;

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    session.handle_text(text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(connection_id = %connection_id, "ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %connection_id, "websocket receive error: {}", e);
                    break;
                }
            },
            _ = &mut send_task => {
                tracing::info!(connection_id = %connection_id, "outbound side closed, ending session");
                break;
            }
        }
    }

    session.close().await;
    send_task.abort();
}
