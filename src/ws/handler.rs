//! WebSocket upgrade handler

use std::borrow::Cow;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::session::Flow;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::fanout::{ConnectionHandle, OUTBOUND_BUFFER};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler. The path segment is the participant id.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(player_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    info!(player_id = %player_id, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, player_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: String, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (tx, mut rx) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);
    let handle = ConnectionHandle::new(tx);
    let conn_id = handle.id();
    let closer = handle.closer();

    let session = state.session.clone();
    if let Err(e) = session.connect(&player_id, handle) {
        warn!(player_id = %player_id, error = %e, "Connection rejected");
        let frame = CloseFrame {
            code: close_code::AGAIN,
            reason: Cow::Owned(e.to_string()),
        };
        let _ = ws_sink.send(Message::Close(Some(frame))).await;
        return;
    }

    // Writer task: outbound queue -> WebSocket
    let writer_player_id = player_id.clone();
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %writer_player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let rate_limiter = ConnectionRateLimiter::new();

    // Reader loop: WebSocket -> session
    loop {
        let result = tokio::select! {
            _ = closer.notified() => {
                debug!(player_id = %player_id, conn_id = %conn_id, "Connection superseded");
                break;
            }
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(player_id = %player_id, "Rate limited message");
                    continue;
                }

                match ClientMsg::parse(&text) {
                    Ok(msg) => {
                        if session.handle_message(&player_id, conn_id, msg) == Flow::Disconnect {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(player_id = %player_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(player_id = %player_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // No-op after an explicit leave or a replacement
    session.connection_lost(&player_id, conn_id);
    writer_handle.abort();

    info!(player_id = %player_id, conn_id = %conn_id, "WebSocket connection closed");
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
