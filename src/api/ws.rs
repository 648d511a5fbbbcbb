//! WebSocket progress channel
//!
//! One connection watches one task. The server pushes JSON text frames:
//! `connected` first, then `progress` updates, then exactly one terminal
//! frame (`completed`, `error` or `cancelled`), after which the connection
//! is closed. Clients may send `ping` (answered with `pong`) and
//! `get_status` (answered with `status`); unrecognized frames are logged and
//! ignored, malformed JSON is ignored without closing.
//!
//! Browsers cannot set headers on a WebSocket handshake, so when an API key
//! is configured this route takes it from the `api_key` query parameter and
//! closes with a policy violation (1008) before any task frame if it does
//! not match.

use crate::api::AppState;
use crate::types::{ProgressEvent, TaskId};
use axum::{
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

/// Query parameters accepted on the WebSocket handshake
#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    /// API key, required when the server has one configured
    pub api_key: Option<String>,
}

/// Frames a client may send over the progress channel
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Ping,
    GetStatus,
}

/// GET /exports/:id/progress - WebSocket progress channel
#[utoipa::path(
    get,
    path = "/exports/{id}/progress",
    tag = "exports",
    params(
        ("id" = String, Path, description = "Export task ID"),
        ("api_key" = Option<String>, Query, description = "API key (required when configured)")
    ),
    responses(
        (status = 101, description = "WebSocket upgrade; JSON text frames follow")
    )
)]
pub async fn progress_socket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ProgressQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let task_id = TaskId::from(id);
    ws.on_upgrade(move |socket| handle_socket(state, task_id, query.api_key, socket))
}

async fn handle_socket(
    state: AppState,
    task_id: TaskId,
    presented_key: Option<String>,
    mut socket: WebSocket,
) {
    // Credential check happens before any task frame is sent
    if let Some(expected) = &state.config.api.api_key {
        let valid = presented_key
            .as_deref()
            .is_some_and(|k| super::auth::constant_time_eq(k.as_bytes(), expected.as_bytes()));
        if !valid {
            tracing::warn!(task_id = %task_id, "websocket rejected: invalid api key");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "invalid api key".into(),
                })))
                .await;
            return;
        }
    }

    let (subscriber_id, mut events) = match state.pipeline.watch(&task_id).await {
        Ok(watch) => watch,
        Err(e) => {
            tracing::debug!(task_id = %task_id, error = %e, "websocket watch failed");
            let frame = json!({"type": "error", "error_message": e.to_string()});
            let _ = socket.send(Message::Text(frame.to_string())).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    // Hub dropped us (terminal delivered earlier, or we
                    // stopped draining); nothing more will arrive
                    break;
                };
                let terminal = event.is_terminal();
                if !forward_event(&mut sender, &task_id, &event).await {
                    break;
                }
                if terminal {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_frame(&mut sender, &task_id, &text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary/ping/pong frames carry no task semantics
                    }
                    Some(Err(e)) => {
                        tracing::debug!(task_id = %task_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    state.pipeline.unwatch(&task_id, subscriber_id);
    let _ = sender.send(Message::Close(None)).await;
    tracing::debug!(task_id = %task_id, "progress connection closed");
}

/// Serialize and send one progress event; false means the connection is gone
async fn forward_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    task_id: &TaskId,
    event: &ProgressEvent,
) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "failed to serialize progress event");
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}

/// React to one client text frame; false means the connection is gone
///
/// Malformed JSON and unknown frame types are ignored without closing.
async fn handle_client_frame(
    sender: &mut (impl SinkExt<Message> + Unpin),
    task_id: &TaskId,
    text: &str,
) -> bool {
    let reply = match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Ping) => json!({"type": "pong"}),
        Ok(ClientFrame::GetStatus) => {
            json!({"type": "status", "task_id": task_id, "connected": true})
        }
        Err(e) => {
            tracing::debug!(task_id = %task_id, error = %e, "ignoring unrecognized client frame");
            return true;
        }
    };
    sender.send(Message::Text(reply.to_string())).await.is_ok()
}
