use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionHandle, OutboundFrame};
use crate::state::AppState;

pub async fn websocket_handler(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Per-connection lifecycle: register the handle, process inbound frames
/// strictly serially, deregister on disconnect. In-flight handler work is
/// never cancelled here; its pushes simply no-op once the entry is gone.
async fn handle_socket(socket: WebSocket, session_id: String, state: AppState) {
    info!("Accepted connection for session {}", session_id);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                OutboundFrame::Json(value) => match serde_json::to_string(&value) {
                    Ok(text) => WsMessage::Text(text.into()),
                    Err(err) => {
                        warn!("Dropping unserializable frame: {}", err);
                        continue;
                    }
                },
                OutboundFrame::Binary(bytes) => WsMessage::Binary(bytes),
            };

            if let Err(err) = ws_tx.send(message).await {
                warn!("Send failed for session {}: {}", writer_session, err);
                break;
            }
        }
    });

    state.connections.add(
        session_id.as_str(),
        ConnectionHandle::new(session_id.as_str(), tx),
    );

    while let Some(received) = ws_rx.next().await {
        let message = match received {
            Ok(message) => message,
            Err(err) => {
                warn!("Receive error for session {}: {}", session_id, err);
                break;
            }
        };

        match message {
            WsMessage::Text(text) => {
                let Ok(mut payload) = serde_json::from_str::<Value>(&text) else {
                    warn!("Discarding non-json frame from session {}", session_id);
                    continue;
                };

                if let Some(object) = payload.as_object_mut() {
                    object.insert("session_id".to_string(), Value::String(session_id.clone()));
                }

                let Some(event_name) = assemble_event_name(&payload) else {
                    debug!(
                        "Frame without a routable event name from session {}",
                        session_id
                    );
                    continue;
                };

                debug!("Dispatching event '{}' for session {}", event_name, session_id);

                // One event is processed fully, nested inference calls
                // included, before the next frame is read.
                if let Err(err) = state.router.dispatch(&event_name, payload).await {
                    // Only an unresolvable handler binding lands here; that
                    // is a wiring bug, not a client mistake.
                    error!(
                        "Fatal dispatch error for event '{}': {:#}",
                        event_name, err
                    );
                    break;
                }
            }
            WsMessage::Close(_) => {
                debug!("Close frame from session {}", session_id);
                break;
            }
            _ => {}
        }
    }

    state.connections.remove(&session_id);
    writer.abort();
    info!("Connection closed for session {}", session_id);
}

/// Assemble the slash-delimited event name the router matches against:
/// `message/{type}/{task}`, with rag conversations nesting their task
/// under a rag segment and audio frames pinned to the transcription task.
pub(crate) fn assemble_event_name(payload: &Value) -> Option<String> {
    let event = payload.get("event").and_then(Value::as_str)?;
    if event != "message" {
        return None;
    }

    let message_type = payload.get("type").and_then(Value::as_str)?;
    let chat_type = payload
        .get("chat_type")
        .and_then(Value::as_str)
        .unwrap_or("chat");

    if chat_type == "rag" {
        let task = payload.get("task").and_then(Value::as_str)?;
        return Some(format!("message/{}/rag/{}", message_type, task));
    }

    match message_type {
        "audio" => Some("message/audio/infer".to_string()),
        _ => {
            let task = payload.get("task").and_then(Value::as_str)?;
            Some(format!("message/{}/{}", message_type, task))
        }
    }
}
