use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// A frame queued for delivery on one live connection. Structured message
/// records go out as JSON text; synthesized audio goes out as raw binary.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Json(Value),
    Binary(Bytes),
}

/// Sender half of one client session's socket. The writer task that owns
/// the socket drains these frames; once it is gone every send reports
/// false and the caller skips its push-back step.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    session_id: String,
    tx: UnboundedSender<OutboundFrame>,
}

impl ConnectionHandle {
    pub fn new(session_id: impl Into<String>, tx: UnboundedSender<OutboundFrame>) -> Self {
        Self {
            session_id: session_id.into(),
            tx,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Push a JSON value. Best-effort: a closed connection is not an error.
    pub fn send_json(&self, value: Value) -> bool {
        match self.tx.send(OutboundFrame::Json(value)) {
            Ok(()) => {
                debug!("Sent json frame to session {}", self.session_id);
                true
            }
            Err(err) => {
                warn!(
                    "Failed to send json frame to session {}: {}",
                    self.session_id, err
                );
                false
            }
        }
    }

    /// Push a list of message records as a single JSON array frame.
    pub fn send_records<T: Serialize>(&self, records: &[T]) -> bool {
        match serde_json::to_value(records) {
            Ok(value) => self.send_json(value),
            Err(err) => {
                warn!(
                    "Failed to serialize records for session {}: {}",
                    self.session_id, err
                );
                false
            }
        }
    }

    /// Push raw bytes (audio). Best-effort, same as send_json.
    pub fn send_binary(&self, data: Bytes) -> bool {
        match self.tx.send(OutboundFrame::Binary(data)) {
            Ok(()) => {
                debug!("Sent binary frame to session {}", self.session_id);
                true
            }
            Err(err) => {
                warn!(
                    "Failed to send binary frame to session {}: {}",
                    self.session_id, err
                );
                false
            }
        }
    }
}

/// Single-process mapping of session id to live connection handle.
/// Entries are added on connection-accept and removed on disconnect;
/// nothing here is ever persisted.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session_id: impl Into<String>, handle: ConnectionHandle) {
        let session_id = session_id.into();
        debug!("Registering connection for session {}", session_id);
        self.connections.insert(session_id, handle);
    }

    pub fn get(&self, session_id: &str) -> Option<ConnectionHandle> {
        self.connections.get(session_id).map(|e| e.value().clone())
    }

    pub fn remove(&self, session_id: &str) {
        if self.connections.remove(session_id).is_some() {
            debug!("Removed connection for session {}", session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
