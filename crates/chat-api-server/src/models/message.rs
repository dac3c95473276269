use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// Kind of payload a message body carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Code,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Audio => "audio",
            MessageKind::Code => "code",
        }
    }
}

/// Speaker of a context turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

/// One role-tagged utterance of the rolling conversation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One exchanged message as stored in the durable log.
/// `(conversation_id, created_at, message_id)` uniquely identifies a row;
/// rows are append-only and only ever flagged deleted, never mutated.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub body: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub sender_name: String,
    pub receiver_name: String,
    pub kind: String,
    pub conversation_kind: String,
    pub metadata: sqlx::types::Json<HashMap<String, String>>,
    pub is_deleted: bool,
    pub is_read: bool,
    pub priority: i32,
}

impl Message {
    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text.as_str()
    }

    /// Map the sender to a context role by comparing against the
    /// well-known assistant identity.
    pub fn role_for(&self, assistant_id: &str) -> Role {
        if self.sender_id == assistant_id {
            Role::Assistant
        } else {
            Role::Human
        }
    }

    pub fn to_turn(&self, assistant_id: &str) -> Turn {
        Turn {
            role: self.role_for(assistant_id),
            content: self.body.clone(),
        }
    }
}

/// Fields supplied by a pipeline when appending; id and timestamp are
/// assigned by the log on write.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub body: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub sender_name: String,
    pub receiver_name: String,
    pub kind: MessageKind,
    pub conversation_kind: String,
    pub metadata: HashMap<String, String>,
    pub priority: i32,
}

impl NewMessage {
    pub fn text(
        conversation_id: impl Into<String>,
        conversation_kind: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            body: body.into(),
            sender_id: String::new(),
            receiver_id: String::new(),
            sender_name: String::new(),
            receiver_name: String::new(),
            kind: MessageKind::Text,
            conversation_kind: conversation_kind.into(),
            metadata: HashMap::new(),
            priority: 0,
        }
    }

    pub fn from(mut self, sender_id: impl Into<String>, sender_name: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self.sender_name = sender_name.into();
        self
    }

    pub fn to(mut self, receiver_id: impl Into<String>, receiver_name: impl Into<String>) -> Self {
        self.receiver_id = receiver_id.into();
        self.receiver_name = receiver_name.into();
        self
    }

    pub fn kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }
}
