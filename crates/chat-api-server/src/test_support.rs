//! Shared test doubles for unit tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::database::MessageLog;
use crate::models::{Message, NewMessage};

/// In-memory stand-in for the durable message log. Timestamps are
/// monotonically increasing so ordering assertions are deterministic.
#[derive(Default)]
pub struct InMemoryMessageLog {
    messages: Mutex<Vec<Message>>,
    clock: AtomicI64,
    fail_deletes: AtomicBool,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn all_messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn append(&self, message: NewMessage) -> Result<Message> {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst);
        let created_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
            + ChronoDuration::seconds(tick);

        let stored = Message {
            message_id: Uuid::new_v4().to_string(),
            conversation_id: message.conversation_id,
            created_at,
            body: message.body,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            sender_name: message.sender_name,
            receiver_name: message.receiver_name,
            kind: message.kind.as_str().to_string(),
            conversation_kind: message.conversation_kind,
            metadata: sqlx::types::Json(message.metadata),
            is_deleted: false,
            is_read: false,
            priority: message.priority,
        };

        self.messages.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn fetch_by_participant(
        &self,
        participant_id: &str,
        conversation_kind: Option<&str>,
    ) -> Result<Vec<Message>> {
        let mut matches: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.sender_id == participant_id || m.receiver_id == participant_id)
            .filter(|m| conversation_kind.map_or(true, |kind| m.conversation_kind == kind))
            .filter(|m| !m.is_deleted)
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    async fn fetch_by_conversation(
        &self,
        conversation_id: &str,
        conversation_kind: &str,
    ) -> Result<Vec<Message>> {
        let mut matches: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| m.conversation_kind == conversation_kind)
            .filter(|m| !m.is_deleted)
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    async fn delete_by_conversation(&self, conversation_id: &str) -> bool {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return false;
        }
        self.messages
            .lock()
            .unwrap()
            .retain(|m| m.conversation_id != conversation_id);
        true
    }
}

/// Convenience builder for a NewMessage with full addressing.
pub fn addressed_message(
    conversation_id: &str,
    conversation_kind: &str,
    body: &str,
    sender_id: &str,
    receiver_id: &str,
) -> NewMessage {
    NewMessage {
        conversation_id: conversation_id.to_string(),
        body: body.to_string(),
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.to_string(),
        sender_name: sender_id.to_string(),
        receiver_name: receiver_id.to_string(),
        kind: crate::models::MessageKind::Text,
        conversation_kind: conversation_kind.to_string(),
        metadata: HashMap::new(),
        priority: 0,
    }
}
