use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::DbPool;
use crate::models::{Message, NewMessage};

/// Boundary contract of the durable message log. Pipelines depend on this
/// trait so the storage engine stays an external collaborator.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Assign id + server timestamp, persist, return the stored record.
    async fn append(&self, message: NewMessage) -> Result<Message>;

    /// Union of messages where the participant is sender or receiver,
    /// optionally filtered by conversation kind, timestamp descending.
    async fn fetch_by_participant(
        &self,
        participant_id: &str,
        conversation_kind: Option<&str>,
    ) -> Result<Vec<Message>>;

    /// All messages of one conversation partition, timestamp descending.
    /// Consumers needing chronological replay reverse explicitly.
    async fn fetch_by_conversation(
        &self,
        conversation_id: &str,
        conversation_kind: &str,
    ) -> Result<Vec<Message>>;

    /// Best-effort partition purge; false (not an error) on failure.
    async fn delete_by_conversation(&self, conversation_id: &str) -> bool;
}

pub struct MessageRepository {
    pool: DbPool,
}

impl MessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const MESSAGE_COLUMNS: &str = "message_id, conversation_id, created_at, body, \
     sender_id, receiver_id, sender_name, receiver_name, \
     kind, conversation_kind, metadata, is_deleted, is_read, priority";

#[async_trait]
impl MessageLog for MessageRepository {
    async fn append(&self, message: NewMessage) -> Result<Message> {
        let message_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        let sql = format!(
            r#"INSERT INTO chat_messages ({MESSAGE_COLUMNS})
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, false, false, $12)
               RETURNING {MESSAGE_COLUMNS}"#
        );
        let stored = sqlx::query_as::<_, Message>(&sql)
            .bind(&message_id)
            .bind(&message.conversation_id)
            .bind(created_at)
            .bind(&message.body)
            .bind(&message.sender_id)
            .bind(&message.receiver_id)
            .bind(&message.sender_name)
            .bind(&message.receiver_name)
            .bind(message.kind.as_str())
            .bind(&message.conversation_kind)
            .bind(sqlx::types::Json(&message.metadata))
            .bind(message.priority)
            .fetch_one(self.pool.get_pool())
            .await?;

        info!(
            "Appended {} message {} to conversation {}",
            stored.kind, stored.message_id, stored.conversation_id
        );

        Ok(stored)
    }

    async fn fetch_by_participant(
        &self,
        participant_id: &str,
        conversation_kind: Option<&str>,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            r#"SELECT {MESSAGE_COLUMNS}
               FROM chat_messages
               WHERE (sender_id = $1 OR receiver_id = $1)
                 AND ($2::text IS NULL OR conversation_kind = $2)
                 AND is_deleted = false
               ORDER BY created_at DESC"#
        );
        let messages = sqlx::query_as::<_, Message>(&sql)
            .bind(participant_id)
            .bind(conversation_kind)
            .fetch_all(self.pool.get_pool())
            .await?;

        debug!(
            "Fetched {} messages for participant {} (kind: {:?})",
            messages.len(),
            participant_id,
            conversation_kind
        );

        Ok(messages)
    }

    async fn fetch_by_conversation(
        &self,
        conversation_id: &str,
        conversation_kind: &str,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            r#"SELECT {MESSAGE_COLUMNS}
               FROM chat_messages
               WHERE conversation_id = $1
                 AND conversation_kind = $2
                 AND is_deleted = false
               ORDER BY created_at DESC"#
        );
        let messages = sqlx::query_as::<_, Message>(&sql)
            .bind(conversation_id)
            .bind(conversation_kind)
            .fetch_all(self.pool.get_pool())
            .await?;

        debug!(
            "Fetched {} messages for conversation {}",
            messages.len(),
            conversation_id
        );

        Ok(messages)
    }

    async fn delete_by_conversation(&self, conversation_id: &str) -> bool {
        let result = sqlx::query("DELETE FROM chat_messages WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(self.pool.get_pool())
            .await;

        match result {
            Ok(outcome) => {
                debug!(
                    "Deleted {} messages for conversation {}",
                    outcome.rows_affected(),
                    conversation_id
                );
                true
            }
            Err(err) => {
                error!(
                    "Error deleting messages for conversation {}: {}",
                    conversation_id, err
                );
                false
            }
        }
    }
}
