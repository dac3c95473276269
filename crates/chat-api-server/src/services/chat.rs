use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::MessageLog;
use crate::models::Message;
use crate::services::context::ContextCache;
use crate::utils::error::ApiError;

/// One conversation's history as returned to clients: conversations
/// ordered by most recent activity, messages chronological within each.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub conversation_kind: String,
    pub messages: Vec<Message>,
}

pub struct ChatHistoryService {
    log: Arc<dyn MessageLog>,
    cache: ContextCache,
}

impl ChatHistoryService {
    pub fn new(log: Arc<dyn MessageLog>, cache: ContextCache) -> Self {
        Self { log, cache }
    }

    /// Fetch every conversation the participant took part in, optionally
    /// restricted to one conversation kind.
    pub async fn fetch_conversations(
        &self,
        participant_id: &str,
        conversation_kind: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        let messages = self
            .log
            .fetch_by_participant(participant_id, conversation_kind)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

        // Store order is newest-first, so first sight of a conversation id
        // also orders conversations by latest activity.
        let mut summaries: Vec<ConversationSummary> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for message in messages {
            let position = *positions
                .entry(message.conversation_id.clone())
                .or_insert_with(|| {
                    summaries.push(ConversationSummary {
                        conversation_id: message.conversation_id.clone(),
                        conversation_kind: message.conversation_kind.clone(),
                        messages: Vec::new(),
                    });
                    summaries.len() - 1
                });
            summaries[position].messages.push(message);
        }

        for summary in &mut summaries {
            summary.messages.reverse();
        }

        debug!(
            "Grouped history for participant {} into {} conversations",
            participant_id,
            summaries.len()
        );

        Ok(summaries)
    }

    /// Best-effort purge of one conversation: durable rows plus the cached
    /// context. Returns false instead of failing on storage errors.
    pub async fn delete_conversation(&self, conversation_id: &str) -> bool {
        let deleted = self.log.delete_by_conversation(conversation_id).await;
        self.cache.clear(conversation_id);

        info!(
            "Deleted conversation {} (storage success: {})",
            conversation_id, deleted
        );
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Turn;
    use crate::test_support::{addressed_message, InMemoryMessageLog};

    fn service(log: Arc<InMemoryMessageLog>) -> ChatHistoryService {
        ChatHistoryService::new(log, ContextCache::new("assistant"))
    }

    #[tokio::test]
    async fn test_fetch_groups_by_conversation_latest_first() {
        let log = Arc::new(InMemoryMessageLog::new());
        log.append(addressed_message("c1", "chat", "oldest", "u1", "assistant"))
            .await
            .unwrap();
        log.append(addressed_message("c2", "chat", "newer", "assistant", "u1"))
            .await
            .unwrap();
        log.append(addressed_message("c1", "chat", "newest", "u1", "assistant"))
            .await
            .unwrap();

        let summaries = service(log.clone())
            .fetch_conversations("u1", None)
            .await
            .unwrap();

        assert_eq!(summaries.len(), 2);
        // c1 has the latest activity so it comes first.
        assert_eq!(summaries[0].conversation_id, "c1");
        // Messages inside a conversation are chronological.
        assert_eq!(summaries[0].messages[0].body, "oldest");
        assert_eq!(summaries[0].messages[1].body, "newest");
    }

    #[tokio::test]
    async fn test_fetch_filters_by_conversation_kind() {
        let log = Arc::new(InMemoryMessageLog::new());
        log.append(addressed_message("c1", "chat", "plain", "u1", "assistant"))
            .await
            .unwrap();
        log.append(addressed_message("c2", "rag", "grounded", "u1", "assistant"))
            .await
            .unwrap();

        let summaries = service(log.clone())
            .fetch_conversations("u1", Some("rag"))
            .await
            .unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].conversation_kind, "rag");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let log = Arc::new(InMemoryMessageLog::new());
        log.append(addressed_message("c1", "chat", "to be purged", "u1", "assistant"))
            .await
            .unwrap();

        let service = service(log.clone());
        assert!(service.delete_conversation("c1").await);
        assert!(service.delete_conversation("c1").await);
        assert_eq!(log.message_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_clears_cached_context() {
        let log = Arc::new(InMemoryMessageLog::new());
        let cache = ContextCache::new("assistant");
        cache.set("c1", vec![Turn::human("cached")], None);

        let service = ChatHistoryService::new(log, cache.clone());
        service.delete_conversation("c1").await;

        assert!(cache.get("c1").is_none());
    }

    #[tokio::test]
    async fn test_delete_storage_failure_reports_false() {
        let log = Arc::new(InMemoryMessageLog::new());
        log.fail_deletes();

        assert!(!service(log).delete_conversation("c1").await);
    }
}
