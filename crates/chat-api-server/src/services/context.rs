use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::database::MessageLog;
use crate::models::Turn;

#[derive(Debug, Clone)]
struct CachedConversation {
    turns: Vec<Turn>,
    expires_at: Option<Instant>,
}

impl CachedConversation {
    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Instant::now() > at)
    }
}

/// Ephemeral rolling context, keyed by conversation id. If an entry is
/// present it is a projection of the durable log for that conversation;
/// on miss it is rebuilt by replaying the log (text messages only,
/// chronological, roles mapped against the assistant identity).
#[derive(Clone)]
pub struct ContextCache {
    storage: Arc<DashMap<String, CachedConversation>>,
    assistant_id: String,
}

impl ContextCache {
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            storage: Arc::new(DashMap::new()),
            assistant_id: assistant_id.into(),
        }
    }

    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    /// Returns None if absent or expired (lazy deletion).
    pub fn get(&self, conversation_id: &str) -> Option<Vec<Turn>> {
        let entry = self.storage.get(conversation_id)?;
        if entry.is_expired() {
            drop(entry);
            self.storage.remove(conversation_id);
            debug!("Conversation {} context expired, removed", conversation_id);
            return None;
        }
        Some(entry.turns.clone())
    }

    pub fn set(&self, conversation_id: impl Into<String>, turns: Vec<Turn>, ttl: Option<Duration>) {
        let conversation_id = conversation_id.into();
        debug!(
            "Storing {} context turns for conversation {}",
            turns.len(),
            conversation_id
        );
        self.storage.insert(
            conversation_id,
            CachedConversation {
                turns,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    /// Append one turn to the cached context, creating the entry if needed.
    /// Called in the same logical step as the log append; a miss between
    /// the two is healed by the next read-through rebuild.
    pub fn append_and_store(&self, conversation_id: &str, turn: Turn) {
        let mut entry = self
            .storage
            .entry(conversation_id.to_string())
            .or_insert_with(|| CachedConversation {
                turns: Vec::new(),
                expires_at: None,
            });
        entry.turns.push(turn);
    }

    pub fn clear(&self, conversation_id: &str) {
        if self.storage.remove(conversation_id).is_some() {
            debug!("Cleared context for conversation {}", conversation_id);
        }
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Return the cached context, rebuilding it from the durable log on a
    /// miss. Every handler must go through here before an LLM call.
    pub async fn read_through(
        &self,
        log: &dyn MessageLog,
        conversation_id: &str,
        conversation_kind: &str,
    ) -> Result<Vec<Turn>> {
        if let Some(turns) = self.get(conversation_id) {
            debug!(
                "Context cache hit for conversation {} ({} turns)",
                conversation_id,
                turns.len()
            );
            return Ok(turns);
        }
        self.rebuild(log, conversation_id, conversation_kind).await
    }

    /// Replay the log into a fresh context entry: text messages only,
    /// chronological order, role by assistant-identity comparison.
    pub async fn rebuild(
        &self,
        log: &dyn MessageLog,
        conversation_id: &str,
        conversation_kind: &str,
    ) -> Result<Vec<Turn>> {
        let mut messages = log
            .fetch_by_conversation(conversation_id, conversation_kind)
            .await?;

        // Store order is timestamp descending; replay needs chronological.
        messages.reverse();

        let turns: Vec<Turn> = messages
            .iter()
            .filter(|m| m.is_text())
            .map(|m| m.to_turn(&self.assistant_id))
            .collect();

        info!(
            "Rebuilt context for conversation {}: {} turns from {} messages",
            conversation_id,
            turns.len(),
            messages.len()
        );

        self.set(conversation_id, turns.clone(), None);
        Ok(turns)
    }
}
