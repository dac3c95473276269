use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{
    conversation_kind, require_str, sender_name, GENERATION_APOLOGY, QUOTA_APOLOGY,
};
use crate::config::ChatConfig;
use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::database::MessageLog;
use crate::models::{NewMessage, Turn};
use crate::router::EventHandler;
use crate::services::context::ContextCache;
use crate::services::inference::{ChatMessage, SpeechSynthesizer, TextGenerator};
use crate::utils::error::ApiError;
use crate::utils::markup::clean_llm_output;

/// text -> text -> speech pipeline: read-through context, persist the
/// human turn, generate, clean, persist the assistant turn, push it, then
/// deliver synthesized audio with a streaming attempt and a single-shot
/// fallback.
pub struct TextGenerationPipeline {
    log: Arc<dyn MessageLog>,
    cache: ContextCache,
    registry: ConnectionRegistry,
    llm: Arc<dyn TextGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    chat: ChatConfig,
}

impl TextGenerationPipeline {
    pub fn new(
        log: Arc<dyn MessageLog>,
        cache: ContextCache,
        registry: ConnectionRegistry,
        llm: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        chat: ChatConfig,
    ) -> Self {
        Self {
            log,
            cache,
            registry,
            llm,
            synthesizer,
            chat,
        }
    }

    fn build_llm_messages(&self, turns: &[Turn], prompt: &str) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = turns.iter().map(ChatMessage::from).collect();
        messages.push(ChatMessage::user(prompt));
        messages.push(ChatMessage::user(self.chat.system_instruction.as_str()));
        messages
    }

    /// Generation degraded to a fixed apology on capability failure; the
    /// apology travels the normal message channel.
    async fn generate(&self, messages: &[ChatMessage]) -> String {
        match self.llm.generate(messages).await {
            Ok(raw) => clean_llm_output(&raw),
            Err(ApiError::RateLimited(msg)) => {
                warn!("LLM rate limited: {}", msg);
                QUOTA_APOLOGY.to_string()
            }
            Err(err) => {
                error!("LLM generation failed: {}", err);
                GENERATION_APOLOGY.to_string()
            }
        }
    }

    /// Two-strategy delivery: attempt incremental streaming; on any
    /// failure switch to single-shot delivery of the full artifact. A
    /// missing connection skips delivery entirely.
    async fn deliver_audio(&self, connection: &Option<ConnectionHandle>, text: &str) -> &'static str {
        let Some(handle) = connection else {
            debug!("No live connection, skipping audio delivery");
            return "skipped";
        };

        match self.synthesizer.synthesize_stream(text).await {
            Ok(mut stream) => {
                let mut complete = true;
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(bytes) => {
                            if !handle.send_binary(bytes) {
                                complete = false;
                                break;
                            }
                        }
                        Err(err) => {
                            warn!("Audio stream interrupted: {}", err);
                            complete = false;
                            break;
                        }
                    }
                }
                if complete {
                    return "streamed";
                }
            }
            Err(err) => {
                warn!("Streaming synthesis unavailable: {}", err);
            }
        }

        match self.synthesizer.synthesize(text).await {
            Ok(bytes) => {
                if handle.send_binary(bytes) {
                    "single_shot"
                } else {
                    "failed"
                }
            }
            Err(err) => {
                error!("Single-shot audio fallback failed: {}", err);
                "failed"
            }
        }
    }
}

#[async_trait]
impl EventHandler for TextGenerationPipeline {
    async fn handle(&self, payload: Value) -> Result<Option<Value>> {
        let session_id = require_str(&payload, "session_id")?;
        let conversation_id = require_str(&payload, "chat_urn")?;
        let kind = conversation_kind(&payload);
        let prompt = require_str(&payload, "text")?;
        let human_name = sender_name(&payload, session_id);

        debug!(
            "Text generation for session {} conversation {}",
            session_id, conversation_id
        );

        // The cache must reflect the persisted log before the LLM call.
        let turns = self
            .cache
            .read_through(self.log.as_ref(), conversation_id, kind)
            .await?;

        self.log
            .append(
                NewMessage::text(conversation_id, kind, prompt)
                    .from(session_id, human_name)
                    .to(&self.chat.assistant_id, &self.chat.assistant_name),
            )
            .await?;
        self.cache
            .append_and_store(conversation_id, Turn::human(prompt));

        let messages = self.build_llm_messages(&turns, prompt);
        let response_message = self.generate(&messages).await;

        let assistant = self
            .log
            .append(
                NewMessage::text(conversation_id, kind, &response_message)
                    .from(&self.chat.assistant_id, &self.chat.assistant_name)
                    .to(session_id, human_name),
            )
            .await?;
        self.cache
            .append_and_store(conversation_id, Turn::assistant(&response_message));

        let connection = self.registry.get(session_id);
        if let Some(handle) = &connection {
            handle.send_records(&[assistant.clone()]);
        }

        let audio_delivery = self.deliver_audio(&connection, &response_message).await;

        Ok(Some(json!({
            "response_message": response_message,
            "message_id": assistant.message_id,
            "chat_urn": conversation_id,
            "session_id": session_id,
            "audio_delivery": audio_delivery,
        })))
    }
}
