use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

use super::{conversation_kind, require_str, sender_name, IMAGE_APOLOGY, IMAGE_CAPTION};
use crate::config::ChatConfig;
use crate::connection::ConnectionRegistry;
use crate::database::MessageLog;
use crate::models::{MessageKind, NewMessage};
use crate::router::EventHandler;
use crate::services::inference::ImageGenerator;

/// text -> image pipeline. Generation failure degrades to a fixed apology
/// delivered as a plain text message.
pub struct ImageGenerationPipeline {
    log: Arc<dyn MessageLog>,
    registry: ConnectionRegistry,
    images: Arc<dyn ImageGenerator>,
    chat: ChatConfig,
}

impl ImageGenerationPipeline {
    pub fn new(
        log: Arc<dyn MessageLog>,
        registry: ConnectionRegistry,
        images: Arc<dyn ImageGenerator>,
        chat: ChatConfig,
    ) -> Self {
        Self {
            log,
            registry,
            images,
            chat,
        }
    }
}

#[async_trait]
impl EventHandler for ImageGenerationPipeline {
    async fn handle(&self, payload: Value) -> Result<Option<Value>> {
        let session_id = require_str(&payload, "session_id")?;
        let conversation_id = require_str(&payload, "chat_urn")?;
        let kind = conversation_kind(&payload);
        let prompt = require_str(&payload, "text")?;
        let human_name = sender_name(&payload, session_id);

        debug!(
            "Image generation for session {} conversation {}",
            session_id, conversation_id
        );

        self.log
            .append(
                NewMessage::text(conversation_id, kind, prompt)
                    .from(session_id, human_name)
                    .to(&self.chat.assistant_id, &self.chat.assistant_name),
            )
            .await?;

        let (body, message_kind, caption) = match self.images.generate(prompt).await {
            Ok(image) => (image.data_url, MessageKind::Image, IMAGE_CAPTION),
            Err(err) => {
                error!("Image generation failed: {}", err);
                (IMAGE_APOLOGY.to_string(), MessageKind::Text, IMAGE_APOLOGY)
            }
        };

        let mut assistant = NewMessage::text(conversation_id, kind, body)
            .from(&self.chat.assistant_id, &self.chat.assistant_name)
            .to(session_id, human_name)
            .kind(message_kind);
        assistant
            .metadata
            .insert("caption".to_string(), caption.to_string());

        let assistant = self.log.append(assistant).await?;

        if let Some(handle) = self.registry.get(session_id) {
            handle.send_records(&[assistant.clone()]);
        }

        Ok(Some(json!({
            "message": caption,
            "message_id": assistant.message_id,
            "message_kind": assistant.kind,
            "chat_urn": conversation_id,
            "session_id": session_id,
        })))
    }
}
