use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{
    conversation_kind, require_str, sender_name, GENERATION_APOLOGY, QUOTA_APOLOGY,
};
use crate::config::ChatConfig;
use crate::connection::ConnectionRegistry;
use crate::database::MessageLog;
use crate::models::{MessageKind, NewMessage};
use crate::router::EventHandler;
use crate::services::inference::{ChatMessage, TextGenerator};
use crate::utils::error::ApiError;
use crate::utils::markup::extract_code_blocks;

/// text -> code pipeline: generate with the code instruction, extract the
/// fenced blocks, persist the exchange, push the result.
pub struct CodeGenerationPipeline {
    log: Arc<dyn MessageLog>,
    registry: ConnectionRegistry,
    llm: Arc<dyn TextGenerator>,
    chat: ChatConfig,
}

impl CodeGenerationPipeline {
    pub fn new(
        log: Arc<dyn MessageLog>,
        registry: ConnectionRegistry,
        llm: Arc<dyn TextGenerator>,
        chat: ChatConfig,
    ) -> Self {
        Self {
            log,
            registry,
            llm,
            chat,
        }
    }
}

#[async_trait]
impl EventHandler for CodeGenerationPipeline {
    async fn handle(&self, payload: Value) -> Result<Option<Value>> {
        let session_id = require_str(&payload, "session_id")?;
        let conversation_id = require_str(&payload, "chat_urn")?;
        let kind = conversation_kind(&payload);
        let prompt = require_str(&payload, "text")?;
        let human_name = sender_name(&payload, session_id);

        debug!(
            "Code generation for session {} conversation {}",
            session_id, conversation_id
        );

        self.log
            .append(
                NewMessage::text(conversation_id, kind, prompt)
                    .from(session_id, human_name)
                    .to(&self.chat.assistant_id, &self.chat.assistant_name),
            )
            .await?;

        let messages = vec![
            ChatMessage::system(self.chat.code_instruction.as_str()),
            ChatMessage::user(prompt),
        ];

        let raw = match self.llm.generate(&messages).await {
            Ok(raw) => raw,
            Err(ApiError::RateLimited(msg)) => {
                warn!("LLM rate limited: {}", msg);
                QUOTA_APOLOGY.to_string()
            }
            Err(err) => {
                error!("Code generation failed: {}", err);
                GENERATION_APOLOGY.to_string()
            }
        };

        let code_blocks = extract_code_blocks(&raw);

        let assistant = self
            .log
            .append(
                NewMessage::text(conversation_id, kind, &raw)
                    .from(&self.chat.assistant_id, &self.chat.assistant_name)
                    .to(session_id, human_name)
                    .kind(MessageKind::Code),
            )
            .await?;

        if let Some(handle) = self.registry.get(session_id) {
            handle.send_records(&[assistant.clone()]);
        }

        Ok(Some(json!({
            "response_message": raw,
            "code_blocks": code_blocks,
            "message_id": assistant.message_id,
            "chat_urn": conversation_id,
            "session_id": session_id,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::inference::MockTextGenerator;
    use crate::test_support::InMemoryMessageLog;

    fn chat_config() -> ChatConfig {
        ChatConfig {
            assistant_id: "assistant".to_string(),
            assistant_name: "Assistant".to_string(),
            temp_dir: "temp".to_string(),
            system_instruction: "Keep it brief.".to_string(),
            code_instruction: "Return code.".to_string(),
        }
    }

    fn event() -> Value {
        json!({
            "session_id": "S1",
            "chat_urn": "C1",
            "text": "write fizzbuzz",
        })
    }

    #[tokio::test]
    async fn test_extracts_blocks_and_persists_code_message() {
        let log = Arc::new(InMemoryMessageLog::new());
        let mut llm = MockTextGenerator::new();
        llm.expect_generate()
            .withf(|messages| messages[0].role == "system" && messages[0].content == "Return code.")
            .returning(|_| Ok("Sure:\n```python\nprint('fizz')\n```".to_string()));

        let handler = CodeGenerationPipeline::new(
            log.clone(),
            ConnectionRegistry::new(),
            Arc::new(llm),
            chat_config(),
        );

        let result = handler.handle(event()).await.unwrap().unwrap();

        assert_eq!(result["code_blocks"][0]["language"], "python");
        assert_eq!(result["code_blocks"][0]["code"], "print('fizz')");

        let messages = log.all_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].kind, "code");
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_to_apology() {
        let log = Arc::new(InMemoryMessageLog::new());
        let mut llm = MockTextGenerator::new();
        llm.expect_generate()
            .returning(|_| Err(ApiError::LlmError("down".to_string())));

        let handler = CodeGenerationPipeline::new(
            log.clone(),
            ConnectionRegistry::new(),
            Arc::new(llm),
            chat_config(),
        );

        let result = handler.handle(event()).await.unwrap().unwrap();

        assert_eq!(result["response_message"], GENERATION_APOLOGY);
        assert!(result["code_blocks"].as_array().unwrap().is_empty());
    }
}
