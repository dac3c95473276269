use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    conversation_kind, require_str, sender_name, GENERATION_APOLOGY, QUOTA_APOLOGY,
};
use crate::config::ChatConfig;
use crate::connection::ConnectionRegistry;
use crate::database::MessageLog;
use crate::models::NewMessage;
use crate::router::EventHandler;
use crate::services::index::RagService;
use crate::utils::artifacts::TempArtifact;
use crate::utils::encoding::decode_base64_payload;
use crate::utils::error::ApiError;

/// Parameterized retrieval-augmented pipeline: the router's named capture
/// selects document ingest (`build`) or grounded answering (`query`).
pub struct RagTaskPipeline {
    log: Arc<dyn MessageLog>,
    registry: ConnectionRegistry,
    rag: Arc<RagService>,
    chat: ChatConfig,
}

impl RagTaskPipeline {
    pub fn new(
        log: Arc<dyn MessageLog>,
        registry: ConnectionRegistry,
        rag: Arc<RagService>,
        chat: ChatConfig,
    ) -> Self {
        Self {
            log,
            registry,
            rag,
            chat,
        }
    }

    async fn handle_query(&self, payload: &Value) -> Result<Option<Value>> {
        let session_id = require_str(payload, "session_id")?;
        let conversation_id = require_str(payload, "chat_urn")?;
        let kind = conversation_kind(payload);
        let prompt = require_str(payload, "text")?;
        let human_name = sender_name(payload, session_id);

        debug!(
            "Rag query for session {} conversation {}",
            session_id, conversation_id
        );

        self.log
            .append(
                NewMessage::text(conversation_id, kind, prompt)
                    .from(session_id, human_name)
                    .to(&self.chat.assistant_id, &self.chat.assistant_name),
            )
            .await?;

        // Grounded answering degrades rather than fails: the apology (or
        // the no-index fallback) travels the normal message channel.
        let (answer, retrieved, fallback) =
            match self.rag.query(session_id, conversation_id, prompt).await {
                Ok(answer) => (answer.answer, answer.retrieved, answer.fallback),
                Err(ApiError::RateLimited(msg)) => {
                    warn!("Rag generation rate limited: {}", msg);
                    (QUOTA_APOLOGY.to_string(), 0, true)
                }
                Err(err) => {
                    error!("Rag query failed: {}", err);
                    (GENERATION_APOLOGY.to_string(), 0, true)
                }
            };

        let assistant = self
            .log
            .append(
                NewMessage::text(conversation_id, kind, &answer)
                    .from(&self.chat.assistant_id, &self.chat.assistant_name)
                    .to(session_id, human_name),
            )
            .await?;

        if let Some(handle) = self.registry.get(session_id) {
            handle.send_records(&[assistant.clone()]);
        }

        Ok(Some(json!({
            "response_message": answer,
            "retrieved": retrieved,
            "fallback": fallback,
            "message_id": assistant.message_id,
            "chat_urn": conversation_id,
            "session_id": session_id,
        })))
    }

    /// Document ingest is the one place failures stay hard: the initiating
    /// request must see an explicit error, and a failed build leaves any
    /// previously persisted index untouched.
    async fn handle_build(&self, payload: &Value) -> Result<Option<Value>> {
        let session_id = require_str(payload, "session_id")?;
        let conversation_id = require_str(payload, "chat_urn")?;
        let document_base64 = require_str(payload, "document_base64")?;
        let file_name = payload
            .get("file_name")
            .and_then(Value::as_str)
            .unwrap_or("document.pdf");

        let document_bytes =
            decode_base64_payload(document_base64).context("Undecodable document payload")?;

        let artifact = TempArtifact::create(
            Path::new(&self.chat.temp_dir),
            &format!("{}_{}", Uuid::new_v4(), file_name),
            &document_bytes,
        )?;

        let outcome = self
            .rag
            .build_from_file(session_id, conversation_id, artifact.path())
            .await?;

        info!(
            "Built index for conversation {}: {} chunks added ({} total)",
            conversation_id, outcome.chunks_added, outcome.total_chunks
        );

        let status = json!({
            "status": true,
            "task": "build",
            "created": outcome.created,
            "chunks_added": outcome.chunks_added,
            "total_chunks": outcome.total_chunks,
            "chat_urn": conversation_id,
            "session_id": session_id,
        });

        if let Some(handle) = self.registry.get(session_id) {
            handle.send_json(status.clone());
        }

        Ok(Some(status))
    }
}

#[async_trait]
impl EventHandler for RagTaskPipeline {
    async fn handle(&self, payload: Value) -> Result<Option<Value>> {
        // Injected by the router from the route's named capture group.
        let task = require_str(&payload, "task")?;

        match task {
            "query" => self.handle_query(&payload).await,
            "build" => self.handle_build(&payload).await,
            other => bail!("Unsupported rag task '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use crate::services::index::{VectorIndexStore, NO_INDEX_FALLBACK};
    use crate::services::inference::{MockEmbedder, MockTextGenerator};
    use crate::test_support::InMemoryMessageLog;

    struct Fixture {
        log: Arc<InMemoryMessageLog>,
        handler: RagTaskPipeline,
        _root: tempfile::TempDir,
    }

    fn fixture(embedder: MockEmbedder, llm: MockTextGenerator) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let chat = ChatConfig {
            assistant_id: "assistant".to_string(),
            assistant_name: "Assistant".to_string(),
            temp_dir: root.path().join("temp").to_string_lossy().to_string(),
            system_instruction: "Keep it brief.".to_string(),
            code_instruction: "Return code.".to_string(),
        };
        let rag = Arc::new(RagService::new(
            VectorIndexStore::new(root.path().join("indexes")),
            Arc::new(embedder),
            Arc::new(llm),
            RagConfig {
                index_root: root.path().join("indexes").to_string_lossy().to_string(),
                chunk_size: 32,
                chunk_overlap: 8,
                retrieval_top_k: 2,
            },
        ));
        let log = Arc::new(InMemoryMessageLog::new());
        let handler =
            RagTaskPipeline::new(log.clone(), ConnectionRegistry::new(), rag, chat);

        Fixture {
            log,
            handler,
            _root: root,
        }
    }

    fn query_event(text: &str) -> Value {
        json!({
            "session_id": "S1",
            "chat_urn": "C1",
            "chat_type": "rag",
            "task": "query",
            "text": text,
        })
    }

    fn build_event(content: &[u8]) -> Value {
        json!({
            "session_id": "S1",
            "chat_urn": "C1",
            "chat_type": "rag",
            "task": "build",
            "file_name": "notes.txt",
            "document_base64": crate::utils::encoding::encode_base64(content),
        })
    }

    #[tokio::test]
    async fn test_query_without_index_returns_fallback_message() {
        let fx = fixture(MockEmbedder::new(), MockTextGenerator::new());

        let result = fx
            .handler
            .handle(query_event("what does it say?"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["response_message"], NO_INDEX_FALLBACK);
        assert_eq!(result["fallback"], true);
        assert_eq!(result["retrieved"], 0);
        // Both the question and the fallback answer are persisted.
        assert_eq!(fx.log.message_count(), 2);
    }

    #[tokio::test]
    async fn test_build_then_query_round_trip() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));
        let mut llm = MockTextGenerator::new();
        llm.expect_generate()
            .withf(|messages| messages[0].content.contains("the sky is blue"))
            .returning(|_| Ok("It says the sky is blue.".to_string()));

        let fx = fixture(embedder, llm);

        let built = fx
            .handler
            .handle(build_event(b"the sky is blue"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(built["status"], true);
        assert_eq!(built["created"], true);

        let answered = fx
            .handler
            .handle(query_event("what color is the sky?"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answered["fallback"], false);
        assert_eq!(answered["response_message"], "It says the sky is blue.");
    }

    #[tokio::test]
    async fn test_second_build_appends() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.0, 1.0]));

        let fx = fixture(embedder, MockTextGenerator::new());

        let first = fx
            .handler
            .handle(build_event(b"first document"))
            .await
            .unwrap()
            .unwrap();
        let second = fx
            .handler
            .handle(build_event(b"second document"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first["created"], true);
        assert_eq!(second["created"], false);
        assert!(second["total_chunks"].as_u64() > first["total_chunks"].as_u64());
    }

    #[tokio::test]
    async fn test_build_with_undecodable_document_is_a_hard_error() {
        let fx = fixture(MockEmbedder::new(), MockTextGenerator::new());

        let mut event = build_event(b"x");
        event["document_base64"] = json!("@@@broken@@@");

        assert!(fx.handler.handle(event).await.is_err());
        assert_eq!(fx.log.message_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_task_is_an_error() {
        let fx = fixture(MockEmbedder::new(), MockTextGenerator::new());
        let mut event = query_event("x");
        event["task"] = json!("summarize");

        assert!(fx.handler.handle(event).await.is_err());
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_to_apology() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));
        let mut llm = MockTextGenerator::new();
        llm.expect_generate()
            .returning(|_| Err(ApiError::LlmError("offline".to_string())));

        let fx = fixture(embedder, llm);

        fx.handler
            .handle(build_event(b"some grounding text"))
            .await
            .unwrap();

        let result = fx
            .handler
            .handle(query_event("anything?"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["response_message"], GENERATION_APOLOGY);
        assert_eq!(result["fallback"], true);
    }
}
