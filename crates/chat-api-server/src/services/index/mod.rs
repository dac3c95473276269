pub mod chunker;
pub mod document;
pub mod store;

pub use chunker::TextChunker;
pub use store::{IndexedChunk, VectorIndex, VectorIndexStore};

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::RagConfig;
use crate::services::inference::{ChatMessage, Embedder, TextGenerator};
use crate::utils::error::ApiError;

/// Fixed degrade-not-fail answer for conversations with no built index.
pub const NO_INDEX_FALLBACK: &str =
    "Please upload a document first so it can be indexed for this conversation.";

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub created: bool,
    pub chunks_added: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub answer: String,
    pub retrieved: usize,
    pub fallback: bool,
}

/// Build and query of the per-(session, conversation) similarity index.
pub struct RagService {
    store: VectorIndexStore,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn TextGenerator>,
    config: RagConfig,
}

impl RagService {
    pub fn new(
        store: VectorIndexStore,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn TextGenerator>,
        config: RagConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            config,
        }
    }

    pub fn has_index(&self, session_id: &str, conversation_id: &str) -> bool {
        self.store.exists(session_id, conversation_id)
    }

    /// Ingest one document: load, chunk, embed, then create-or-append the
    /// persisted index. Any failure here is fatal to this build request;
    /// the previously persisted index is only replaced after the in-memory
    /// index is fully updated.
    pub async fn build_from_file(
        &self,
        session_id: &str,
        conversation_id: &str,
        document_path: &Path,
    ) -> Result<BuildOutcome, ApiError> {
        let source = document_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();

        info!(
            "Building index for session {} conversation {} from {}",
            session_id, conversation_id, source
        );

        let pages = document::load_document(document_path)
            .map_err(|e| ApiError::BadRequest(format!("Failed to load document: {}", e)))?;

        let chunker = TextChunker::new(self.config.chunk_size, self.config.chunk_overlap);
        let mut pending: Vec<(usize, String)> = Vec::new();
        for page in &pages {
            let chunks = chunker
                .chunk(&page.content)
                .map_err(|e| ApiError::InternalError(format!("Chunking failed: {}", e)))?;
            for chunk in chunks {
                pending.push((page.page, chunk.content));
            }
        }

        if pending.is_empty() {
            return Err(ApiError::BadRequest(
                "Document contained no extractable text".to_string(),
            ));
        }

        debug!("Embedding {} chunks from {}", pending.len(), source);

        let mut indexed = Vec::with_capacity(pending.len());
        for (page, content) in pending {
            let embedding = self.embedder.embed(&content).await?;
            indexed.push(IndexedChunk {
                chunk_id: store::chunk_identity(&source, page),
                source: source.clone(),
                page,
                content,
                embedding,
            });
        }

        let created = !self.store.exists(session_id, conversation_id);
        let mut index = if created {
            VectorIndex::new()
        } else {
            self.store
                .load(session_id, conversation_id)
                .map_err(|e| ApiError::InternalError(format!("Failed to load index: {}", e)))?
        };

        let chunks_added = indexed.len();
        index.append(indexed);

        self.store
            .persist(session_id, conversation_id, &index)
            .map_err(|e| ApiError::InternalError(format!("Failed to persist index: {}", e)))?;

        info!(
            "Index for session {} conversation {} now holds {} chunks ({} new, created: {})",
            session_id,
            conversation_id,
            index.len(),
            chunks_added,
            created
        );

        Ok(BuildOutcome {
            created,
            chunks_added,
            total_chunks: index.len(),
        })
    }

    /// Answer a question against the conversation's index. Absent index
    /// means no retrieval and the fixed fallback answer.
    pub async fn query(
        &self,
        session_id: &str,
        conversation_id: &str,
        question: &str,
    ) -> Result<RagAnswer, ApiError> {
        if !self.store.exists(session_id, conversation_id) {
            debug!(
                "No index for session {} conversation {}, returning fallback",
                session_id, conversation_id
            );
            return Ok(RagAnswer {
                answer: NO_INDEX_FALLBACK.to_string(),
                retrieved: 0,
                fallback: true,
            });
        }

        let index = self
            .store
            .load(session_id, conversation_id)
            .map_err(|e| ApiError::InternalError(format!("Failed to load index: {}", e)))?;

        let query_embedding = self.embedder.embed(question).await?;
        let hits = index.search(&query_embedding, self.config.retrieval_top_k);

        debug!(
            "Retrieved {} chunks for conversation {}",
            hits.len(),
            conversation_id
        );

        let context = hits
            .iter()
            .map(|(_, chunk)| chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = vec![
            ChatMessage::system(format!(
                "You are an assistant answering questions from the provided document \
                 context. Answer accurately from the context; if the information is \
                 not in the context, say so clearly.\n\n{}",
                context
            )),
            ChatMessage::user(question),
        ];

        let answer = self.llm.generate(&messages).await?;

        Ok(RagAnswer {
            answer,
            retrieved: hits.len(),
            fallback: false,
        })
    }
}
