pub mod embedding;
pub mod image;
pub mod llm;
pub mod speech;

pub use embedding::EmbeddingService;
pub use image::ImageService;
pub use llm::LlmService;
pub use speech::SpeechService;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::pin::Pin;

use crate::models::{Role, Turn};
use crate::utils::error::ApiError;

/// Wire-format message for the chat-completion capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        let role = match turn.role {
            Role::Human => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: turn.content.clone(),
        }
    }
}

pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    /// data:image/png;base64 payload ready for client rendering.
    pub data_url: String,
}

/// Language-generation capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ApiError>;
}

/// Embedding capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError>;
}

/// Speech-to-text capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, ApiError>;
}

/// Text-to-speech capability with both delivery shapes: an incremental
/// chunk stream and a single fully synthesized artifact.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Bytes, ApiError>;
    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream, ApiError>;
}

/// Image-generation capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ApiError>;
}
