pub mod audio;
pub mod code;
pub mod image;
pub mod rag;
pub mod text;

pub use audio::AudioTranscriptionPipeline;
pub use code::CodeGenerationPipeline;
pub use image::ImageGenerationPipeline;
pub use rag::RagTaskPipeline;
pub use text::TextGenerationPipeline;

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::sync::Arc;

use crate::config::ChatConfig;
use crate::connection::ConnectionRegistry;
use crate::database::MessageLog;
use crate::router::EventRouter;
use crate::services::context::ContextCache;
use crate::services::index::RagService;
use crate::services::inference::{ImageGenerator, SpeechSynthesizer, TextGenerator, Transcriber};

/// Fixed user-facing strings for degraded outcomes. These are delivered
/// through the normal message channel instead of surfacing an error.
pub const QUOTA_APOLOGY: &str =
    "You exceeded your current quota, please check your plan and billing details.";
pub const GENERATION_APOLOGY: &str =
    "Sorry, something went wrong while generating a response. Please try again later.";
pub const IMAGE_APOLOGY: &str = "Sorry, couldn't generate the image. Please try again later.";
pub const IMAGE_CAPTION: &str = "Here is your generated image.";

pub(crate) fn require_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Missing '{}' in event payload", key))
}

pub(crate) fn optional_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

/// Conversation kind defaults to plain chat when the client omits it.
pub(crate) fn conversation_kind(payload: &Value) -> &str {
    optional_str(payload, "chat_type").unwrap_or("chat")
}

/// Display name for the human participant; clients may send their own.
pub(crate) fn sender_name<'a>(payload: &'a Value, session_id: &'a str) -> &'a str {
    optional_str(payload, "sender_name").unwrap_or(session_id)
}

/// Build the startup route table: every (pattern, task) pair gets its own
/// handler id, bound through the router's explicit mapping table.
#[allow(clippy::too_many_arguments)]
pub fn build_event_router(
    log: Arc<dyn MessageLog>,
    cache: ContextCache,
    registry: ConnectionRegistry,
    llm: Arc<dyn TextGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    transcriber: Arc<dyn Transcriber>,
    images: Arc<dyn ImageGenerator>,
    rag: Arc<RagService>,
    chat: ChatConfig,
) -> Result<EventRouter> {
    let text = Arc::new(TextGenerationPipeline::new(
        log.clone(),
        cache.clone(),
        registry.clone(),
        llm.clone(),
        synthesizer,
        chat.clone(),
    ));
    let image = Arc::new(ImageGenerationPipeline::new(
        log.clone(),
        registry.clone(),
        images,
        chat.clone(),
    ));
    let code = Arc::new(CodeGenerationPipeline::new(
        log.clone(),
        registry.clone(),
        llm,
        chat.clone(),
    ));
    let audio = Arc::new(AudioTranscriptionPipeline::new(
        transcriber,
        registry.clone(),
        chat.clone(),
        text.clone(),
        image.clone(),
    ));
    let rag_task = Arc::new(RagTaskPipeline::new(log, registry, rag, chat));

    let mut router = EventRouter::new();

    // Rag routes nest under message/<modality>/, so they go first; the
    // wildcard modality segment covers both text queries and document
    // ingests arriving over the socket.
    router.register(r"^message/[a-z]+/rag/(?P<task>[a-z_]+)$", "rag_task")?;
    router.register(r"^message/audio/infer$", "audio_infer")?;
    router.register(r"^message/text/text_generation$", "text_generation")?;
    router.register(r"^message/text/image_generation$", "image_generation")?;
    router.register(r"^message/text/code_generation$", "code_generation")?;

    router.bind("rag_task", rag_task);
    router.bind("audio_infer", audio);
    router.bind("text_generation", text);
    router.bind("image_generation", image);
    router.bind("code_generation", code);

    router.validate()?;
    Ok(router)
}
