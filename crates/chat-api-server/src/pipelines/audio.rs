use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{require_str, sender_name, ImageGenerationPipeline, TextGenerationPipeline};
use crate::config::ChatConfig;
use crate::connection::ConnectionRegistry;
use crate::models::MessageKind;
use crate::router::EventHandler;
use crate::services::inference::Transcriber;
use crate::utils::artifacts::TempArtifact;
use crate::utils::encoding::decode_base64_payload;

/// speech -> text front of the pipeline: decode the audio payload into a
/// temp artifact, transcribe it, push the transcript, then hand the text
/// to the generation pipeline the transcript asks for. The temp artifact
/// is removed on every exit path.
pub struct AudioTranscriptionPipeline {
    transcriber: Arc<dyn Transcriber>,
    registry: ConnectionRegistry,
    chat: ChatConfig,
    text: Arc<TextGenerationPipeline>,
    image: Arc<ImageGenerationPipeline>,
}

impl AudioTranscriptionPipeline {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        registry: ConnectionRegistry,
        chat: ChatConfig,
        text: Arc<TextGenerationPipeline>,
        image: Arc<ImageGenerationPipeline>,
    ) -> Self {
        Self {
            transcriber,
            registry,
            chat,
            text,
            image,
        }
    }

    /// The transcript picks the downstream task: an explicit ask for an
    /// image routes to image generation, everything else to text.
    fn onward_task(transcript: &str) -> &'static str {
        let lowered = transcript.to_lowercase();
        if lowered.contains("image") || lowered.contains("images") {
            "image_generation"
        } else {
            "text_generation"
        }
    }
}

#[async_trait]
impl EventHandler for AudioTranscriptionPipeline {
    async fn handle(&self, mut payload: Value) -> Result<Option<Value>> {
        let session_id = require_str(&payload, "session_id")?.to_string();
        let audio_base64 = require_str(&payload, "audio_base64")?;
        let file_name = payload
            .get("file_name")
            .and_then(Value::as_str)
            .unwrap_or("clip.wav");

        let audio_bytes =
            decode_base64_payload(audio_base64).context("Undecodable audio payload")?;

        let artifact = TempArtifact::create(
            Path::new(&self.chat.temp_dir),
            &format!("{}_{}", Uuid::new_v4(), file_name),
            &audio_bytes,
        )?;

        let transcript = self.transcriber.transcribe(artifact.path()).await?;
        info!("Transcribed audio event into {} chars", transcript.len());

        // The transcript itself goes straight back to the client; the
        // durable human turn is appended by the downstream pipeline.
        if let Some(handle) = self.registry.get(&session_id) {
            handle.send_json(json!([{
                "body": transcript.as_str(),
                "sender_name": sender_name(&payload, &session_id),
                "kind": MessageKind::Text,
                "chat_urn": payload.get("chat_urn"),
            }]));
        }

        let task = Self::onward_task(&transcript);
        debug!("Routing transcribed audio to {}", task);

        if let Some(object) = payload.as_object_mut() {
            object.insert("text".to_string(), Value::String(transcript));
            object.insert("task".to_string(), Value::String(task.to_string()));
            object.remove("audio_base64");
        }

        // The source artifact has served its purpose once transcription is
        // done; downstream stages work from text.
        drop(artifact);

        match task {
            "image_generation" => self.image.handle(payload).await,
            _ => self.text.handle(payload).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context::ContextCache;
    use crate::services::inference::{
        AudioStream, GeneratedImage, MockImageGenerator, MockSpeechSynthesizer,
        MockTextGenerator, MockTranscriber,
    };
    use crate::test_support::InMemoryMessageLog;
    use crate::utils::encoding::encode_base64;
    use crate::utils::error::ApiError;

    fn chat_config(temp_dir: &Path) -> ChatConfig {
        ChatConfig {
            assistant_id: "assistant".to_string(),
            assistant_name: "Assistant".to_string(),
            temp_dir: temp_dir.to_string_lossy().to_string(),
            system_instruction: "Keep it brief.".to_string(),
            code_instruction: "Return code.".to_string(),
        }
    }

    fn empty_stream() -> AudioStream {
        Box::pin(futures::stream::iter(Vec::new()))
    }

    struct Fixture {
        log: Arc<InMemoryMessageLog>,
        handler: AudioTranscriptionPipeline,
        temp_dir: tempfile::TempDir,
    }

    fn fixture(
        transcriber: MockTranscriber,
        llm: MockTextGenerator,
        images: MockImageGenerator,
    ) -> Fixture {
        let temp_dir = tempfile::tempdir().unwrap();
        let chat = chat_config(temp_dir.path());
        let log = Arc::new(InMemoryMessageLog::new());
        let registry = ConnectionRegistry::new();

        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer
            .expect_synthesize_stream()
            .returning(|_| Ok(empty_stream()));

        let text = Arc::new(TextGenerationPipeline::new(
            log.clone(),
            ContextCache::new("assistant"),
            registry.clone(),
            Arc::new(llm),
            Arc::new(synthesizer),
            chat.clone(),
        ));
        let image = Arc::new(ImageGenerationPipeline::new(
            log.clone(),
            registry.clone(),
            Arc::new(images),
            chat.clone(),
        ));

        let handler =
            AudioTranscriptionPipeline::new(Arc::new(transcriber), registry, chat, text, image);

        Fixture {
            log,
            handler,
            temp_dir,
        }
    }

    fn audio_event(audio_base64: &str) -> Value {
        json!({
            "session_id": "S1",
            "chat_urn": "C1",
            "chat_type": "chat",
            "file_name": "voice.wav",
            "audio_base64": audio_base64,
        })
    }

    fn temp_file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_malformed_audio_appends_nothing_and_leaves_no_temp_file() {
        let fx = fixture(
            MockTranscriber::new(),
            MockTextGenerator::new(),
            MockImageGenerator::new(),
        );

        let result = fx.handler.handle(audio_event("!!not-base64!!")).await;

        assert!(result.is_err());
        assert_eq!(fx.log.message_count(), 0);
        assert_eq!(temp_file_count(fx.temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_transcription_failure_cleans_up_temp_artifact() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Err(ApiError::CapabilityError("unintelligible".to_string())));

        let fx = fixture(transcriber, MockTextGenerator::new(), MockImageGenerator::new());

        let result = fx
            .handler
            .handle(audio_event(&encode_base64(b"RIFFdata")))
            .await;

        assert!(result.is_err());
        assert_eq!(fx.log.message_count(), 0);
        assert_eq!(temp_file_count(fx.temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_plain_transcript_routes_to_text_generation() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|path| {
                assert!(path.exists());
                Ok("what is the weather".to_string())
            });

        let mut llm = MockTextGenerator::new();
        llm.expect_generate()
            .times(1)
            .withf(|messages| messages.iter().any(|m| m.content == "what is the weather"))
            .returning(|_| Ok("Sunny.".to_string()));

        let fx = fixture(transcriber, llm, MockImageGenerator::new());

        let result = fx
            .handler
            .handle(audio_event(&encode_base64(b"RIFFdata")))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["response_message"], "Sunny.");
        // human transcript turn + assistant answer
        assert_eq!(fx.log.message_count(), 2);
        assert_eq!(temp_file_count(fx.temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_image_request_in_transcript_routes_to_image_generation() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Ok("please draw an image of a cat".to_string()));

        let mut images = MockImageGenerator::new();
        images.expect_generate().times(1).returning(|_| {
            Ok(GeneratedImage {
                data_url: "data:image/png;base64,xyz".to_string(),
            })
        });

        let fx = fixture(transcriber, MockTextGenerator::new(), images);

        fx.handler
            .handle(audio_event(&encode_base64(b"RIFFdata")))
            .await
            .unwrap()
            .unwrap();

        let messages = fx.log.all_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].kind, "image");
        assert_eq!(temp_file_count(fx.temp_dir.path()), 0);
    }
}
