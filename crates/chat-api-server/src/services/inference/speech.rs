use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::{AudioStream, SpeechSynthesizer, Transcriber};
use crate::config::SpeechConfig;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

/// Speech capability client: WAV bytes in, transcript out; text in,
/// synthesized audio (whole or chunked) out.
#[derive(Clone)]
pub struct SpeechService {
    client: Client,
    config: SpeechConfig,
}

impl SpeechService {
    pub fn new(config: SpeechConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    async fn synthesize_response(&self, text: &str) -> Result<reqwest::Response, ApiError> {
        let request = SynthesizeRequest {
            text,
            voice: &self.config.voice,
        };

        let response = self
            .client
            .post(format!("{}/synthesize", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::CapabilityError(format!("TTS request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::CapabilityError(format!(
                "TTS API error: {} - {}",
                status, body
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl Transcriber for SpeechService {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, ApiError> {
        let audio = tokio::fs::read(audio_path)
            .await
            .map_err(|e| ApiError::CapabilityError(format!("Failed to read audio file: {}", e)))?;

        debug!(
            "Transcribing {} bytes of audio from {:?}",
            audio.len(),
            audio_path
        );

        let response = self
            .client
            .post(format!("{}/transcribe", self.config.base_url))
            .header("content-type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| ApiError::CapabilityError(format!("STT request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::CapabilityError(format!(
                "STT API error: {} - {}",
                status, body
            )));
        }

        let transcription: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| ApiError::CapabilityError(format!("Failed to parse transcript: {}", e)))?;

        debug!("Transcribed {} chars", transcription.text.len());
        Ok(transcription.text)
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechService {
    async fn synthesize(&self, text: &str) -> Result<Bytes, ApiError> {
        debug!("Synthesizing {} chars (single-shot)", text.len());
        let response = self.synthesize_response(text).await?;

        response
            .bytes()
            .await
            .map_err(|e| ApiError::CapabilityError(format!("Failed to read TTS body: {}", e)))
    }

    async fn synthesize_stream(&self, text: &str) -> Result<AudioStream, ApiError> {
        debug!("Synthesizing {} chars (streaming)", text.len());
        let response = self.synthesize_response(text).await?;

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| ApiError::CapabilityError(format!("TTS stream error: {}", e)))
        });

        Ok(Box::pin(stream))
    }
}
