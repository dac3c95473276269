use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GeneratedImage, ImageGenerator};
use crate::config::ImageConfig;
use crate::utils::encoding::png_data_url;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    image_base64: String,
}

/// Image-generation capability client.
#[derive(Clone)]
pub struct ImageService {
    client: Client,
    config: ImageConfig,
}

impl ImageService {
    pub fn new(config: ImageConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }
}

#[async_trait]
impl ImageGenerator for ImageService {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ApiError> {
        debug!("Generating image for prompt ({} chars)", prompt.len());

        let request = GenerateRequest {
            prompt,
            width: 1024,
            height: 1024,
        };

        let response = self
            .client
            .post(format!("{}/generate", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::CapabilityError(format!("Image request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::CapabilityError(format!(
                "Image API error: {} - {}",
                status, body
            )));
        }

        let generated: GenerateResponse = response.json().await.map_err(|e| {
            ApiError::CapabilityError(format!("Failed to parse image response: {}", e))
        })?;

        let bytes = crate::utils::encoding::decode_base64_payload(&generated.image_base64)
            .map_err(|e| ApiError::CapabilityError(format!("Invalid image payload: {}", e)))?;

        Ok(GeneratedImage {
            data_url: png_data_url(&bytes),
        })
    }
}
