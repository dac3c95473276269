use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub speech: SpeechConfig,
    pub image: ImageConfig,
    pub rag: RagConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SpeechConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub voice: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImageConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    /// Root directory holding one index directory per (session, conversation).
    pub index_root: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_top_k: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    /// Well-known assistant identity; log replay maps senders with this id
    /// to assistant turns.
    pub assistant_id: String,
    pub assistant_name: String,
    pub temp_dir: String,
    pub system_instruction: String,
    pub code_instruction: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
