pub mod settings;

pub use settings::{
    ChatConfig, DatabaseConfig, EmbeddingConfig, ImageConfig, LlmConfig, RagConfig, ServerConfig,
    Settings, SpeechConfig,
};
