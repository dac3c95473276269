pub mod chat;
pub mod context;
pub mod index;
pub mod inference;

pub use chat::ChatHistoryService;
pub use context::ContextCache;
pub use index::RagService;
