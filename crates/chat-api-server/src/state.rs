use std::sync::Arc;

use crate::config::Settings;
use crate::connection::ConnectionRegistry;
use crate::router::EventRouter;
use crate::services::{ChatHistoryService, RagService};

/// Process-scoped state shared across handlers; lifecycle is tied to
/// startup/shutdown, nothing here is a module-level global.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub connections: ConnectionRegistry,
    pub router: Arc<EventRouter>,
    pub history: Arc<ChatHistoryService>,
    pub rag: Arc<RagService>,
}
