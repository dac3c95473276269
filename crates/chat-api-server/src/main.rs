use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_api_server::config::Settings;
use chat_api_server::connection::ConnectionRegistry;
use chat_api_server::database::{DbPool, MessageLog, MessageRepository};
use chat_api_server::services::context::ContextCache;
use chat_api_server::services::index::{RagService, VectorIndexStore};
use chat_api_server::services::inference::{
    EmbeddingService, ImageService, LlmService, SpeechService,
};
use chat_api_server::services::ChatHistoryService;
use chat_api_server::state::AppState;
use chat_api_server::{handlers, pipelines};

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("logs", "chat-api-server.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chat_api_server=debug".into()),
        )
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().json().with_writer(file_writer))
        .init();

    info!("Starting chat API server...");

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let db_pool = DbPool::new(&settings.database).await?;
    db_pool.run_migrations().await?;
    info!("Database connection established");

    let repository: Arc<dyn MessageLog> = Arc::new(MessageRepository::new(db_pool.clone()));

    let cache = ContextCache::new(&settings.chat.assistant_id);
    let connections = ConnectionRegistry::new();

    let llm = Arc::new(LlmService::new(settings.llm.clone()));
    let embedder = Arc::new(EmbeddingService::new(settings.embedding.clone()));
    let speech = Arc::new(SpeechService::new(settings.speech.clone()));
    let images = Arc::new(ImageService::new(settings.image.clone()));

    let rag = Arc::new(RagService::new(
        VectorIndexStore::new(&settings.rag.index_root),
        embedder,
        llm.clone(),
        settings.rag.clone(),
    ));

    // Route table and handler bindings are fixed for the process lifetime;
    // a dangling binding aborts startup here.
    let event_router = Arc::new(pipelines::build_event_router(
        repository.clone(),
        cache.clone(),
        connections.clone(),
        llm,
        speech.clone(),
        speech,
        images,
        rag.clone(),
        settings.chat.clone(),
    )?);
    info!("Event routes registered");

    let history = Arc::new(ChatHistoryService::new(repository, cache));

    let app_state = AppState {
        settings: settings.clone(),
        connections,
        router: event_router,
        history,
        rag,
    };

    let app = build_router(app_state);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/ws/{session_id}", get(handlers::ws::websocket_handler))
        .route(
            "/api/chat/history/{participant_id}",
            get(handlers::chat::fetch_chats_handler),
        )
        .route(
            "/api/chat/{conversation_id}",
            delete(handlers::chat::delete_chat_handler),
        )
        .route(
            "/api/rag/build/{session_id}/{conversation_id}",
            post(handlers::rag::build_index_handler),
        )
        .with_state(state)
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
}
