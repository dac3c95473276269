use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::services::chat::ConversationSummary;
use crate::state::AppState;
use crate::utils::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    pub chat_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub participant_id: String,
    pub conversations: Vec<ConversationSummary>,
}

pub async fn fetch_chats_handler(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
    Query(params): Query<FetchParams>,
) -> Result<Json<FetchResponse>, ApiError> {
    info!(
        "Fetching chat history for participant {} (kind: {:?})",
        participant_id, params.chat_type
    );

    let conversations = state
        .history
        .fetch_conversations(&participant_id, params.chat_type.as_deref())
        .await?;

    Ok(Json(FetchResponse {
        participant_id,
        conversations,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub conversation_id: String,
    pub deleted: bool,
}

/// Deletion is best-effort cleanup: storage trouble reports `deleted:
/// false` instead of an error status.
pub async fn delete_chat_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<DeleteResponse> {
    info!("Deleting conversation {}", conversation_id);

    let deleted = state.history.delete_conversation(&conversation_id).await;

    Json(DeleteResponse {
        conversation_id,
        deleted,
    })
}
