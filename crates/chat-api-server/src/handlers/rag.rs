use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Serialize;
use std::path::Path as FsPath;
use tracing::{debug, info};
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::artifacts::TempArtifact;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct BuildResponse {
    pub success: bool,
    pub created: bool,
    pub chunks_added: usize,
    pub total_chunks: usize,
}

/// Multipart document ingest feeding the same build path as the socket
/// event. Build failures surface as explicit errors to this request.
pub async fn build_index_handler(
    State(state): State<AppState>,
    Path((session_id, conversation_id)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<Json<BuildResponse>, ApiError> {
    info!(
        "Document upload for session {} conversation {}",
        session_id, conversation_id
    );

    let mut file_data: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?
    {
        if field.name() == Some("file") {
            file_name = field.file_name().map(|s| s.to_string());
            file_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?
                    .to_vec(),
            );
        }
    }

    let file_data = file_data.ok_or_else(|| ApiError::BadRequest("file required".to_string()))?;
    let file_name =
        file_name.ok_or_else(|| ApiError::BadRequest("filename required".to_string()))?;

    let mime = mime_guess::from_path(&file_name).first_or_octet_stream();
    debug!("Received {} ({} bytes, {})", file_name, file_data.len(), mime);

    let artifact = TempArtifact::create(
        FsPath::new(&state.settings.chat.temp_dir),
        &format!("{}_{}", Uuid::new_v4(), file_name),
        &file_data,
    )
    .map_err(|e| ApiError::InternalError(format!("Failed to stage upload: {}", e)))?;

    let outcome = state
        .rag
        .build_from_file(&session_id, &conversation_id, artifact.path())
        .await?;

    info!(
        "Processed {} into {} chunks for conversation {}",
        file_name, outcome.chunks_added, conversation_id
    );

    Ok(Json(BuildResponse {
        success: true,
        created: outcome.created,
        chunks_added: outcome.chunks_added,
        total_chunks: outcome.total_chunks,
    }))
}
