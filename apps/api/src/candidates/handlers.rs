use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::candidates::ingest::read_upload_form;
use crate::candidates::records::get_candidate;
use crate::errors::AppError;
use crate::models::candidate::CandidateRow;
use crate::state::AppState;

#[derive(Serialize)]
pub struct UploadResponse {
    pub candidate: CandidateRow,
}

/// GET /api/v1/candidates/:id
pub async fn handle_get_candidate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CandidateRow>, AppError> {
    Ok(Json(get_candidate(&state.db, id).await?))
}

/// POST /api/v1/candidates/bulk-upload
///
/// One `file` part per request; the bulk flow issues one request per file
/// (or uses `/api/v1/batches/uploads` to have the server run the batch).
pub async fn handle_upload_resume(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut form = read_upload_form(multipart).await?;
    let upload = match form.files.len() {
        0 => return Err(AppError::Validation("Missing 'file' field".to_string())),
        1 => form.files.remove(0),
        n => {
            return Err(AppError::Validation(format!(
                "Expected one file per request, got {n}"
            )))
        }
    };
    let candidate = state.ingestor.ingest(&upload).await?;
    Ok(Json(UploadResponse { candidate }))
}
