use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::orchestrator::start;
use crate::batch::processors::{ProfileBuildProcessor, ResumeIngestProcessor};
use crate::batch::registry::{BatchKind, BatchView};
use crate::candidates::ingest::read_upload_form;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBatchRequest {
    pub user_id: Uuid,
    pub candidate_ids: Vec<Uuid>,
    pub job_id: Option<Uuid>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStarted {
    pub batch_id: Uuid,
    pub total: usize,
    pub concurrency: usize,
}

/// POST /api/v1/batches/profiles
pub async fn handle_start_profile_batch(
    State(state): State<AppState>,
    Json(req): Json<ProfileBatchRequest>,
) -> Result<(StatusCode, Json<BatchStarted>), AppError> {
    let candidate_ids = dedup_preserving_order(req.candidate_ids);
    let concurrency = state.config.batch_concurrency(req.concurrency);
    let total = candidate_ids.len();

    let processor = ProfileBuildProcessor::new(Arc::clone(&state.builder), req.job_id);
    let handle = start(candidate_ids, concurrency, Arc::new(processor))?;
    let batch_id = state
        .batches
        .register(BatchKind::Profiles, req.user_id, Arc::new(handle));

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchStarted {
            batch_id,
            total,
            concurrency,
        }),
    ))
}

/// POST /api/v1/batches/uploads
///
/// Multipart: `user_id`, optional `concurrency`, one or more `file` parts.
pub async fn handle_start_upload_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<BatchStarted>), AppError> {
    let form = read_upload_form(multipart).await?;
    let user_id: Uuid = form
        .fields
        .get("user_id")
        .ok_or_else(|| AppError::Validation("Missing 'user_id' field".to_string()))?
        .trim()
        .parse()
        .map_err(|_| AppError::Validation("'user_id' is not a UUID".to_string()))?;
    let requested = form
        .fields
        .get("concurrency")
        .map(|raw| {
            raw.trim()
                .parse::<usize>()
                .map_err(|_| AppError::Validation(format!("Invalid concurrency '{raw}'")))
        })
        .transpose()?;

    let concurrency = state.config.batch_concurrency(requested);
    let total = form.files.len();

    let processor = ResumeIngestProcessor::new(Arc::clone(&state.ingestor));
    let handle = start(form.files, concurrency, Arc::new(processor))?;
    let batch_id = state
        .batches
        .register(BatchKind::Uploads, user_id, Arc::new(handle));

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchStarted {
            batch_id,
            total,
            concurrency,
        }),
    ))
}

/// GET /api/v1/batches/:id
pub async fn handle_get_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchView>, AppError> {
    Ok(Json(state.batches.view(id)?))
}

/// POST /api/v1/batches/:id/pause
pub async fn handle_pause_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchView>, AppError> {
    Ok(Json(state.batches.pause(id)?))
}

/// POST /api/v1/batches/:id/resume
pub async fn handle_resume_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchView>, AppError> {
    Ok(Json(state.batches.resume(id)?))
}

/// POST /api/v1/batches/:id/retry
pub async fn handle_retry_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchView>, AppError> {
    Ok(Json(state.batches.retry(id)?))
}

fn dedup_preserving_order(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dedup_preserving_order(vec![a, b, a, b, a]), vec![a, b]);
    }

    #[test]
    fn test_request_uses_camel_case() {
        let req: ProfileBatchRequest = serde_json::from_str(
            r#"{"userId":"00000000-0000-0000-0000-000000000000","candidateIds":[],"concurrency":4}"#,
        )
        .unwrap();
        assert_eq!(req.concurrency, Some(4));
        assert!(req.job_id.is_none());
    }
}
