use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::jobs::{get_job, insert_job};
use crate::models::candidate::JobRow;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
}

impl CreateJobRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("Job title must not be empty".to_string()));
        }
        Ok(())
    }
}

/// POST /api/v1/jobs
pub async fn handle_create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobRow>), AppError> {
    req.validate()?;
    let requirements: Vec<String> = req
        .requirements
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    let job = insert_job(&state.db, req.title.trim(), &req.description, &requirements).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/v1/jobs/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobRow>, AppError> {
    Ok(Json(get_job(&state.db, id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_title_rejected() {
        let req: CreateJobRequest = serde_json::from_str(r#"{"title": "  "}"#).unwrap();
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_optional_fields_default() {
        let req: CreateJobRequest = serde_json::from_str(r#"{"title": "Backend Engineer"}"#).unwrap();
        assert!(req.validate().is_ok());
        assert!(req.requirements.is_empty());
    }
}
