use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::profile::CandidateProfileRow;
use crate::profiles::builder::{BuildProfileRequest, BuiltProfile};
use crate::profiles::compare::{compare_profiles, ProfileComparison};
use crate::profiles::timeline::{build_timeline, Timeline};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub from: i32,
    pub to: i32,
}

/// GET /api/v1/candidates/:id/profiles
pub async fn handle_list_profiles(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<Vec<CandidateProfileRow>>, AppError> {
    let mut profiles = state.profiles.list_profiles(candidate_id).await?;
    profiles.sort_by_key(|p| p.version);
    Ok(Json(profiles))
}

/// POST /api/v1/candidates/:id/profiles/build
pub async fn handle_build_profile(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
    Json(req): Json<BuildProfileRequest>,
) -> Result<Json<BuiltProfile>, AppError> {
    let built = state.builder.build(candidate_id, &req).await?;
    Ok(Json(built))
}

/// GET /api/v1/candidates/:id/profiles/timeline
pub async fn handle_timeline(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<Timeline>, AppError> {
    let profiles = state.profiles.list_profiles(candidate_id).await?;
    Ok(Json(build_timeline(profiles)))
}

/// GET /api/v1/candidates/:id/profiles/compare?from=&to=
pub async fn handle_compare(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<ProfileComparison>, AppError> {
    let profiles = state.profiles.list_profiles(candidate_id).await?;
    let from = find_version(&profiles, candidate_id, query.from)?;
    let to = find_version(&profiles, candidate_id, query.to)?;
    Ok(Json(compare_profiles(from, to)?))
}

/// GET /api/v1/profiles/:id
pub async fn handle_get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CandidateProfileRow>, AppError> {
    Ok(Json(state.profiles.get_profile(id).await?))
}

fn find_version(
    profiles: &[CandidateProfileRow],
    candidate_id: Uuid,
    version: i32,
) -> Result<&CandidateProfileRow, AppError> {
    profiles
        .iter()
        .find(|p| p.version == version)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Candidate {candidate_id} has no profile version {version}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn row(version: i32) -> CandidateProfileRow {
        CandidateProfileRow {
            id: Uuid::new_v4(),
            candidate_id: Uuid::nil(),
            job_id: None,
            version,
            stage: "resume".to_string(),
            profile_data: json!({}),
            overall_score: None,
            data_sources: None,
            gaps: None,
            strengths: None,
            concerns: None,
            ai_summary: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_find_version_matches_on_version_not_position() {
        let profiles = vec![row(2), row(1)];
        assert_eq!(find_version(&profiles, Uuid::nil(), 1).unwrap().version, 1);
    }

    #[test]
    fn test_missing_version_is_not_found() {
        let err = find_version(&[row(1)], Uuid::nil(), 7).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
