use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted, immutable snapshot of a candidate's evaluation state.
///
/// `profile_data` is kept as raw JSON here and validated into
/// `profiles::models::ProfileData` wherever it is consumed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfileRow {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub job_id: Option<Uuid>,
    pub version: i32,
    pub stage: String,
    pub profile_data: Value,
    pub overall_score: Option<f64>,
    pub data_sources: Option<Vec<String>>,
    pub gaps: Option<Vec<String>>,
    pub strengths: Option<Vec<String>>,
    pub concerns: Option<Vec<String>>,
    pub ai_summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
