//! Profile Store: append-only, versioned candidate profile snapshots.
//!
//! Versions are assigned by the store, never by callers: the Postgres
//! implementation computes `MAX(version) + 1` inside the INSERT itself and
//! relies on the `(candidate_id, version)` unique constraint to detect races.
//! A race surfaces as `ProfileStoreError::Conflict`; `create_profile_with_retry`
//! re-runs the whole create against fresh state.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::profile::CandidateProfileRow;

/// Attempts made by `create_profile_with_retry` before a conflict is surfaced.
pub const MAX_VERSION_CONFLICT_RETRIES: u32 = 5;
const CONFLICT_BACKOFF_MS: u64 = 20;

#[derive(Debug, Error)]
pub enum ProfileStoreError {
    #[error("version conflict creating profile for candidate {candidate_id}")]
    Conflict { candidate_id: Uuid },

    #[error("profile {0} not found")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Everything needed to mint a new profile version. Callers never choose the version.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub candidate_id: Uuid,
    pub job_id: Option<Uuid>,
    pub stage: String,
    pub profile_data: Value,
    pub overall_score: Option<f64>,
    pub data_sources: Option<Vec<String>>,
    pub gaps: Option<Vec<String>>,
    pub strengths: Option<Vec<String>>,
    pub concerns: Option<Vec<String>>,
    pub ai_summary: String,
}

/// Carried in `AppState` as `Arc<dyn ProfileStore>`.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Inserts a new snapshot with `version = max(existing) + 1`.
    async fn create_profile(
        &self,
        profile: &NewProfile,
    ) -> Result<CandidateProfileRow, ProfileStoreError>;

    /// All versions for a candidate, in no particular order.
    async fn list_profiles(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<CandidateProfileRow>, ProfileStoreError>;

    async fn get_profile(&self, id: Uuid) -> Result<CandidateProfileRow, ProfileStoreError>;

    async fn latest_profile(
        &self,
        candidate_id: Uuid,
    ) -> Result<Option<CandidateProfileRow>, ProfileStoreError> {
        Ok(self
            .list_profiles(candidate_id)
            .await?
            .into_iter()
            .max_by_key(|p| p.version))
    }
}

/// Creates a profile, retrying the read-max-then-insert sequence on version conflicts.
pub async fn create_profile_with_retry(
    store: &dyn ProfileStore,
    profile: &NewProfile,
) -> Result<CandidateProfileRow, ProfileStoreError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.create_profile(profile).await {
            Err(ProfileStoreError::Conflict { candidate_id })
                if attempt < MAX_VERSION_CONFLICT_RETRIES =>
            {
                warn!(
                    %candidate_id,
                    attempt, "Profile version conflict, retrying create"
                );
                tokio::time::sleep(Duration::from_millis(CONFLICT_BACKOFF_MS * attempt as u64))
                    .await;
            }
            other => return other,
        }
    }
}

pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn create_profile(
        &self,
        profile: &NewProfile,
    ) -> Result<CandidateProfileRow, ProfileStoreError> {
        // Single statement: the next version is computed and inserted atomically
        // with respect to the unique constraint.
        let result = sqlx::query_as::<_, CandidateProfileRow>(
            r#"
            INSERT INTO candidate_profiles
                (id, candidate_id, job_id, version, stage, profile_data, overall_score,
                 data_sources, gaps, strengths, concerns, ai_summary)
            SELECT $1, $2, $3, COALESCE(MAX(version), 0) + 1, $4, $5, $6, $7, $8, $9, $10, $11
            FROM candidate_profiles
            WHERE candidate_id = $2
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(profile.candidate_id)
        .bind(profile.job_id)
        .bind(&profile.stage)
        .bind(&profile.profile_data)
        .bind(profile.overall_score)
        .bind(&profile.data_sources)
        .bind(&profile.gaps)
        .bind(&profile.strengths)
        .bind(&profile.concerns)
        .bind(&profile.ai_summary)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                info!(
                    "Inserted profile {} version {} for candidate {}",
                    row.id, row.version, row.candidate_id
                );
                Ok(row)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ProfileStoreError::Conflict {
                    candidate_id: profile.candidate_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_profiles(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<CandidateProfileRow>, ProfileStoreError> {
        Ok(sqlx::query_as::<_, CandidateProfileRow>(
            "SELECT * FROM candidate_profiles WHERE candidate_id = $1",
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_profile(&self, id: Uuid) -> Result<CandidateProfileRow, ProfileStoreError> {
        sqlx::query_as::<_, CandidateProfileRow>("SELECT * FROM candidate_profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ProfileStoreError::NotFound(id))
    }

    async fn latest_profile(
        &self,
        candidate_id: Uuid,
    ) -> Result<Option<CandidateProfileRow>, ProfileStoreError> {
        Ok(sqlx::query_as::<_, CandidateProfileRow>(
            "SELECT * FROM candidate_profiles WHERE candidate_id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}
