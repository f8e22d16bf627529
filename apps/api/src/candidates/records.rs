use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::candidate::CandidateRow;

/// Fields for a new candidate record. The id is chosen by the caller so the
/// original file can be stored under it before the row exists.
pub struct NewCandidate<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub skills: &'a [String],
    pub experience_years: Option<f64>,
    pub resume_text: &'a str,
    pub resume_s3_key: Option<&'a str>,
}

pub async fn insert_candidate(
    pool: &PgPool,
    candidate: NewCandidate<'_>,
) -> Result<CandidateRow, AppError> {
    let row = sqlx::query_as::<_, CandidateRow>(
        r#"
        INSERT INTO candidates
            (id, name, email, phone, skills, experience_years, resume_text, resume_s3_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(candidate.id)
    .bind(candidate.name)
    .bind(candidate.email)
    .bind(candidate.phone)
    .bind(candidate.skills)
    .bind(candidate.experience_years)
    .bind(candidate.resume_text)
    .bind(candidate.resume_s3_key)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_candidate(pool: &PgPool, id: Uuid) -> Result<CandidateRow, AppError> {
    sqlx::query_as::<_, CandidateRow>("SELECT * FROM candidates WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Candidate {id} not found")))
}
