pub mod handlers;

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::candidate::JobRow;

pub async fn insert_job(
    pool: &PgPool,
    title: &str,
    description: &str,
    requirements: &[String],
) -> Result<JobRow, AppError> {
    let row = sqlx::query_as::<_, JobRow>(
        "INSERT INTO jobs (id, title, description, requirements) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(title)
    .bind(description)
    .bind(requirements)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_job(pool: &PgPool, id: Uuid) -> Result<JobRow, AppError> {
    sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))
}
