//! Resume ingestion: text extraction, LLM parsing, object storage, candidate insert.
//!
//! Shared by the single-file upload endpoint and the bulk upload batch.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Multipart;
use bytes::Bytes;
use serde::Deserialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::candidates::prompts::{RESUME_PARSE_PROMPT, RESUME_PARSE_SYSTEM};
use crate::candidates::records::{insert_candidate, NewCandidate};
use crate::candidates::storage::{store_then_record, ResumeStorage};
use crate::errors::AppError;
use crate::llm_client::prompts::fill_template;
use crate::llm_client::{LlmClient, LlmTask};
use crate::models::candidate::CandidateRow;

/// One uploaded resume file, held in memory.
#[derive(Debug, Clone)]
pub struct ResumeUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl ResumeUpload {
    fn is_pdf(&self) -> bool {
        self.content_type.as_deref() == Some("application/pdf")
            || self.file_name.to_ascii_lowercase().ends_with(".pdf")
            || self.bytes.starts_with(b"%PDF")
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file '{0}' is empty")]
    Empty(String),

    #[error("could not read PDF '{file}': {reason}")]
    Pdf { file: String, reason: String },

    #[error("file '{0}' is neither a PDF nor UTF-8 text")]
    NotText(String),

    #[error("file '{0}' contains no extractable text")]
    NoText(String),
}

/// Plain text of a resume: `pdf-extract` for PDFs, UTF-8 decoding otherwise.
pub fn extract_text(upload: &ResumeUpload) -> Result<String, ExtractError> {
    if upload.bytes.is_empty() {
        return Err(ExtractError::Empty(upload.file_name.clone()));
    }
    let text = if upload.is_pdf() {
        pdf_extract::extract_text_from_mem(&upload.bytes).map_err(|e| ExtractError::Pdf {
            file: upload.file_name.clone(),
            reason: e.to_string(),
        })?
    } else {
        String::from_utf8(upload.bytes.to_vec())
            .map_err(|_| ExtractError::NotText(upload.file_name.clone()))?
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ExtractError::NoText(upload.file_name.clone()));
    }
    Ok(text)
}

/// Candidate fields as returned by the model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResume {
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub experience_years: Option<f64>,
}

impl ParsedResume {
    /// Trims fields, drops blank and duplicate skills (case-insensitive, first
    /// spelling wins), discards impossible experience values and falls back to
    /// the file stem when no name was found.
    pub fn normalize(self, file_name: &str) -> Self {
        let non_blank = |s: Option<String>| {
            s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };

        let mut seen = std::collections::HashSet::new();
        let skills = self
            .skills
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
            .collect();

        let name = match self.name.trim() {
            "" => file_stem(file_name).to_string(),
            n => n.to_string(),
        };

        Self {
            name,
            email: non_blank(self.email),
            phone: non_blank(self.phone),
            skills,
            experience_years: self
                .experience_years
                .filter(|y| y.is_finite() && *y >= 0.0),
        }
    }
}

fn file_stem(file_name: &str) -> &str {
    let base = base_name(file_name);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}

fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("resume")
}

/// Object key for an original resume file.
pub fn resume_key(candidate_id: Uuid, file_name: &str) -> String {
    format!("resumes/{}/{}", candidate_id, base_name(file_name))
}

/// Everything needed to turn an uploaded file into a candidate record.
pub struct ResumeIngestor {
    db: PgPool,
    storage: Arc<dyn ResumeStorage>,
    llm: LlmClient,
}

impl ResumeIngestor {
    pub fn new(db: PgPool, storage: Arc<dyn ResumeStorage>, llm: LlmClient) -> Self {
        Self { db, storage, llm }
    }

    pub async fn ingest(&self, upload: &ResumeUpload) -> Result<CandidateRow, AppError> {
        let text = {
            let upload = upload.clone();
            tokio::task::spawn_blocking(move || extract_text(&upload))
                .await
                .map_err(|e| anyhow::anyhow!("text extraction task failed: {e}"))?
                .map_err(|e| AppError::Validation(e.to_string()))?
        };

        let prompt = fill_template(RESUME_PARSE_PROMPT, &[("resume_text", text.as_str())]);
        let parsed: ParsedResume = self
            .llm
            .call_json(LlmTask::ResumeParse, &prompt, RESUME_PARSE_SYSTEM)
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse resume: {e}")))?;
        let parsed = parsed.normalize(&upload.file_name);
        if parsed.email.is_none() {
            warn!("No email found in resume '{}'", upload.file_name);
        }

        let candidate_id = Uuid::new_v4();
        let s3_key = resume_key(candidate_id, &upload.file_name);
        let record = insert_candidate(
            &self.db,
            NewCandidate {
                id: candidate_id,
                name: &parsed.name,
                email: parsed.email.as_deref(),
                phone: parsed.phone.as_deref(),
                skills: &parsed.skills,
                experience_years: parsed.experience_years,
                resume_text: &text,
                resume_s3_key: Some(&s3_key),
            },
        );
        let row = store_then_record(self.storage.as_ref(), &s3_key, upload, record).await?;
        info!("Created candidate {} ({}) from '{}'", row.id, row.name, upload.file_name);
        Ok(row)
    }
}

/// A parsed multipart form: text fields by name plus every `file` part.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<ResumeUpload>,
}

pub async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(String::from);
        let content_type = field.content_type().map(String::from);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read field '{name}': {e}")))?;

        if name == "file" {
            form.files.push(ResumeUpload {
                file_name: file_name.unwrap_or_else(|| format!("resume-{}", form.files.len() + 1)),
                content_type,
                bytes,
            });
        } else {
            let value = String::from_utf8(bytes.to_vec())
                .map_err(|_| AppError::Validation(format!("Field '{name}' is not UTF-8")))?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}
