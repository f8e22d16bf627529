//! Profile Builder: analyses a candidate and mints the next profile version.
//!
//! The analysis backend is pluggable (`ProfileAnalyzer`); the default calls
//! the LLM. Whatever the backend returns is validated against `ProfileData`
//! before anything is written, so the store only ever holds parseable payloads.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::candidates::records::get_candidate;
use crate::errors::AppError;
use crate::jobs::get_job;
use crate::llm_client::prompts::{fill_template, EVIDENCE_INSTRUCTION};
use crate::llm_client::{LlmClient, LlmTask};
use crate::models::candidate::{CandidateRow, JobRow};
use crate::models::profile::CandidateProfileRow;
use crate::profiles::compare::json_strings;
use crate::profiles::models::ProfileData;
use crate::profiles::prompts::{PROFILE_ANALYSIS_PROMPT, PROFILE_ANALYSIS_SYSTEM};
use crate::profiles::score::read_json_score;
use crate::profiles::store::{create_profile_with_retry, NewProfile, ProfileStore};

/// Stage recorded for a candidate's first profile.
pub const INITIAL_STAGE: &str = "resume";

/// Everything the analyzer sees for one build.
pub struct AnalysisRequest<'a> {
    pub candidate: &'a CandidateRow,
    pub job: Option<&'a JobRow>,
    pub previous: Option<&'a CandidateProfileRow>,
    pub notes: Option<&'a str>,
}

/// Raw analyzer output. Scores and lists stay as `Value` and are read leniently;
/// `profile_data` is validated before it is stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAnalysis {
    pub profile_data: Value,
    #[serde(default)]
    pub overall_score: Value,
    #[serde(default)]
    pub strengths: Value,
    #[serde(default)]
    pub concerns: Value,
    #[serde(default)]
    pub gaps: Value,
    #[serde(default)]
    pub summary: String,
}

/// Carried in `AppState` behind `ProfileBuilder`.
#[async_trait]
pub trait ProfileAnalyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<ProfileAnalysis, AppError>;
}

pub struct LlmProfileAnalyzer {
    llm: LlmClient,
}

impl LlmProfileAnalyzer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ProfileAnalyzer for LlmProfileAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<ProfileAnalysis, AppError> {
        let prompt = render_prompt(request);
        let system = format!("{PROFILE_ANALYSIS_SYSTEM}\n{EVIDENCE_INSTRUCTION}");
        self.llm
            .call_json(LlmTask::ProfileAnalysis, &prompt, &system)
            .await
            .map_err(|e| AppError::Llm(format!("Profile analysis failed: {e}")))
    }
}

fn render_prompt(request: &AnalysisRequest<'_>) -> String {
    let candidate = json!({
        "name": request.candidate.name,
        "skills": request.candidate.skills,
        "experienceYears": request.candidate.experience_years,
        "resume": request.candidate.resume_text,
    });
    let job = request
        .job
        .map(|j| {
            json!({
                "title": j.title,
                "description": j.description,
                "requirements": j.requirements,
            })
        })
        .unwrap_or(Value::Null);
    let previous = request
        .previous
        .map(|p| {
            json!({
                "version": p.version,
                "stage": p.stage,
                "profileData": p.profile_data,
                "overallScore": p.overall_score,
            })
        })
        .unwrap_or(Value::Null);

    let (candidate, job, previous) = (candidate.to_string(), job.to_string(), previous.to_string());
    fill_template(
        PROFILE_ANALYSIS_PROMPT,
        &[
            ("candidate", candidate.as_str()),
            ("job", job.as_str()),
            ("previous", previous.as_str()),
            ("notes", request.notes.unwrap_or("")),
        ],
    )
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildProfileRequest {
    pub job_id: Option<Uuid>,
    /// Display label for the new version. Derived from the history when absent.
    pub stage: Option<String>,
    /// Interview notes or other new evidence for this stage.
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltProfile {
    pub profile_id: Uuid,
    pub candidate_id: Uuid,
    pub version: i32,
    pub stage: String,
    pub overall_score: f64,
}

/// Loads candidate and job records, then mints a profile version.
pub struct ProfileBuilder {
    db: PgPool,
    store: Arc<dyn ProfileStore>,
    analyzer: Arc<dyn ProfileAnalyzer>,
}

impl ProfileBuilder {
    pub fn new(db: PgPool, store: Arc<dyn ProfileStore>, analyzer: Arc<dyn ProfileAnalyzer>) -> Self {
        Self {
            db,
            store,
            analyzer,
        }
    }

    pub async fn build(
        &self,
        candidate_id: Uuid,
        request: &BuildProfileRequest,
    ) -> Result<BuiltProfile, AppError> {
        let candidate = get_candidate(&self.db, candidate_id).await?;
        let job = match request.job_id {
            Some(job_id) => Some(get_job(&self.db, job_id).await?),
            None => None,
        };
        mint_profile(
            self.store.as_ref(),
            self.analyzer.as_ref(),
            &candidate,
            job.as_ref(),
            request,
        )
        .await
    }
}

/// Runs the analyzer against the latest version and stores the result as the next one.
pub async fn mint_profile(
    store: &dyn ProfileStore,
    analyzer: &dyn ProfileAnalyzer,
    candidate: &CandidateRow,
    job: Option<&JobRow>,
    request: &BuildProfileRequest,
) -> Result<BuiltProfile, AppError> {
    let previous = store.latest_profile(candidate.id).await?;
    let notes = request.notes.as_deref().filter(|n| !n.trim().is_empty());

    let analysis = analyzer
        .analyze(&AnalysisRequest {
            candidate,
            job,
            previous: previous.as_ref(),
            notes,
        })
        .await?;

    ProfileData::parse(&analysis.profile_data).map_err(|e| {
        AppError::Llm(format!(
            "Analysis for candidate {} returned invalid profile data: {e}",
            candidate.id
        ))
    })?;

    let score = read_json_score(&analysis.overall_score);
    if !score.valid {
        warn!(
            candidate_id = %candidate.id,
            "Analysis returned an unusable overall score, storing 0"
        );
    }

    let stage = request
        .stage
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| default_stage(previous.as_ref()));

    let new_profile = NewProfile {
        candidate_id: candidate.id,
        job_id: job.map(|j| j.id),
        data_sources: Some(data_sources(previous.as_ref(), &stage, notes.is_some())),
        stage,
        profile_data: analysis.profile_data,
        overall_score: Some(score.value),
        gaps: Some(json_strings(&analysis.gaps)),
        strengths: Some(json_strings(&analysis.strengths)),
        concerns: Some(json_strings(&analysis.concerns)),
        ai_summary: analysis.summary,
    };

    let row = create_profile_with_retry(store, &new_profile).await?;
    info!(
        "Built profile version {} ({}) for candidate {}",
        row.version, row.stage, row.candidate_id
    );

    Ok(BuiltProfile {
        profile_id: row.id,
        candidate_id: row.candidate_id,
        version: row.version,
        overall_score: score.value,
        stage: row.stage,
    })
}

/// `resume` for a first version, `after_interview_N` after the N-th version.
pub fn default_stage(previous: Option<&CandidateProfileRow>) -> String {
    match previous {
        None => INITIAL_STAGE.to_string(),
        Some(p) => format!("after_interview_{}", p.version),
    }
}

/// Sources accumulate across versions: the resume always, plus each stage that brought notes.
fn data_sources(previous: Option<&CandidateProfileRow>, stage: &str, has_notes: bool) -> Vec<String> {
    let mut sources = previous
        .and_then(|p| p.data_sources.clone())
        .unwrap_or_default();
    let mut push = |s: &str| {
        if !sources.iter().any(|x| x == s) {
            sources.push(s.to_string());
        }
    };
    push(INITIAL_STAGE);
    if has_notes {
        push(stage);
    }
    sources
}
