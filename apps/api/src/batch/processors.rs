//! The two batch workloads: profile generation per candidate and resume ingestion per file.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::batch::orchestrator::ItemProcessor;
use crate::candidates::ingest::{ResumeIngestor, ResumeUpload};
use crate::errors::AppError;
use crate::profiles::builder::{BuildProfileRequest, BuiltProfile, ProfileBuilder};

pub struct ProfileBuildProcessor {
    builder: Arc<ProfileBuilder>,
    request: BuildProfileRequest,
}

impl ProfileBuildProcessor {
    pub fn new(builder: Arc<ProfileBuilder>, job_id: Option<Uuid>) -> Self {
        Self {
            builder,
            request: BuildProfileRequest {
                job_id,
                stage: None,
                notes: None,
            },
        }
    }
}

#[async_trait]
impl ItemProcessor<Uuid> for ProfileBuildProcessor {
    type Output = BuiltProfile;
    type Error = AppError;

    fn describe(&self, candidate_id: &Uuid) -> String {
        candidate_id.to_string()
    }

    async fn process(&self, candidate_id: &Uuid) -> Result<BuiltProfile, AppError> {
        self.builder.build(*candidate_id, &self.request).await
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedCandidate {
    pub candidate_id: Uuid,
    pub name: String,
    pub email: Option<String>,
}

pub struct ResumeIngestProcessor {
    ingestor: Arc<ResumeIngestor>,
}

impl ResumeIngestProcessor {
    pub fn new(ingestor: Arc<ResumeIngestor>) -> Self {
        Self { ingestor }
    }
}

#[async_trait]
impl ItemProcessor<ResumeUpload> for ResumeIngestProcessor {
    type Output = IngestedCandidate;
    type Error = AppError;

    fn describe(&self, upload: &ResumeUpload) -> String {
        upload.file_name.clone()
    }

    async fn process(&self, upload: &ResumeUpload) -> Result<IngestedCandidate, AppError> {
        let row = self.ingestor.ingest(upload).await?;
        Ok(IngestedCandidate {
            candidate_id: row.id,
            name: row.name,
            email: row.email,
        })
    }
}
