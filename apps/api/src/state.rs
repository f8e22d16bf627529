use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::batch::registry::BatchRegistry;
use crate::candidates::ingest::ResumeIngestor;
use crate::config::Config;
use crate::profiles::builder::ProfileBuilder;
use crate::profiles::store::ProfileStore;
use crate::realtime::RealtimeHub;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Versioned profile snapshots. Default: `PgProfileStore`.
    pub profiles: Arc<dyn ProfileStore>,
    pub builder: Arc<ProfileBuilder>,
    pub ingestor: Arc<ResumeIngestor>,
    pub batches: BatchRegistry,
    pub hub: RealtimeHub,
}

impl FromRef<AppState> for RealtimeHub {
    fn from_ref(state: &AppState) -> Self {
        state.hub.clone()
    }
}
