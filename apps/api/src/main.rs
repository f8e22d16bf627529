mod batch;
mod candidates;
mod config;
mod db;
mod errors;
mod jobs;
mod llm_client;
mod models;
mod profiles;
mod realtime;
mod routes;
mod state;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::batch::registry::{BatchRegistry, Retention};
use crate::candidates::ingest::ResumeIngestor;
use crate::candidates::storage::S3ResumeStorage;
use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::{LlmClient, LlmSettings};
use crate::profiles::builder::{LlmProfileAnalyzer, ProfileBuilder};
use crate::profiles::store::{PgProfileStore, ProfileStore};
use crate::realtime::RealtimeHub;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Talent API v{}", env!("CARGO_PKG_VERSION"));

    let db = create_pool(&config.database_url).await?;

    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    let llm_settings = LlmSettings::from_config(&config);
    info!(
        "LLM client initialized (model: {}, {} attempts per call)",
        llm_client::MODEL,
        llm_settings.max_attempts
    );
    let llm = LlmClient::new(config.anthropic_api_key.clone(), llm_settings)?;

    let profiles: Arc<dyn ProfileStore> = Arc::new(PgProfileStore::new(db.clone()));
    let builder = Arc::new(ProfileBuilder::new(
        db.clone(),
        Arc::clone(&profiles),
        Arc::new(LlmProfileAnalyzer::new(llm.clone())),
    ));
    let ingestor = Arc::new(ResumeIngestor::new(
        db.clone(),
        Arc::new(S3ResumeStorage::new(s3, config.s3_bucket.clone())),
        llm,
    ));

    let hub = RealtimeHub::new();
    let batches = BatchRegistry::new(
        hub.clone(),
        Retention {
            ttl: Duration::from_secs(config.batch_retention_secs),
            max_finished: config.batch_max_finished,
        },
    );
    info!(
        "Batch concurrency: default {}, max {}; finished batches kept {}s (at most {})",
        config.batch_default_concurrency,
        config.batch_max_concurrency,
        config.batch_retention_secs,
        config.batch_max_finished
    );

    let state = AppState {
        db,
        config: config.clone(),
        profiles,
        builder,
        ingestor,
        batches,
        hub,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "talent-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}
