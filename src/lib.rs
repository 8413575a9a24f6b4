pub mod config;
pub mod models;
pub mod db;
pub mod pipeline;

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, PipelineSettings};
use crate::db::DatabaseError;
use crate::pipeline::batch::SqlitePassRunner;
use crate::pipeline::ingress::TriggerIngress;
use crate::pipeline::scheduler::DebounceScheduler;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Trigger stream error: {0}")]
    Io(#[from] std::io::Error),
}

/// Worker entry point: one trigger message per stdin line until EOF.
pub async fn run() -> Result<(), WorkerError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} worker starting v{}", config::APP_NAME, config::APP_VERSION);

    let settings = PipelineSettings::from_env()?;
    tracing::info!(db = %settings.db_path.display(), mode = ?settings.debounce.mode, "Settings loaded");

    // Migrate before accepting triggers.
    db::sqlite::open_database(&settings.db_path)?;

    let runner = Arc::new(SqlitePassRunner::new(settings.clone()));
    let scheduler = DebounceScheduler::new(runner, settings.debounce.clone());
    let ingress = TriggerIngress::new(scheduler.clone());

    // Drain rows left pending by a previous run.
    scheduler.signal("startup").await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Err(e) = ingress.handle_message(&line).await {
            tracing::warn!(error = %e, "Trigger rejected");
        }
    }

    // Rows signalled just before EOF still get their pass.
    tracing::info!("Trigger stream closed, flushing scheduler");
    scheduler.flush().await;
    Ok(())
}
