//! One-shot training run
//!
//! Reads ratings and the catalog from Postgres, fits a fresh model and
//! atomically replaces the artifact the recommender service watches. Exits
//! non-zero on failure; the previous artifact is left untouched.

use anyhow::Context;
use movierec_core::{
    init_logging, load_dotenv, ConfigLoader, DatabaseConfig, DatabasePool, LogConfig,
    RecommenderConfig,
};
use movierec_sequential::{
    PostgresCatalogStore, PostgresRatingStore, TrainingConfig, TrainingPipeline,
};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    load_dotenv();
    init_logging(&LogConfig::from_env("train-model"))?;

    let db_config = DatabaseConfig::from_env()?;
    db_config.validate()?;
    let rec_config = RecommenderConfig::from_env()?;
    rec_config.validate()?;

    let db = DatabasePool::new(&db_config)
        .await
        .context("Failed to connect to database")?;
    if !db.is_healthy().await {
        anyhow::bail!("Database did not answer a health probe");
    }

    let pipeline = TrainingPipeline::new(
        Arc::new(PostgresRatingStore::new(db.pool().clone())),
        Arc::new(PostgresCatalogStore::new(db.pool().clone())),
        TrainingConfig::from(&rec_config),
        rec_config.model_path.clone(),
    );

    match pipeline.run().await {
        Ok(report) => {
            tracing::info!(
                report = %serde_json::to_string(&report).unwrap_or_default(),
                "Training complete"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(error = %e, "Training failed; previous model artifact left in place");
            Ok(ExitCode::FAILURE)
        }
    }
}
