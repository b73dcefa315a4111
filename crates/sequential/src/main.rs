//! Recommender service
//!
//! Port: 8082 (MOVIEREC_SERVICE_PORT)
//! Serves top-k next-movie recommendations from the trained model artifact and
//! reloads the model whenever the artifact file changes.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use movierec_core::{
    init_logging, load_dotenv, ConfigLoader, DatabaseConfig, DatabasePool, LogConfig,
    RecommenderConfig, ServiceConfig,
};
use movierec_sequential::{
    configure_routes, AppState, ModelLifecycle, PostgresCatalogStore, PostgresRatingStore,
    Recommender,
};
use std::sync::Arc;
use tracing::{info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_logging(&LogConfig::from_env("recommender-service"))?;

    let db_config = DatabaseConfig::from_env()?;
    db_config.validate()?;
    let service_config = ServiceConfig::from_env()?;
    service_config.validate()?;
    let rec_config = RecommenderConfig::from_env()?;
    rec_config.validate()?;

    info!(
        host = %service_config.host,
        port = service_config.port,
        model_path = %rec_config.model_path.display(),
        "Starting recommender service"
    );

    let db = DatabasePool::new(&db_config)
        .await
        .context("Failed to connect to database")?;
    let catalog = Arc::new(PostgresCatalogStore::new(db.pool().clone()));
    let ratings = Arc::new(PostgresRatingStore::new(db.pool().clone()));

    let lifecycle = Arc::new(ModelLifecycle::new(
        rec_config.model_path.clone(),
        rec_config.max_context_length,
        catalog,
    ));

    // Load eagerly so the first request does not pay for it
    if lifecycle.acquire(false).await.is_none() {
        warn!("No model available at startup; will retry on each request");
    }

    let recommender = Arc::new(Recommender::new(lifecycle, ratings, &rec_config));
    let state = web::Data::new(AppState { recommender });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .workers(service_config.workers)
    .bind((service_config.host.as_str(), service_config.port))?
    .run()
    .await?;

    info!("Recommender service stopped");
    Ok(())
}
