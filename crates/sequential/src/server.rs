//! HTTP surface of the recommender service

use crate::lifecycle::LifecyclePhase;
use crate::recommender::Recommender;
use actix_web::{web, HttpResponse, Responder};
use movierec_core::{ItemId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub recommender: Arc<Recommender>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    service: String,
    version: String,
    model: LifecyclePhase,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub count: Option<i64>,
    pub exclude_watched: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryRecommendationRequest {
    pub history: Vec<ItemId>,
    pub count: Option<i64>,
    pub exclude_watched: Option<bool>,
}

async fn health(data: web::Data<AppState>) -> impl Responder {
    let phase = data.recommender.lifecycle().phase();
    let status = match phase {
        LifecyclePhase::Ready => "healthy",
        _ => "degraded",
    };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        service: "recommender-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: phase,
    })
}

async fn model_status(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.recommender.lifecycle().status())
}

async fn reload_model(data: web::Data<AppState>) -> impl Responder {
    let lifecycle = data.recommender.lifecycle();
    match lifecycle.acquire(true).await {
        Some(_) => HttpResponse::Ok().json(lifecycle.status()),
        None => HttpResponse::ServiceUnavailable().json(lifecycle.status()),
    }
}

async fn user_recommendations(
    data: web::Data<AppState>,
    path: web::Path<UserId>,
    query: web::Query<RecommendationQuery>,
) -> impl Responder {
    let user_id = path.into_inner();
    let count = data.recommender.normalize_count(query.count);
    let exclude_watched = query.exclude_watched.unwrap_or(true);

    let recommendations = data
        .recommender
        .recommend_for_user(user_id, exclude_watched, count)
        .await;

    HttpResponse::Ok().json(json!({
        "user_id": user_id,
        "recommendations": recommendations,
    }))
}

async fn history_recommendations(
    data: web::Data<AppState>,
    payload: web::Json<HistoryRecommendationRequest>,
) -> impl Responder {
    let request = payload.into_inner();
    let count = data.recommender.normalize_count(request.count);
    let exclude_watched = request.exclude_watched.unwrap_or(true);

    let recommendations = data
        .recommender
        .recommend(&request.history, exclude_watched, count)
        .await;

    HttpResponse::Ok().json(json!({
        "recommendations": recommendations,
    }))
}

/// Configure application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/api/v1")
            .route("/model/status", web::get().to(model_status))
            .route("/model/reload", web::post().to(reload_model))
            .route("/recommendations", web::post().to(history_recommendations))
            .route(
                "/recommendations/{user_id}",
                web::get().to(user_recommendations),
            ),
    );
}
