//! Recommendation entry point
//!
//! Never fails towards the caller: every problem (no model, store outage,
//! prediction error) is logged and yields an empty list.

use crate::assembler::RecommendationAssembler;
use crate::error::InferError;
use crate::lifecycle::{LoadedModel, ModelLifecycle};
use crate::store::RatingStore;
use crate::types::Recommendation;
use crate::windowing::SequenceWindower;
use movierec_core::{ItemId, RecommenderConfig, UserId, PADDING_ITEM_ID};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

pub struct Recommender {
    lifecycle: Arc<ModelLifecycle>,
    ratings: Arc<dyn RatingStore>,
    windower: SequenceWindower,
    retrieval_k: usize,
    default_count: usize,
    max_count: usize,
}

impl Recommender {
    pub fn new(
        lifecycle: Arc<ModelLifecycle>,
        ratings: Arc<dyn RatingStore>,
        config: &RecommenderConfig,
    ) -> Self {
        Self {
            lifecycle,
            ratings,
            windower: SequenceWindower::new(config.max_context_length, config.min_sequence_length),
            retrieval_k: config.retrieval_k,
            default_count: config.default_count,
            max_count: config.max_count,
        }
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycle> {
        &self.lifecycle
    }

    /// Clamp a requested count: missing, non-positive or above the maximum
    /// falls back to the default.
    pub fn normalize_count(&self, requested: Option<i64>) -> usize {
        match requested {
            Some(n) if n > 0 && n as u64 <= self.max_count as u64 => n as usize,
            _ => self.default_count,
        }
    }

    /// Recommend up to `count` movies following a chronological history
    pub async fn recommend(
        &self,
        history: &[ItemId],
        exclude_watched: bool,
        count: usize,
    ) -> Vec<Recommendation> {
        if history.is_empty() || count == 0 {
            return Vec::new();
        }

        let Some(loaded) = self.lifecycle.acquire(false).await else {
            tracing::warn!("No model available; returning no recommendations");
            return Vec::new();
        };

        let seen: HashSet<ItemId> = history.iter().copied().collect();
        let start = Instant::now();

        // room for every exclusion plus the padding id
        let wanted = count.saturating_add(seen.len()).saturating_add(1);
        let ranked = match self.predict(&loaded, history, wanted).await {
            Ok(ranked) => ranked,
            Err(e) => {
                tracing::error!(error = %e, "Prediction failed");
                return Vec::new();
            }
        };

        let recommendations = RecommendationAssembler::execute(
            ranked,
            &seen,
            exclude_watched,
            count,
            &loaded.details,
        );

        tracing::debug!(
            history_len = history.len(),
            returned = recommendations.len(),
            latency_us = start.elapsed().as_micros() as u64,
            "Generated recommendations"
        );

        recommendations
    }

    /// Recommend for a stored user from their most recent ratings
    pub async fn recommend_for_user(
        &self,
        user_id: UserId,
        exclude_watched: bool,
        count: usize,
    ) -> Vec<Recommendation> {
        let limit = self.windower.max_context_length() * 2;
        let mut recent = match self.ratings.recent_ratings_for_user(user_id, limit).await {
            Ok(recent) => recent,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Failed to fetch user history");
                return Vec::new();
            }
        };

        if recent.is_empty() {
            tracing::info!(user_id, "User has no rating history");
            return Vec::new();
        }

        // store returns newest first
        recent.reverse();
        let history: Vec<ItemId> = recent.iter().map(|r| r.item_id).collect();

        self.recommend(&history, exclude_watched, count).await
    }

    /// Ranked candidate ids for a history; `wanted` is the number of usable
    /// ids the caller needs after filtering. Empty when no history item is
    /// known to the model.
    async fn predict(
        &self,
        loaded: &Arc<LoadedModel>,
        history: &[ItemId],
        wanted: usize,
    ) -> Result<Vec<ItemId>, InferError> {
        let vocabulary_size = loaded.vocabulary_size;

        // Movies added after training have no embedding; leave them out of the context.
        let known: Vec<ItemId> = history
            .iter()
            .copied()
            .filter(|&id| id != PADDING_ITEM_ID && id <= vocabulary_size)
            .collect();
        if known.is_empty() {
            tracing::warn!(
                history_len = history.len(),
                vocabulary_size,
                "No history item is known to the model; returning no recommendations"
            );
            return Ok(Vec::new());
        }
        if known.len() < history.len() {
            tracing::warn!(
                dropped = history.len() - known.len(),
                vocabulary_size,
                "History contains ids unknown to the model"
            );
        }

        let context = self.windower.prediction_context(&known);
        let k = self
            .retrieval_k
            .max(wanted)
            .min(vocabulary_size as usize + 1);

        let model = Arc::clone(&loaded.model);
        let scored = tokio::task::spawn_blocking(move || model.infer(&context, k))
            .await
            .map_err(|e| InferError::Worker(e.to_string()))??;

        Ok(scored.into_iter().map(|s| s.item_id).collect())
    }
}
