//! Offline training pipeline
//!
//! ratings ─filter─> sequences ─window─> examples ─shuffle/split─> fit ─> artifact
//!
//! Any failure aborts the run before the artifact is written, so the model
//! currently being served stays in place.

use crate::artifact;
use crate::error::{ModelError, TrainingError};
use crate::model::SequentialRetrievalModel;
use crate::optimizer::{AdamW, DEFAULT_WEIGHT_DECAY};
use crate::store::{CatalogStore, RatingStore};
use crate::types::TrainingExample;
use crate::windowing::SequenceWindower;
use movierec_core::{ItemId, RatingEvent, RecommenderConfig};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Cutoff for the retrieval accuracy reported on the validation split
pub const EVAL_TOP_K: usize = 10;

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub min_rating: f32,
    pub max_context_length: usize,
    pub min_sequence_length: usize,
    pub embedding_dim: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub train_fraction: f32,
    pub eval_top_k: usize,
    pub seed: Option<u64>,
}

impl From<&RecommenderConfig> for TrainingConfig {
    fn from(config: &RecommenderConfig) -> Self {
        Self {
            min_rating: config.min_rating,
            max_context_length: config.max_context_length,
            min_sequence_length: config.min_sequence_length,
            embedding_dim: config.embedding_dim,
            batch_size: config.batch_size,
            epochs: config.epochs,
            learning_rate: config.learning_rate,
            weight_decay: DEFAULT_WEIGHT_DECAY,
            train_fraction: config.train_fraction,
            eval_top_k: EVAL_TOP_K,
            seed: config.seed,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::from(&RecommenderConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub validation_loss: Option<f32>,
    pub validation_hit_rate: Option<f32>,
}

/// Summary of a successful training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub ratings: usize,
    pub users: usize,
    pub examples: usize,
    pub train_examples: usize,
    pub validation_examples: usize,
    pub vocabulary_size: u32,
    pub epochs: Vec<EpochMetrics>,
    pub artifact_path: PathBuf,
    pub duration_ms: u64,
}

pub struct TrainingPipeline {
    ratings: Arc<dyn RatingStore>,
    catalog: Arc<dyn CatalogStore>,
    config: TrainingConfig,
    artifact_path: PathBuf,
}

impl TrainingPipeline {
    pub fn new(
        ratings: Arc<dyn RatingStore>,
        catalog: Arc<dyn CatalogStore>,
        config: TrainingConfig,
        artifact_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ratings,
            catalog,
            config,
            artifact_path: artifact_path.into(),
        }
    }

    /// Run the pipeline and report whether a new artifact was written
    pub async fn train(&self) -> bool {
        match self.run().await {
            Ok(report) => {
                tracing::info!(
                    examples = report.examples,
                    vocabulary_size = report.vocabulary_size,
                    duration_ms = report.duration_ms,
                    path = %report.artifact_path.display(),
                    "Training run succeeded"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Training run failed; existing model artifact left in place"
                );
                false
            }
        }
    }

    pub async fn run(&self) -> Result<TrainingReport, TrainingError> {
        let start = Instant::now();
        let config = self.config.clone();
        tracing::info!(
            min_rating = config.min_rating,
            epochs = config.epochs,
            batch_size = config.batch_size,
            "Starting training run"
        );

        let ratings: Vec<RatingEvent> = self
            .ratings
            .ratings_for_training(config.min_rating)
            .await
            .map_err(TrainingError::Store)?
            .into_iter()
            .filter(|r| r.rating >= config.min_rating)
            .collect();
        let rating_count = ratings.len();
        if ratings.is_empty() {
            return Err(TrainingError::InsufficientData(format!(
                "no ratings at or above {}",
                config.min_rating
            )));
        }

        let windower = SequenceWindower::new(config.max_context_length, config.min_sequence_length);
        let sequences = windower.group_user_sequences(ratings);
        if sequences.is_empty() {
            return Err(TrainingError::InsufficientData(
                "no user sequences could be built".to_string(),
            ));
        }

        let mut examples = windower.generate_examples(sequences.values());
        if examples.is_empty() {
            return Err(TrainingError::InsufficientData(format!(
                "no user has at least {} qualifying ratings",
                config.min_sequence_length
            )));
        }
        let example_count = examples.len();
        tracing::info!(
            ratings = rating_count,
            users = sequences.len(),
            examples = example_count,
            "Built training examples"
        );

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        examples.shuffle(&mut rng);

        let catalog_max = self
            .catalog
            .max_item_id()
            .await
            .map_err(TrainingError::Store)?;
        let vocabulary_size = vocabulary_size(catalog_max, &examples);
        if vocabulary_size == 0 {
            return Err(TrainingError::VocabularyUnknown);
        }

        let (train, validation) = split_examples(examples, config.train_fraction);
        if train.is_empty() {
            return Err(TrainingError::InsufficientData(
                "training split is empty".to_string(),
            ));
        }
        if validation.is_empty() {
            tracing::warn!("Validation split is empty; training without validation metrics");
        }
        let (train_count, validation_count) = (train.len(), validation.len());

        tracing::info!(
            vocabulary_size,
            train_examples = train_count,
            validation_examples = validation_count,
            "Fitting model"
        );

        let fit_config = config.clone();
        let (model, epochs) = tokio::task::spawn_blocking(move || {
            let mut train = train;
            let mut model =
                SequentialRetrievalModel::new(vocabulary_size, fit_config.embedding_dim);
            model.build(&mut rng);
            let epochs = fit(&mut model, &mut train, &validation, &fit_config, &mut rng)?;
            Ok::<_, ModelError>((model, epochs))
        })
        .await
        .map_err(|e| TrainingError::Worker(e.to_string()))??;

        let path = self.artifact_path.clone();
        let max_context_length = config.max_context_length;
        tokio::task::spawn_blocking(move || {
            artifact::save_model(&path, &model, max_context_length, example_count)
        })
        .await
        .map_err(|e| TrainingError::Worker(e.to_string()))??;

        Ok(TrainingReport {
            ratings: rating_count,
            users: sequences.len(),
            examples: example_count,
            train_examples: train_count,
            validation_examples: validation_count,
            vocabulary_size,
            epochs,
            artifact_path: self.artifact_path.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Split already-shuffled examples; the first `floor(len * train_fraction)`
/// go to training.
pub fn split_examples(
    examples: Vec<TrainingExample>,
    train_fraction: f32,
) -> (Vec<TrainingExample>, Vec<TrainingExample>) {
    let split = ((examples.len() as f64) * f64::from(train_fraction)) as usize;
    let mut train = examples;
    let validation = train.split_off(split.min(train.len()));
    (train, validation)
}

/// Largest id across the catalog and every example; embedding tables get
/// one more row than this.
pub fn vocabulary_size(catalog_max: Option<ItemId>, examples: &[TrainingExample]) -> u32 {
    examples
        .iter()
        .map(TrainingExample::max_item_id)
        .chain(catalog_max)
        .max()
        .unwrap_or(0)
}

/// Fit `model` for `config.epochs` epochs, reshuffling `train` every epoch
pub fn fit(
    model: &mut SequentialRetrievalModel,
    train: &mut [TrainingExample],
    validation: &[TrainingExample],
    config: &TrainingConfig,
    rng: &mut StdRng,
) -> Result<Vec<EpochMetrics>, ModelError> {
    let batch_size = config.batch_size.max(1);
    let mut optimizer = AdamW::new(config.learning_rate).weight_decay(config.weight_decay);
    let mut history = Vec::with_capacity(config.epochs);

    for epoch in 1..=config.epochs {
        let epoch_start = Instant::now();
        train.shuffle(rng);

        let mut weighted_loss = 0.0f64;
        for batch in train.chunks(batch_size) {
            let loss = model.train_step(batch, &mut optimizer)?;
            weighted_loss += f64::from(loss) * batch.len() as f64;
        }
        let train_loss = (weighted_loss / train.len().max(1) as f64) as f32;

        let (validation_loss, validation_hit_rate) = if validation.is_empty() {
            (None, None)
        } else {
            let mut weighted = 0.0f64;
            for batch in validation.chunks(batch_size) {
                weighted += f64::from(model.evaluate_loss(batch)?) * batch.len() as f64;
            }
            let loss = (weighted / validation.len() as f64) as f32;
            let hit_rate = model.hit_rate(validation, config.eval_top_k)?;
            (Some(loss), Some(hit_rate))
        };

        tracing::info!(
            epoch,
            epochs = config.epochs,
            train_loss,
            validation_loss = ?validation_loss,
            validation_hit_rate = ?validation_hit_rate,
            elapsed_ms = epoch_start.elapsed().as_millis() as u64,
            "Epoch complete"
        );

        history.push(EpochMetrics {
            epoch,
            train_loss,
            validation_loss,
            validation_hit_rate,
        });
    }

    Ok(history)
}
