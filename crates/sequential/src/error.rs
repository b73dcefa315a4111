//! Error types for the sequential recommender
//!
//! Serving-side errors (`LoadError`, `InferError`) never cross the public
//! recommendation entry point; they are logged and degrade to "no
//! recommendations". Training errors abort the current run only.

use movierec_core::ItemId;
use std::path::PathBuf;
use thiserror::Error;

/// Failures inside the retrieval model itself
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model was used before `build()` initialised its weights
    #[error("Model used before build: {0} is not initialized")]
    NotBuilt(&'static str),

    /// Context or label referenced an id outside the embedding tables
    #[error("Item id {item_id} exceeds vocabulary size {vocabulary_size}")]
    ItemOutOfVocabulary {
        item_id: ItemId,
        vocabulary_size: u32,
    },

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Empty batch")]
    EmptyBatch,

    #[error("Non-finite loss {0} encountered during training")]
    Diverged(f32),
}

/// Failures loading a model artifact into the lifecycle cache
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Model artifact not found at {0}")]
    Missing(PathBuf),

    #[error("Model artifact at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Model artifact at {path} has inconsistent shapes: {source}")]
    Shape {
        path: PathBuf,
        #[source]
        source: ModelError,
    },

    #[error("Warm-up forward pass failed: {0}")]
    WarmUp(#[source] ModelError),

    #[error("Failed to build item detail cache: {0}")]
    Catalog(#[source] anyhow::Error),

    #[error("I/O error reading model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model loader task failed: {0}")]
    Worker(String),
}

/// Failures during a single inference request
#[derive(Debug, Error)]
pub enum InferError {
    #[error("Prediction failed: {0}")]
    Model(#[from] ModelError),

    #[error("Prediction task failed: {0}")]
    Worker(String),
}

/// Failures that abort a training run. The previously deployed artifact is
/// left untouched in every case.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Failed to read from store: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Insufficient training data: {0}")]
    InsufficientData(String),

    #[error("Cannot determine vocabulary size: no item ids in catalog or training data")]
    VocabularyUnknown,

    #[error("Model error during training: {0}")]
    Model(#[from] ModelError),

    #[error("Failed to persist model artifact to {path}: {reason}")]
    Artifact { path: PathBuf, reason: String },

    #[error("Training worker failed: {0}")]
    Worker(String),
}

pub type ModelResult<T> = std::result::Result<T, ModelError>;
