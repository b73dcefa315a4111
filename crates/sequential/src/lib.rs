//! Sequential movie recommender
//!
//! Learns next-movie prediction from each user's chronological rating history
//! and serves top-k recommendations from the trained model. Training runs
//! offline and writes a model artifact; the service watches that artifact and
//! reloads when it changes.

pub mod artifact;
pub mod assembler;
pub mod encoder;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod optimizer;
pub mod recommender;
pub mod server;
pub mod store;
pub mod training;
pub mod types;
pub mod windowing;

// Re-export key types
pub use artifact::{artifact_mtime, load_model, save_model, ArtifactMetadata};
pub use assembler::RecommendationAssembler;
pub use error::{InferError, LoadError, ModelError, TrainingError};
pub use lifecycle::{
    ArtifactModelLoader, LifecyclePhase, LoadedModel, ModelLifecycle, ModelLoader, ModelStatus,
};
pub use model::{RetrievalModel, SequentialRetrievalModel};
pub use optimizer::AdamW;
pub use recommender::Recommender;
pub use server::{configure_routes, AppState};
pub use store::{
    CatalogStore, InMemoryStore, PostgresCatalogStore, PostgresRatingStore, RatingStore,
};
pub use training::{EpochMetrics, TrainingConfig, TrainingPipeline, TrainingReport};
pub use types::*;
pub use windowing::SequenceWindower;

#[cfg(test)]
mod tests;
