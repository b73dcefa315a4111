//! Model lifecycle cache
//!
//! Owns the loaded model and its item detail cache, and reloads both when the
//! artifact on disk changes.
//!
//! State machine:
//! ```text
//! Unloaded ──acquire──> Loading ──ok──> Ready ──mtime newer / force──> Loading
//!                          │                                              │
//!                          └──err──> Unavailable <──────err───────────────┘
//! ```
//! `Unavailable` retries on every access. A missing artifact file clears the
//! cache even when a model was previously loaded.

use crate::artifact;
use crate::error::LoadError;
use crate::model::RetrievalModel;
use crate::store::CatalogStore;
use crate::types::ItemDetailCache;
use chrono::{DateTime, Utc};
use movierec_core::PADDING_ITEM_ID;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{watch, Mutex};

/// Produces a retrieval model from an artifact path
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn RetrievalModel>, LoadError>;
}

/// Loads the bincode artifact written by the training pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactModelLoader;

impl ModelLoader for ArtifactModelLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn RetrievalModel>, LoadError> {
        let (model, metadata) = artifact::load_model(path)?;
        tracing::info!(
            path = %path.display(),
            vocabulary_size = metadata.vocabulary_size,
            embedding_dim = metadata.embedding_dim,
            trained_at = %metadata.trained_at,
            "Read model artifact"
        );
        let model: Arc<dyn RetrievalModel> = Arc::new(model);
        Ok(model)
    }
}

/// A fully loaded model together with the detail cache built for it
pub struct LoadedModel {
    pub model: Arc<dyn RetrievalModel>,
    pub details: ItemDetailCache,
    pub vocabulary_size: u32,
    pub artifact_mtime: SystemTime,
    pub loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("vocabulary_size", &self.vocabulary_size)
            .field("catalog_items", &self.details.catalog_len())
            .field("artifact_mtime", &self.artifact_mtime)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Unloaded,
    Loading,
    Ready,
    Unavailable,
}

/// Snapshot of the lifecycle for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub phase: LifecyclePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocabulary_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_dim: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub loads: u64,
}

impl ModelStatus {
    fn unloaded() -> Self {
        Self {
            phase: LifecyclePhase::Unloaded,
            vocabulary_size: None,
            embedding_dim: None,
            catalog_items: None,
            loaded_at: None,
            last_error: None,
            loads: 0,
        }
    }
}

enum CacheState {
    Unloaded,
    Loading,
    Ready(Arc<LoadedModel>),
    Unavailable,
}

pub struct ModelLifecycle {
    artifact_path: PathBuf,
    warm_up_context_length: usize,
    loader: Arc<dyn ModelLoader>,
    catalog: Arc<dyn CatalogStore>,
    state: Mutex<CacheState>,
    status: watch::Sender<ModelStatus>,
    loads: AtomicU64,
}

impl ModelLifecycle {
    pub fn new(
        artifact_path: impl Into<PathBuf>,
        warm_up_context_length: usize,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        Self::with_loader(
            artifact_path,
            warm_up_context_length,
            catalog,
            Arc::new(ArtifactModelLoader),
        )
    }

    pub fn with_loader(
        artifact_path: impl Into<PathBuf>,
        warm_up_context_length: usize,
        catalog: Arc<dyn CatalogStore>,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        let (status, _) = watch::channel(ModelStatus::unloaded());
        Self {
            artifact_path: artifact_path.into(),
            warm_up_context_length,
            loader,
            catalog,
            state: Mutex::new(CacheState::Unloaded),
            status,
            loads: AtomicU64::new(0),
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.status.borrow().phase
    }

    pub fn status(&self) -> ModelStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<ModelStatus> {
        self.status.subscribe()
    }

    /// Return a ready model, loading or reloading it first if needed.
    ///
    /// `None` means no model is available; the reason has been logged.
    pub async fn acquire(&self, force: bool) -> Option<Arc<LoadedModel>> {
        let mut state = self.state.lock().await;

        let current_mtime = match artifact::artifact_mtime(&self.artifact_path).await {
            Ok(mtime) => mtime,
            Err(e) => {
                let was_ready = matches!(*state, CacheState::Ready(_));
                if e.kind() == std::io::ErrorKind::NotFound {
                    if was_ready {
                        tracing::warn!(
                            path = %self.artifact_path.display(),
                            "Model artifact disappeared; clearing loaded model"
                        );
                    } else {
                        tracing::warn!(
                            path = %self.artifact_path.display(),
                            "Model artifact not found"
                        );
                    }
                } else {
                    tracing::error!(
                        path = %self.artifact_path.display(),
                        error = %e,
                        "Failed to stat model artifact"
                    );
                }
                *state = CacheState::Unavailable;
                self.publish_unavailable(e.to_string());
                return None;
            }
        };

        if !force {
            if let CacheState::Ready(loaded) = &*state {
                if current_mtime <= loaded.artifact_mtime {
                    return Some(Arc::clone(loaded));
                }
                tracing::info!(
                    path = %self.artifact_path.display(),
                    "Model artifact changed on disk; reloading"
                );
            }
        }

        // Clear before loading; a failed reload must not leave the old model in place.
        *state = CacheState::Loading;
        self.status.send_modify(|s| {
            s.phase = LifecyclePhase::Loading;
        });

        match self.load_fresh(current_mtime).await {
            Ok(loaded) => {
                let loaded = Arc::new(loaded);
                let loads = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(
                    vocabulary_size = loaded.vocabulary_size,
                    catalog_items = loaded.details.catalog_len(),
                    loads,
                    "Model loaded and ready"
                );
                self.status.send_replace(ModelStatus {
                    phase: LifecyclePhase::Ready,
                    vocabulary_size: Some(loaded.vocabulary_size),
                    embedding_dim: Some(loaded.model.embedding_dim()),
                    catalog_items: Some(loaded.details.catalog_len()),
                    loaded_at: Some(loaded.loaded_at),
                    last_error: None,
                    loads,
                });
                *state = CacheState::Ready(Arc::clone(&loaded));
                Some(loaded)
            }
            Err(e) => {
                tracing::error!(
                    path = %self.artifact_path.display(),
                    error = %e,
                    "Failed to load model"
                );
                *state = CacheState::Unavailable;
                self.publish_unavailable(e.to_string());
                None
            }
        }
    }

    async fn load_fresh(&self, artifact_mtime: SystemTime) -> Result<LoadedModel, LoadError> {
        let loader = Arc::clone(&self.loader);
        let path = self.artifact_path.clone();
        let model = tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|e| LoadError::Worker(e.to_string()))??;

        let warm_up = vec![PADDING_ITEM_ID; self.warm_up_context_length];
        model.infer(&warm_up, 1).map_err(LoadError::WarmUp)?;

        let movies = self.catalog.all_items().await.map_err(LoadError::Catalog)?;
        if movies.is_empty() {
            tracing::error!("Catalog is empty; recommendations cannot be resolved to movies");
        }
        let details = ItemDetailCache::from_catalog(&movies);

        Ok(LoadedModel {
            vocabulary_size: model.vocabulary_size(),
            model,
            details,
            artifact_mtime,
            loaded_at: Utc::now(),
        })
    }

    fn publish_unavailable(&self, reason: String) {
        self.status.send_modify(|s| {
            s.phase = LifecyclePhase::Unavailable;
            s.vocabulary_size = None;
            s.embedding_dim = None;
            s.catalog_items = None;
            s.loaded_at = None;
            s.last_error = Some(reason);
        });
    }
}
