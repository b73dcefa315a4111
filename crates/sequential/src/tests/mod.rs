//! Crate-internal test suites and shared fixtures

mod lifecycle_test;

use crate::error::{LoadError, ModelResult};
use crate::lifecycle::ModelLoader;
use crate::model::RetrievalModel;
use crate::types::ScoredItem;
use movierec_core::{ItemId, Movie};
use ndarray::Array1;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Model that returns a fixed ranking and records how it was called
pub(crate) struct StubModel {
    ranked: Vec<ItemId>,
    vocabulary_size: u32,
    pub calls: AtomicUsize,
    pub last_context: Mutex<Vec<ItemId>>,
    pub last_k: AtomicUsize,
}

impl StubModel {
    pub fn new(ranked: Vec<ItemId>, vocabulary_size: u32) -> Self {
        Self {
            ranked,
            vocabulary_size,
            calls: AtomicUsize::new(0),
            last_context: Mutex::new(Vec::new()),
            last_k: AtomicUsize::new(0),
        }
    }
}

impl RetrievalModel for StubModel {
    fn vocabulary_size(&self) -> u32 {
        self.vocabulary_size
    }

    fn embedding_dim(&self) -> usize {
        4
    }

    fn encode(&self, _context: &[ItemId]) -> ModelResult<Array1<f32>> {
        Ok(Array1::zeros(4))
    }

    fn infer(&self, context: &[ItemId], k: usize) -> ModelResult<Vec<ScoredItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = context.to_vec();
        self.last_k.store(k, Ordering::SeqCst);

        Ok(self
            .ranked
            .iter()
            .take(k)
            .enumerate()
            .map(|(rank, &item_id)| ScoredItem {
                item_id,
                score: 1.0 - rank as f32 * 0.01,
            })
            .collect())
    }
}

/// Loader handing out a shared `StubModel`, optionally failing or slow
pub(crate) struct StubLoader {
    pub model: Arc<StubModel>,
    pub loads: AtomicUsize,
    pub fail: AtomicBool,
    pub delay_ms: AtomicU64,
}

impl StubLoader {
    pub fn new(model: Arc<StubModel>) -> Self {
        Self {
            model,
            loads: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for StubLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn RetrievalModel>, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            // runs on a blocking worker
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(LoadError::Corrupt {
                path: path.to_path_buf(),
                reason: "injected failure".to_string(),
            });
        }
        let model: Arc<dyn RetrievalModel> = self.model.clone();
        Ok(model)
    }
}

pub(crate) fn movie(id: ItemId) -> Movie {
    Movie {
        id,
        title: format!("Movie {}", id),
        genres: Some("Drama".to_string()),
        resource_url: Some(format!("https://example.org/movies/{}", id)),
        movie_lens_id: Some(id as i32 + 100),
    }
}

pub(crate) fn catalog(ids: impl IntoIterator<Item = ItemId>) -> Vec<Movie> {
    ids.into_iter().map(movie).collect()
}

/// Create a placeholder artifact file; stub loaders never read its content
pub(crate) fn touch_artifact(dir: &Path) -> PathBuf {
    let path = dir.join("model.bin");
    std::fs::write(&path, b"stub").unwrap();
    path
}

/// Move the artifact's mtime by `offset_secs` relative to its current value
pub(crate) fn shift_mtime(path: &Path, offset_secs: i64) {
    let current = std::fs::metadata(path).unwrap().modified().unwrap();
    let shifted = if offset_secs >= 0 {
        current + Duration::from_secs(offset_secs as u64)
    } else {
        current - Duration::from_secs(offset_secs.unsigned_abs())
    };
    set_mtime(path, shifted);
}

pub(crate) fn set_mtime(path: &Path, mtime: SystemTime) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(mtime).unwrap();
}
