//! Model artifact persistence
//!
//! A trained model is written as a single bincode file: a magic tag, a format
//! version, metadata, then every weight tensor as `shape + flat data`.
//! Writes go to a temp file in the destination directory and are renamed into
//! place, so readers only ever observe a complete artifact.

use crate::encoder::GruEncoder;
use crate::error::{LoadError, TrainingError};
use crate::model::{ModelWeights, RetrievalModel, SequentialRetrievalModel};
use bincode::Options;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const ARTIFACT_MAGIC: [u8; 8] = *b"MRSEQGRU";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializableMatrix {
    shape: (usize, usize),
    data: Vec<f32>,
}

impl SerializableMatrix {
    fn from_array(array: &Array2<f32>) -> Self {
        Self {
            shape: (array.nrows(), array.ncols()),
            data: array.iter().copied().collect(),
        }
    }

    fn into_array(self, name: &str) -> Result<Array2<f32>, String> {
        Array2::from_shape_vec(self.shape, self.data)
            .map_err(|e| format!("failed to reconstruct {}: {}", name, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializableEncoder {
    w_z: SerializableMatrix,
    w_r: SerializableMatrix,
    w_n: SerializableMatrix,
    u_z: SerializableMatrix,
    u_r: SerializableMatrix,
    u_n: SerializableMatrix,
    b_z: Vec<f32>,
    b_r: Vec<f32>,
    b_n: Vec<f32>,
    b_hn: Vec<f32>,
}

impl SerializableEncoder {
    fn from_encoder(encoder: &GruEncoder) -> Self {
        Self {
            w_z: SerializableMatrix::from_array(&encoder.w_z),
            w_r: SerializableMatrix::from_array(&encoder.w_r),
            w_n: SerializableMatrix::from_array(&encoder.w_n),
            u_z: SerializableMatrix::from_array(&encoder.u_z),
            u_r: SerializableMatrix::from_array(&encoder.u_r),
            u_n: SerializableMatrix::from_array(&encoder.u_n),
            b_z: encoder.b_z.to_vec(),
            b_r: encoder.b_r.to_vec(),
            b_n: encoder.b_n.to_vec(),
            b_hn: encoder.b_hn.to_vec(),
        }
    }

    fn into_encoder(self) -> Result<GruEncoder, String> {
        Ok(GruEncoder {
            w_z: self.w_z.into_array("w_z")?,
            w_r: self.w_r.into_array("w_r")?,
            w_n: self.w_n.into_array("w_n")?,
            u_z: self.u_z.into_array("u_z")?,
            u_r: self.u_r.into_array("u_r")?,
            u_n: self.u_n.into_array("u_n")?,
            b_z: Array1::from_vec(self.b_z),
            b_r: Array1::from_vec(self.b_r),
            b_n: Array1::from_vec(self.b_n),
            b_hn: Array1::from_vec(self.b_hn),
        })
    }
}

/// Descriptive fields stored alongside the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub vocabulary_size: u32,
    pub embedding_dim: usize,
    pub max_context_length: usize,
    pub training_examples: usize,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelArtifact {
    magic: [u8; 8],
    format_version: u32,
    metadata: ArtifactMetadata,
    query_embeddings: SerializableMatrix,
    encoder: SerializableEncoder,
    candidate_embeddings: SerializableMatrix,
}

/// Atomically write `model` to `path`, replacing any previous artifact
pub fn save_model(
    path: &Path,
    model: &SequentialRetrievalModel,
    max_context_length: usize,
    training_examples: usize,
) -> Result<ArtifactMetadata, TrainingError> {
    let weights = model.weights()?;
    let metadata = ArtifactMetadata {
        vocabulary_size: model.vocabulary_size(),
        embedding_dim: model.embedding_dim(),
        max_context_length,
        training_examples,
        trained_at: Utc::now(),
    };

    let artifact = ModelArtifact {
        magic: ARTIFACT_MAGIC,
        format_version: FORMAT_VERSION,
        metadata: metadata.clone(),
        query_embeddings: SerializableMatrix::from_array(&weights.query_embeddings),
        encoder: SerializableEncoder::from_encoder(&weights.encoder),
        candidate_embeddings: SerializableMatrix::from_array(&weights.candidate_embeddings),
    };

    let artifact_error = |reason: String| TrainingError::Artifact {
        path: path.to_path_buf(),
        reason,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| artifact_error(format!("failed to create {}: {}", dir.display(), e)))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| artifact_error(format!("failed to create temp file: {}", e)))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        bincode::serialize_into(&mut writer, &artifact)
            .map_err(|e| artifact_error(format!("serialization failed: {}", e)))?;
        writer
            .flush()
            .map_err(|e| artifact_error(format!("flush failed: {}", e)))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| artifact_error(format!("sync failed: {}", e)))?;
    tmp.persist(path)
        .map_err(|e| artifact_error(format!("rename failed: {}", e.error)))?;

    tracing::info!(
        path = %path.display(),
        vocabulary_size = metadata.vocabulary_size,
        embedding_dim = metadata.embedding_dim,
        "Saved model artifact"
    );

    Ok(metadata)
}

/// Read and validate the artifact at `path`
pub fn load_model(path: &Path) -> Result<(SequentialRetrievalModel, ArtifactMetadata), LoadError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LoadError::Missing(path.to_path_buf()))
        }
        Err(e) => return Err(LoadError::Io(e)),
    };

    let corrupt = |reason: String| LoadError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    // Same encoding as `bincode::serialize`, with a size limit so a damaged
    // length prefix cannot trigger a huge allocation.
    let artifact: ModelArtifact = bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(bytes.len() as u64)
        .deserialize(&bytes)
        .map_err(|e| corrupt(format!("decode failed: {}", e)))?;

    if artifact.magic != ARTIFACT_MAGIC {
        return Err(corrupt("unrecognized file header".to_string()));
    }
    if artifact.format_version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported format version {} (expected {})",
            artifact.format_version, FORMAT_VERSION
        )));
    }

    let metadata = artifact.metadata;
    let weights = ModelWeights {
        query_embeddings: artifact
            .query_embeddings
            .into_array("query embedding table")
            .map_err(corrupt)?,
        encoder: artifact.encoder.into_encoder().map_err(corrupt)?,
        candidate_embeddings: artifact
            .candidate_embeddings
            .into_array("candidate embedding table")
            .map_err(corrupt)?,
    };

    let model = SequentialRetrievalModel::from_weights(
        metadata.vocabulary_size,
        metadata.embedding_dim,
        weights,
    )
    .map_err(|source| LoadError::Shape {
        path: path.to_path_buf(),
        source,
    })?;

    Ok((model, metadata))
}

/// Last-modified time of the artifact, used to detect replacement
pub async fn artifact_mtime(path: &Path) -> std::io::Result<SystemTime> {
    tokio::fs::metadata(path).await?.modified()
}
