//! Two-tower sequential retrieval model
//!
//! Query tower: item embedding (padding row pinned to zero) followed by a GRU
//! over the context window. Candidate tower: a plain embedding table over the
//! same id space. Scores are dot products; retrieval is brute-force top-k over
//! every candidate row.
//!
//! Training uses in-batch softmax: for a batch of B examples the score matrix
//! `Q · Cᵀ` is B×B and row i's target is column i.

use crate::encoder::{GruEncoder, GruGradients};
use crate::error::{ModelError, ModelResult};
use crate::optimizer::AdamW;
use crate::types::{ScoredItem, TrainingExample};
use movierec_core::{ItemId, PADDING_ITEM_ID};
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;

const EMBEDDING_INIT_LIMIT: f32 = 0.05;
const EVAL_CHUNK: usize = 256;

/// Read-only retrieval surface used by the serving path
pub trait RetrievalModel: Send + Sync {
    /// Largest valid item id; embedding tables hold `vocabulary_size + 1` rows
    fn vocabulary_size(&self) -> u32;

    fn embedding_dim(&self) -> usize;

    /// Encode one padded context into a query vector
    fn encode(&self, context: &[ItemId]) -> ModelResult<Array1<f32>>;

    /// Top `k` candidate ids for a padded context, best first
    fn infer(&self, context: &[ItemId], k: usize) -> ModelResult<Vec<ScoredItem>>;
}

#[derive(Debug, Clone)]
pub struct ModelWeights {
    pub(crate) query_embeddings: Array2<f32>,
    pub(crate) encoder: GruEncoder,
    pub(crate) candidate_embeddings: Array2<f32>,
}

#[derive(Debug)]
struct ModelGradients {
    query_embeddings: Array2<f32>,
    encoder: GruGradients,
    candidate_embeddings: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct SequentialRetrievalModel {
    vocabulary_size: u32,
    embedding_dim: usize,
    weights: Option<ModelWeights>,
}

impl SequentialRetrievalModel {
    /// Unbuilt model: every operation fails with `NotBuilt` until `build`
    pub fn new(vocabulary_size: u32, embedding_dim: usize) -> Self {
        Self {
            vocabulary_size,
            embedding_dim,
            weights: None,
        }
    }

    /// Initialize all weights. Embeddings are uniform in ±0.05, GRU kernels
    /// Glorot-uniform, biases zero.
    pub fn build<R: Rng>(&mut self, rng: &mut R) {
        let rows = self.table_rows();
        let dim = self.embedding_dim;

        let mut query_embeddings = Array2::from_shape_fn((rows, dim), |_| {
            rng.gen_range(-EMBEDDING_INIT_LIMIT..EMBEDDING_INIT_LIMIT)
        });
        query_embeddings.row_mut(PADDING_ITEM_ID as usize).fill(0.0);

        let candidate_embeddings = Array2::from_shape_fn((rows, dim), |_| {
            rng.gen_range(-EMBEDDING_INIT_LIMIT..EMBEDDING_INIT_LIMIT)
        });

        let encoder = GruEncoder::initialize(dim, dim, rng);

        self.weights = Some(ModelWeights {
            query_embeddings,
            encoder,
            candidate_embeddings,
        });
    }

    /// Assemble a built model from existing weights, validating every shape
    pub fn from_weights(
        vocabulary_size: u32,
        embedding_dim: usize,
        mut weights: ModelWeights,
    ) -> ModelResult<Self> {
        let rows = vocabulary_size as usize + 1;
        check_shape(
            "query embedding table",
            &[rows, embedding_dim],
            weights.query_embeddings.shape(),
        )?;
        check_shape(
            "candidate embedding table",
            &[rows, embedding_dim],
            weights.candidate_embeddings.shape(),
        )?;

        let expected = GruEncoder::zeros(embedding_dim, embedding_dim).shapes();
        for ((name, want), (_, got)) in expected.iter().zip(weights.encoder.shapes()) {
            check_shape(&format!("encoder {}", name), want, &got)?;
        }

        weights
            .query_embeddings
            .row_mut(PADDING_ITEM_ID as usize)
            .fill(0.0);

        Ok(Self {
            vocabulary_size,
            embedding_dim,
            weights: Some(weights),
        })
    }

    pub(crate) fn weights(&self) -> ModelResult<&ModelWeights> {
        self.weights
            .as_ref()
            .ok_or(ModelError::NotBuilt("candidate embedding table"))
    }

    fn table_rows(&self) -> usize {
        self.vocabulary_size as usize + 1
    }

    fn check_id(&self, item_id: ItemId) -> ModelResult<()> {
        if item_id > self.vocabulary_size {
            return Err(ModelError::ItemOutOfVocabulary {
                item_id,
                vocabulary_size: self.vocabulary_size,
            });
        }
        Ok(())
    }

    /// Per-timestep embedded inputs `[B, D]` and masks `[B, 1]`
    fn embed_steps(
        &self,
        weights: &ModelWeights,
        contexts: &[&[ItemId]],
    ) -> ModelResult<(Vec<Array2<f32>>, Vec<Array2<f32>>)> {
        let batch = contexts.len();
        if batch == 0 {
            return Err(ModelError::EmptyBatch);
        }
        let steps = contexts[0].len();
        for context in contexts {
            if context.len() != steps {
                return Err(ModelError::ShapeMismatch {
                    what: "context window".to_string(),
                    expected: vec![steps],
                    actual: vec![context.len()],
                });
            }
            for &item_id in context.iter() {
                self.check_id(item_id)?;
            }
        }

        let mut inputs = Vec::with_capacity(steps);
        let mut masks = Vec::with_capacity(steps);
        for t in 0..steps {
            let mut x = Array2::<f32>::zeros((batch, self.embedding_dim));
            let mut mask = Array2::<f32>::zeros((batch, 1));
            for (b, context) in contexts.iter().enumerate() {
                let item_id = context[t];
                x.row_mut(b)
                    .assign(&weights.query_embeddings.row(item_id as usize));
                if item_id != PADDING_ITEM_ID {
                    mask[[b, 0]] = 1.0;
                }
            }
            inputs.push(x);
            masks.push(mask);
        }
        Ok((inputs, masks))
    }

    /// Encode a batch of equal-length padded contexts, `[B, D]`
    pub fn encode_batch(&self, contexts: &[&[ItemId]]) -> ModelResult<Array2<f32>> {
        let weights = self.weights()?;
        let (inputs, masks) = self.embed_steps(weights, contexts)?;
        Ok(weights.encoder.forward(&inputs, &masks))
    }

    fn gather_candidates(
        &self,
        weights: &ModelWeights,
        batch: &[TrainingExample],
    ) -> ModelResult<Array2<f32>> {
        let mut candidates = Array2::<f32>::zeros((batch.len(), self.embedding_dim));
        for (b, example) in batch.iter().enumerate() {
            self.check_id(example.label)?;
            candidates
                .row_mut(b)
                .assign(&weights.candidate_embeddings.row(example.label as usize));
        }
        Ok(candidates)
    }

    fn loss_and_gradients(&self, batch: &[TrainingExample]) -> ModelResult<(f32, ModelGradients)> {
        let weights = self.weights()?;
        let contexts: Vec<&[ItemId]> = batch.iter().map(|e| e.context.as_slice()).collect();
        let (inputs, masks) = self.embed_steps(weights, &contexts)?;
        let candidates = self.gather_candidates(weights, batch)?;

        let trace = weights.encoder.forward_with_trace(&inputs, &masks);
        let scores = trace.output.dot(&candidates.t());
        let (loss, d_scores) = in_batch_softmax(&scores);

        let d_query = d_scores.dot(&candidates);
        let d_candidates = d_scores.t().dot(&trace.output);
        let (encoder, d_inputs) = weights.encoder.backward(&trace, &d_query);

        let mut query_embeddings = Array2::<f32>::zeros(weights.query_embeddings.raw_dim());
        for (t, dx) in d_inputs.iter().enumerate() {
            for (b, context) in contexts.iter().enumerate() {
                let item_id = context[t];
                if item_id != PADDING_ITEM_ID {
                    let mut row = query_embeddings.row_mut(item_id as usize);
                    row += &dx.row(b);
                }
            }
        }

        let mut candidate_embeddings = Array2::<f32>::zeros(weights.candidate_embeddings.raw_dim());
        for (b, example) in batch.iter().enumerate() {
            let mut row = candidate_embeddings.row_mut(example.label as usize);
            row += &d_candidates.row(b);
        }

        Ok((
            loss,
            ModelGradients {
                query_embeddings,
                encoder,
                candidate_embeddings,
            },
        ))
    }

    /// One optimizer step on a batch; returns the batch's mean loss
    pub fn train_step(
        &mut self,
        batch: &[TrainingExample],
        optimizer: &mut AdamW,
    ) -> ModelResult<f32> {
        let (loss, grads) = self.loss_and_gradients(batch)?;
        if !loss.is_finite() {
            return Err(ModelError::Diverged(loss));
        }

        let weights = self
            .weights
            .as_mut()
            .ok_or(ModelError::NotBuilt("candidate embedding table"))?;

        optimizer.begin_step();
        optimizer.update(0, &mut weights.query_embeddings, &grads.query_embeddings);
        optimizer.update(1, &mut weights.candidate_embeddings, &grads.candidate_embeddings);
        weights.encoder.apply_gradients(&grads.encoder, optimizer, 2);

        weights
            .query_embeddings
            .row_mut(PADDING_ITEM_ID as usize)
            .fill(0.0);

        Ok(loss)
    }

    /// In-batch softmax loss without updating weights
    pub fn evaluate_loss(&self, batch: &[TrainingExample]) -> ModelResult<f32> {
        let weights = self.weights()?;
        let contexts: Vec<&[ItemId]> = batch.iter().map(|e| e.context.as_slice()).collect();
        let queries = self.encode_batch(&contexts)?;
        let candidates = self.gather_candidates(weights, batch)?;
        let (loss, _) = in_batch_softmax(&queries.dot(&candidates.t()));
        Ok(loss)
    }

    /// Fraction of examples whose label is among the top `k` retrieved ids
    /// over the full candidate table
    pub fn hit_rate(&self, examples: &[TrainingExample], k: usize) -> ModelResult<f32> {
        if examples.is_empty() {
            return Ok(0.0);
        }
        let weights = self.weights()?;

        let mut hits = 0usize;
        for chunk in examples.chunks(EVAL_CHUNK) {
            let contexts: Vec<&[ItemId]> = chunk.iter().map(|e| e.context.as_slice()).collect();
            let queries = self.encode_batch(&contexts)?;
            let scores = queries.dot(&weights.candidate_embeddings.t());

            hits += scores
                .axis_iter(Axis(0))
                .into_par_iter()
                .enumerate()
                .filter(|(i, row)| {
                    top_k(row.view(), k)
                        .iter()
                        .any(|s| s.item_id == chunk[*i].label)
                })
                .count();
        }

        Ok(hits as f32 / examples.len() as f32)
    }
}

impl RetrievalModel for SequentialRetrievalModel {
    fn vocabulary_size(&self) -> u32 {
        self.vocabulary_size
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn encode(&self, context: &[ItemId]) -> ModelResult<Array1<f32>> {
        let queries = self.encode_batch(&[context])?;
        Ok(queries.row(0).to_owned())
    }

    fn infer(&self, context: &[ItemId], k: usize) -> ModelResult<Vec<ScoredItem>> {
        let weights = self.weights()?;
        let query = self.encode(context)?;
        let scores = weights.candidate_embeddings.dot(&query);
        Ok(top_k(scores.view(), k))
    }
}

/// Best `k` entries of a score vector. Index is the item id. Ties go to the
/// lower id.
pub fn top_k(scores: ArrayView1<f32>, k: usize) -> Vec<ScoredItem> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }

    let order = |a: &ScoredItem, b: &ScoredItem| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.item_id.cmp(&b.item_id))
    };

    let mut ranked: Vec<ScoredItem> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| ScoredItem {
            item_id: i as ItemId,
            score,
        })
        .collect();

    if k < ranked.len() {
        ranked.select_nth_unstable_by(k - 1, order);
        ranked.truncate(k);
    }
    ranked.sort_by(order);
    ranked
}

/// Mean softmax cross-entropy with the diagonal as targets, and its
/// gradient w.r.t. the scores
fn in_batch_softmax(scores: &Array2<f32>) -> (f32, Array2<f32>) {
    let batch = scores.nrows();
    let mut grad = Array2::<f32>::zeros(scores.raw_dim());
    let mut total = 0.0f32;

    for (i, row) in scores.rows().into_iter().enumerate() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        let exp = row.mapv(|v| (v - max).exp());
        let sum = exp.sum();
        total += sum.ln() + max - row[i];

        let mut g = grad.row_mut(i);
        g.assign(&(exp / sum));
        g[i] -= 1.0;
    }

    let scale = batch.max(1) as f32;
    grad.mapv_inplace(|v| v / scale);
    (total / scale, grad)
}

fn check_shape(what: &str, expected: &[usize], actual: &[usize]) -> ModelResult<()> {
    if expected != actual {
        return Err(ModelError::ShapeMismatch {
            what: what.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn example(context: Vec<ItemId>, label: ItemId) -> TrainingExample {
        TrainingExample { context, label }
    }

    fn built(vocab: u32, dim: usize, seed: u64) -> SequentialRetrievalModel {
        let mut model = SequentialRetrievalModel::new(vocab, dim);
        model.build(&mut StdRng::seed_from_u64(seed));
        model
    }

    #[test]
    fn test_unbuilt_model_fails_fast() {
        let model = SequentialRetrievalModel::new(10, 8);
        assert!(matches!(model.weights(), Err(ModelError::NotBuilt(_))));
        assert!(matches!(
            model.infer(&[1, 2, 0], 3),
            Err(ModelError::NotBuilt(_))
        ));
    }

    #[test]
    fn test_build_shapes_and_padding_row() {
        let model = built(20, 8, 1);
        let weights = model.weights().unwrap();
        assert_eq!(weights.query_embeddings.shape(), &[21, 8]);
        assert_eq!(weights.candidate_embeddings.shape(), &[21, 8]);
        assert!(weights.query_embeddings.row(0).iter().all(|&v| v == 0.0));
        assert!(weights
            .candidate_embeddings
            .iter()
            .all(|v| v.abs() <= EMBEDDING_INIT_LIMIT));
    }

    #[test]
    fn test_infer_returns_k_sorted_ids() {
        let model = built(30, 8, 2);
        let ranked = model.infer(&[3, 4, 5, 0, 0], 10).unwrap();

        assert_eq!(ranked.len(), 10);
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert!(ranked.iter().all(|s| s.item_id <= 30));
    }

    #[test]
    fn test_infer_caps_k_at_table_size() {
        let model = built(4, 4, 3);
        let ranked = model.infer(&[1, 0], 50).unwrap();
        assert_eq!(ranked.len(), 5);
    }

    #[test]
    fn test_out_of_vocabulary_context_rejected() {
        let model = built(5, 4, 4);
        assert!(matches!(
            model.infer(&[1, 9, 0], 3),
            Err(ModelError::ItemOutOfVocabulary { item_id: 9, .. })
        ));
    }

    #[test]
    fn test_trailing_padding_does_not_change_query() {
        let model = built(12, 6, 5);
        let short = model.encode(&[4, 7]).unwrap();
        let padded = model.encode(&[4, 7, 0, 0, 0]).unwrap();
        for (a, b) in short.iter().zip(padded.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_all_padding_context_encodes_to_zero() {
        let model = built(12, 6, 6);
        let query = model.encode(&[0, 0, 0, 0]).unwrap();
        assert!(query.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_top_k_tie_breaks_by_lower_id() {
        let scores = array![0.5f32, 0.9, 0.9, 0.1, 0.9];
        let ranked = top_k(scores.view(), 3);
        let ids: Vec<ItemId> = ranked.iter().map(|s| s.item_id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
    }

    #[test]
    fn test_in_batch_softmax_uniform_scores() {
        let scores = Array2::<f32>::zeros((4, 4));
        let (loss, grad) = in_batch_softmax(&scores);
        assert!((loss - (4.0f32).ln()).abs() < 1e-5);
        // each row of the gradient sums to zero
        for row in grad.rows() {
            assert!(row.sum().abs() < 1e-6);
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut model = built(8, 8, 7);
        let mut optimizer = AdamW::new(0.05);
        let batch = vec![
            example(vec![1, 2, 0], 3),
            example(vec![4, 5, 0], 6),
            example(vec![7, 0, 0], 8),
            example(vec![2, 3, 0], 4),
        ];

        let before = model.evaluate_loss(&batch).unwrap();
        for _ in 0..60 {
            model.train_step(&batch, &mut optimizer).unwrap();
        }
        let after = model.evaluate_loss(&batch).unwrap();

        assert!(after < before, "loss did not drop: {} -> {}", before, after);
        let weights = model.weights().unwrap();
        assert!(weights.query_embeddings.row(0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_hit_rate_bounds() {
        let model = built(6, 4, 8);
        let examples = vec![
            example(vec![1, 2], 3),
            example(vec![2, 3], 4),
        ];
        assert_eq!(model.hit_rate(&examples, 7).unwrap(), 1.0);
        let rate = model.hit_rate(&examples, 1).unwrap();
        assert!((0.0..=1.0).contains(&rate));
        assert_eq!(model.hit_rate(&[], 5).unwrap(), 0.0);
    }

    #[test]
    fn test_from_weights_rejects_wrong_shape() {
        let model = built(6, 4, 9);
        let mut weights = model.weights().unwrap().clone();
        weights.candidate_embeddings = Array2::zeros((5, 4));
        assert!(matches!(
            SequentialRetrievalModel::from_weights(6, 4, weights),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }
}
