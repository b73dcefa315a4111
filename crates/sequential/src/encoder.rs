//! GRU sequence encoder
//!
//! ```text
//! z_t = σ(x_t W_z + h_{t-1} U_z + b_z)               // update gate
//! r_t = σ(x_t W_r + h_{t-1} U_r + b_r)               // reset gate
//! n_t = tanh(x_t W_n + b_n + r_t ⊙ (h_{t-1} U_n + b_hn))
//! h_t = (1 - z_t) ⊙ n_t + z_t ⊙ h_{t-1}
//! ```
//!
//! Steps whose mask is 0 (padding tokens) carry `h_{t-1}` through unchanged,
//! so trailing padding has no effect on the final hidden state.
//!
//! Gradients are computed by explicit backpropagation through time over a
//! recorded [`ForwardTrace`].

use crate::optimizer::AdamW;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct GruEncoder {
    pub(crate) w_z: Array2<f32>,
    pub(crate) w_r: Array2<f32>,
    pub(crate) w_n: Array2<f32>,
    pub(crate) u_z: Array2<f32>,
    pub(crate) u_r: Array2<f32>,
    pub(crate) u_n: Array2<f32>,
    pub(crate) b_z: Array1<f32>,
    pub(crate) b_r: Array1<f32>,
    pub(crate) b_n: Array1<f32>,
    pub(crate) b_hn: Array1<f32>,
}

/// Gradients with the same layout as [`GruEncoder`]
#[derive(Debug, Clone)]
pub struct GruGradients {
    pub w_z: Array2<f32>,
    pub w_r: Array2<f32>,
    pub w_n: Array2<f32>,
    pub u_z: Array2<f32>,
    pub u_r: Array2<f32>,
    pub u_n: Array2<f32>,
    pub b_z: Array1<f32>,
    pub b_r: Array1<f32>,
    pub b_n: Array1<f32>,
    pub b_hn: Array1<f32>,
}

/// Activations of one timestep, kept for the backward pass
#[derive(Debug)]
struct StepCache {
    x: Array2<f32>,
    h_prev: Array2<f32>,
    z: Array2<f32>,
    r: Array2<f32>,
    g: Array2<f32>,
    n: Array2<f32>,
    mask: Array2<f32>,
}

/// Recorded forward pass over a batch
#[derive(Debug)]
pub struct ForwardTrace {
    steps: Vec<StepCache>,
    /// Final hidden state, `[batch, hidden]`
    pub output: Array2<f32>,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Glorot/Xavier uniform initialization
fn glorot<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    let limit = (6.0 / (rows + cols) as f32).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}

impl GruEncoder {
    /// All-zero weights; used as the target of deserialization and in tests
    pub fn zeros(input_dim: usize, hidden_dim: usize) -> Self {
        Self {
            w_z: Array2::zeros((input_dim, hidden_dim)),
            w_r: Array2::zeros((input_dim, hidden_dim)),
            w_n: Array2::zeros((input_dim, hidden_dim)),
            u_z: Array2::zeros((hidden_dim, hidden_dim)),
            u_r: Array2::zeros((hidden_dim, hidden_dim)),
            u_n: Array2::zeros((hidden_dim, hidden_dim)),
            b_z: Array1::zeros(hidden_dim),
            b_r: Array1::zeros(hidden_dim),
            b_n: Array1::zeros(hidden_dim),
            b_hn: Array1::zeros(hidden_dim),
        }
    }

    pub fn initialize<R: Rng>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        Self {
            w_z: glorot(input_dim, hidden_dim, rng),
            w_r: glorot(input_dim, hidden_dim, rng),
            w_n: glorot(input_dim, hidden_dim, rng),
            u_z: glorot(hidden_dim, hidden_dim, rng),
            u_r: glorot(hidden_dim, hidden_dim, rng),
            u_n: glorot(hidden_dim, hidden_dim, rng),
            b_z: Array1::zeros(hidden_dim),
            b_r: Array1::zeros(hidden_dim),
            b_n: Array1::zeros(hidden_dim),
            b_hn: Array1::zeros(hidden_dim),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.w_z.nrows()
    }

    pub fn hidden_dim(&self) -> usize {
        self.u_z.nrows()
    }

    /// Shapes of every parameter, in a fixed order. Used to validate
    /// deserialized weights.
    pub fn shapes(&self) -> Vec<(&'static str, Vec<usize>)> {
        vec![
            ("w_z", self.w_z.shape().to_vec()),
            ("w_r", self.w_r.shape().to_vec()),
            ("w_n", self.w_n.shape().to_vec()),
            ("u_z", self.u_z.shape().to_vec()),
            ("u_r", self.u_r.shape().to_vec()),
            ("u_n", self.u_n.shape().to_vec()),
            ("b_z", self.b_z.shape().to_vec()),
            ("b_r", self.b_r.shape().to_vec()),
            ("b_n", self.b_n.shape().to_vec()),
            ("b_hn", self.b_hn.shape().to_vec()),
        ]
    }

    fn step(&self, x: &Array2<f32>, h: &Array2<f32>, mask: &Array2<f32>) -> StepCache {
        let z = (x.dot(&self.w_z) + h.dot(&self.u_z) + &self.b_z).mapv(sigmoid);
        let r = (x.dot(&self.w_r) + h.dot(&self.u_r) + &self.b_r).mapv(sigmoid);
        let g = h.dot(&self.u_n) + &self.b_hn;
        let n = (x.dot(&self.w_n) + &self.b_n + &r * &g).mapv(f32::tanh);

        StepCache {
            x: x.clone(),
            h_prev: h.clone(),
            z,
            r,
            g,
            n,
            mask: mask.clone(),
        }
    }

    fn next_hidden(cache: &StepCache) -> Array2<f32> {
        // h' = n + z ⊙ (h - n), then blend with h by the mask
        let candidate = &cache.n + &(&cache.z * &(&cache.h_prev - &cache.n));
        &cache.h_prev + &(&cache.mask * &(candidate - &cache.h_prev))
    }

    /// Run the recurrence without recording activations.
    ///
    /// `inputs[t]` is `[batch, input_dim]`, `masks[t]` is `[batch, 1]`.
    pub fn forward(&self, inputs: &[Array2<f32>], masks: &[Array2<f32>]) -> Array2<f32> {
        let batch = inputs.first().map(|x| x.nrows()).unwrap_or(0);
        let mut h = Array2::<f32>::zeros((batch, self.hidden_dim()));
        for (x, mask) in inputs.iter().zip(masks) {
            let cache = self.step(x, &h, mask);
            h = Self::next_hidden(&cache);
        }
        h
    }

    /// Run the recurrence and keep what the backward pass needs
    pub fn forward_with_trace(
        &self,
        inputs: &[Array2<f32>],
        masks: &[Array2<f32>],
    ) -> ForwardTrace {
        let batch = inputs.first().map(|x| x.nrows()).unwrap_or(0);
        let mut h = Array2::<f32>::zeros((batch, self.hidden_dim()));
        let mut steps = Vec::with_capacity(inputs.len());
        for (x, mask) in inputs.iter().zip(masks) {
            let cache = self.step(x, &h, mask);
            h = Self::next_hidden(&cache);
            steps.push(cache);
        }
        ForwardTrace { steps, output: h }
    }

    /// Backpropagate `d_output` (gradient w.r.t. the final hidden state).
    ///
    /// Returns parameter gradients and the gradient w.r.t. each timestep's
    /// input, in timestep order.
    pub fn backward(
        &self,
        trace: &ForwardTrace,
        d_output: &Array2<f32>,
    ) -> (GruGradients, Vec<Array2<f32>>) {
        let mut grads = GruGradients::zeros_like(self);
        let mut d_inputs = vec![Array2::<f32>::zeros((0, 0)); trace.steps.len()];
        let mut dh = d_output.clone();

        for (t, step) in trace.steps.iter().enumerate().rev() {
            let dh_cand = &dh * &step.mask;
            let mut dh_prev = &dh - &dh_cand;

            let dn = &dh_cand * &step.z.mapv(|v| 1.0 - v);
            let dz = &dh_cand * &(&step.h_prev - &step.n);
            dh_prev += &(&dh_cand * &step.z);

            // candidate state
            let da_n = dn * &step.n.mapv(|v| 1.0 - v * v);
            grads.w_n += &step.x.t().dot(&da_n);
            grads.b_n += &da_n.sum_axis(Axis(0));
            let mut dx = da_n.dot(&self.w_n.t());

            let dr = &da_n * &step.g;
            let dg = &da_n * &step.r;
            grads.u_n += &step.h_prev.t().dot(&dg);
            grads.b_hn += &dg.sum_axis(Axis(0));
            dh_prev += &dg.dot(&self.u_n.t());

            // update gate
            let da_z = dz * &step.z.mapv(|v| v * (1.0 - v));
            grads.w_z += &step.x.t().dot(&da_z);
            grads.u_z += &step.h_prev.t().dot(&da_z);
            grads.b_z += &da_z.sum_axis(Axis(0));
            dx += &da_z.dot(&self.w_z.t());
            dh_prev += &da_z.dot(&self.u_z.t());

            // reset gate
            let da_r = dr * &step.r.mapv(|v| v * (1.0 - v));
            grads.w_r += &step.x.t().dot(&da_r);
            grads.u_r += &step.h_prev.t().dot(&da_r);
            grads.b_r += &da_r.sum_axis(Axis(0));
            dx += &da_r.dot(&self.w_r.t());
            dh_prev += &da_r.dot(&self.u_r.t());

            d_inputs[t] = dx;
            dh = dh_prev;
        }

        (grads, d_inputs)
    }

    /// Apply one optimizer update. Occupies optimizer slots
    /// `first_slot..first_slot + 10`.
    pub fn apply_gradients(
        &mut self,
        grads: &GruGradients,
        optimizer: &mut AdamW,
        first_slot: usize,
    ) {
        optimizer.update(first_slot, &mut self.w_z, &grads.w_z);
        optimizer.update(first_slot + 1, &mut self.w_r, &grads.w_r);
        optimizer.update(first_slot + 2, &mut self.w_n, &grads.w_n);
        optimizer.update(first_slot + 3, &mut self.u_z, &grads.u_z);
        optimizer.update(first_slot + 4, &mut self.u_r, &grads.u_r);
        optimizer.update(first_slot + 5, &mut self.u_n, &grads.u_n);
        optimizer.update(first_slot + 6, &mut self.b_z, &grads.b_z);
        optimizer.update(first_slot + 7, &mut self.b_r, &grads.b_r);
        optimizer.update(first_slot + 8, &mut self.b_n, &grads.b_n);
        optimizer.update(first_slot + 9, &mut self.b_hn, &grads.b_hn);
    }
}

impl GruGradients {
    pub fn zeros_like(encoder: &GruEncoder) -> Self {
        Self {
            w_z: Array2::zeros(encoder.w_z.raw_dim()),
            w_r: Array2::zeros(encoder.w_r.raw_dim()),
            w_n: Array2::zeros(encoder.w_n.raw_dim()),
            u_z: Array2::zeros(encoder.u_z.raw_dim()),
            u_r: Array2::zeros(encoder.u_r.raw_dim()),
            u_n: Array2::zeros(encoder.u_n.raw_dim()),
            b_z: Array1::zeros(encoder.b_z.raw_dim()),
            b_r: Array1::zeros(encoder.b_r.raw_dim()),
            b_n: Array1::zeros(encoder.b_n.raw_dim()),
            b_hn: Array1::zeros(encoder.b_hn.raw_dim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn inputs(batch: usize, steps: usize, dim: usize, rng: &mut StdRng) -> Vec<Array2<f32>> {
        (0..steps)
            .map(|_| Array2::from_shape_fn((batch, dim), |_| rng.gen_range(-1.0..1.0)))
            .collect()
    }

    fn masks(batch: usize, valid: &[usize], steps: usize) -> Vec<Array2<f32>> {
        (0..steps)
            .map(|t| {
                Array2::from_shape_fn((batch, 1), |(b, _)| if t < valid[b] { 1.0 } else { 0.0 })
            })
            .collect()
    }

    #[test]
    fn test_forward_output_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let gru = GruEncoder::initialize(4, 6, &mut rng);
        let x = inputs(3, 5, 4, &mut rng);
        let m = masks(3, &[5, 5, 5], 5);

        let h = gru.forward(&x, &m);
        assert_eq!(h.shape(), &[3, 6]);
    }

    #[test]
    fn test_masked_steps_leave_hidden_state_unchanged() {
        let mut rng = StdRng::seed_from_u64(11);
        let gru = GruEncoder::initialize(4, 4, &mut rng);
        let x = inputs(1, 6, 4, &mut rng);

        let short = gru.forward(&x[..2], &masks(1, &[2], 2));
        let padded = gru.forward(&x, &masks(1, &[2], 6));

        for (a, b) in short.iter().zip(padded.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let gru = GruEncoder::initialize(3, 3, &mut rng);
        let x = inputs(2, 4, 3, &mut rng);
        let m = masks(2, &[4, 2], 4);

        // loss = sum(h_T)
        let trace = gru.forward_with_trace(&x, &m);
        let d_out = Array2::<f32>::ones(trace.output.raw_dim());
        let (grads, d_inputs) = gru.backward(&trace, &d_out);

        let eps = 1e-3;
        let loss = |enc: &GruEncoder, xs: &[Array2<f32>]| enc.forward(xs, &m).sum();

        let mut plus = gru.clone();
        plus.u_n[[1, 2]] += eps;
        let mut minus = gru.clone();
        minus.u_n[[1, 2]] -= eps;
        let numeric = (loss(&plus, &x) - loss(&minus, &x)) / (2.0 * eps);
        assert!((numeric - grads.u_n[[1, 2]]).abs() < 1e-2);

        let mut plus = gru.clone();
        plus.b_z[0] += eps;
        let mut minus = gru.clone();
        minus.b_z[0] -= eps;
        let numeric = (loss(&plus, &x) - loss(&minus, &x)) / (2.0 * eps);
        assert!((numeric - grads.b_z[0]).abs() < 1e-2);

        let mut x_plus = x.clone();
        x_plus[1][[0, 1]] += eps;
        let mut x_minus = x.clone();
        x_minus[1][[0, 1]] -= eps;
        let numeric = (loss(&gru, &x_plus) - loss(&gru, &x_minus)) / (2.0 * eps);
        assert!((numeric - d_inputs[1][[0, 1]]).abs() < 1e-2);

        // masked step of the second row receives no input gradient
        assert!(d_inputs[3].row(1).iter().all(|v| v.abs() < 1e-9));
    }
}
