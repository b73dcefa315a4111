//! AdamW optimizer over ndarray parameters
//!
//! ```text
//! m_t = β₁ m_{t-1} + (1 - β₁) g
//! v_t = β₂ v_{t-1} + (1 - β₂) g²
//! θ  -= lr · λ · θ                       // decoupled weight decay
//! θ  -= lr · m̂_t / (√v̂_t + ε)
//! ```
//!
//! Moment buffers are addressed by slot index; each parameter must always be
//! updated through the same slot.

use ndarray::{Array, Dimension};

pub const DEFAULT_WEIGHT_DECAY: f32 = 0.004;

#[derive(Debug, Clone)]
pub struct AdamW {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
    t: i32,
}

impl AdamW {
    /// Defaults: β₁=0.9, β₂=0.999, ε=1e-7, weight decay 0.004
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
            weight_decay: DEFAULT_WEIGHT_DECAY,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    pub fn weight_decay(mut self, wd: f32) -> Self {
        self.weight_decay = wd;
        self
    }

    /// Number of completed steps
    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Advance the step counter. Call once per batch, before the `update`s.
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    pub fn update<D: Dimension>(
        &mut self,
        slot: usize,
        param: &mut Array<f32, D>,
        grad: &Array<f32, D>,
    ) {
        if slot >= self.m.len() {
            self.m.resize(slot + 1, Vec::new());
            self.v.resize(slot + 1, Vec::new());
        }
        if self.m[slot].len() != param.len() {
            self.m[slot] = vec![0.0; param.len()];
            self.v[slot] = vec![0.0; param.len()];
        }

        let t = self.t.max(1);
        let bias_correction1 = 1.0 - self.beta1.powi(t);
        let bias_correction2 = 1.0 - self.beta2.powi(t);

        let (beta1, beta2) = (self.beta1, self.beta2);
        let (lr, eps, wd) = (self.lr, self.eps, self.weight_decay);
        let m = &mut self.m[slot];
        let v = &mut self.v[slot];

        for (((p, &g), m), v) in param
            .iter_mut()
            .zip(grad.iter())
            .zip(m.iter_mut())
            .zip(v.iter_mut())
        {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;

            let m_hat = *m / bias_correction1;
            let v_hat = *v / bias_correction2;

            *p -= lr * wd * *p;
            *p -= lr * m_hat / (v_hat.sqrt() + eps);
        }
    }
}
