//! Stacked LSTM regressor over univariate windows.
//!
//! Each layer feeds its full hidden sequence to the next; the last hidden
//! state of the top layer goes through a linear head. Trained end to end
//! with backpropagation through time and Adam on mean squared error.

use ndarray::{s, Array, Array1, Array2, ArrayView1, Axis, Dimension, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::forecaster::SequenceRegressor;
use crate::errors::AppError;
use crate::models::config::ForecastConfig;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-7;
/// Global gradient norm limit per batch.
const GRADIENT_CLIP: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LstmCell {
    input_size: usize,
    hidden_size: usize,
    /// Stacked gate weights `[input; forget; candidate; output]`,
    /// shape `(4H, I + H)`.
    w: Array2<f64>,
    b: Array1<f64>,
}

/// Activations of one time step, kept for the backward pass.
struct StepCache {
    z: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    c_prev: Array1<f64>,
    c: Array1<f64>,
    tanh_c: Array1<f64>,
    h: Array1<f64>,
}

impl LstmCell {
    fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Self {
        let limit = (1.0 / hidden_size as f64).sqrt();
        let w = Array2::random_using(
            (4 * hidden_size, input_size + hidden_size),
            Uniform::new(-limit, limit),
            rng,
        );
        let mut b = Array1::zeros(4 * hidden_size);
        // Forget gate starts open.
        b.slice_mut(s![hidden_size..2 * hidden_size]).fill(1.0);
        LstmCell {
            input_size,
            hidden_size,
            w,
            b,
        }
    }

    fn step(&self, x: &Array1<f64>, h_prev: &Array1<f64>, c_prev: &Array1<f64>) -> StepCache {
        let h = self.hidden_size;
        let mut z = Array1::zeros(self.input_size + h);
        z.slice_mut(s![..self.input_size]).assign(x);
        z.slice_mut(s![self.input_size..]).assign(h_prev);

        let pre = self.w.dot(&z) + &self.b;
        let i = sigmoid(pre.slice(s![0..h]));
        let f = sigmoid(pre.slice(s![h..2 * h]));
        let g = pre.slice(s![2 * h..3 * h]).mapv(f64::tanh);
        let o = sigmoid(pre.slice(s![3 * h..4 * h]));

        let c = &f * c_prev + &i * &g;
        let tanh_c = c.mapv(f64::tanh);
        let h_new = &o * &tanh_c;

        StepCache {
            z,
            i,
            f,
            g,
            o,
            c_prev: c_prev.clone(),
            c,
            tanh_c,
            h: h_new,
        }
    }

    fn forward_sequence(&self, inputs: &[Array1<f64>]) -> Vec<StepCache> {
        let mut h = Array1::zeros(self.hidden_size);
        let mut c = Array1::zeros(self.hidden_size);
        let mut caches = Vec::with_capacity(inputs.len());
        for x in inputs {
            let step = self.step(x, &h, &c);
            h = step.h.clone();
            c = step.c.clone();
            caches.push(step);
        }
        caches
    }

    /// Accumulate weight gradients for one sequence and return the
    /// gradient with respect to each input.
    fn backward_sequence(&self, caches: &[StepCache], dh_out: &[Array1<f64>], grads: &mut CellGrads) -> Vec<Array1<f64>> {
        let h = self.hidden_size;
        let mut dh_next = Array1::zeros(h);
        let mut dc_next = Array1::zeros(h);
        let mut dx = vec![Array1::zeros(self.input_size); caches.len()];

        for t in (0..caches.len()).rev() {
            let step = &caches[t];
            let dh = &dh_out[t] + &dh_next;
            let d_o = &dh * &step.tanh_c;
            let dc = &dc_next + &(&dh * &step.o * &step.tanh_c.mapv(|v| 1.0 - v * v));
            let d_i = &dc * &step.g;
            let d_f = &dc * &step.c_prev;
            let d_g = &dc * &step.i;
            dc_next = &dc * &step.f;

            let mut dpre = Array1::zeros(4 * h);
            dpre.slice_mut(s![0..h]).assign(&(&d_i * &step.i.mapv(|v| v * (1.0 - v))));
            dpre.slice_mut(s![h..2 * h]).assign(&(&d_f * &step.f.mapv(|v| v * (1.0 - v))));
            dpre.slice_mut(s![2 * h..3 * h]).assign(&(&d_g * &step.g.mapv(|v| 1.0 - v * v)));
            dpre.slice_mut(s![3 * h..4 * h]).assign(&(&d_o * &step.o.mapv(|v| v * (1.0 - v))));

            grads.w += &outer(&dpre, &step.z);
            grads.b += &dpre;

            let dz = self.w.t().dot(&dpre);
            dx[t] = dz.slice(s![..self.input_size]).to_owned();
            dh_next = dz.slice(s![self.input_size..]).to_owned();
        }

        dx
    }
}

/// Two-or-more layer LSTM with a scalar linear head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmRegressor {
    hidden_size: usize,
    cells: Vec<LstmCell>,
    head_w: Array1<f64>,
    head_b: Array1<f64>,
}

impl LstmRegressor {
    pub fn new(hidden_size: usize, num_layers: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut cells = Vec::with_capacity(num_layers.max(1));
        cells.push(LstmCell::new(1, hidden_size, &mut rng));
        for _ in 1..num_layers {
            cells.push(LstmCell::new(hidden_size, hidden_size, &mut rng));
        }
        let limit = (1.0 / hidden_size as f64).sqrt();
        LstmRegressor {
            hidden_size,
            cells,
            head_w: Array1::random_using(hidden_size, Uniform::new(-limit, limit), &mut rng),
            head_b: Array1::zeros(1),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.cells.len()
    }

    fn forward_cached(&self, window: &[f64]) -> (Vec<Vec<StepCache>>, f64) {
        let mut inputs: Vec<Array1<f64>> = window.iter().map(|&v| Array1::from_elem(1, v)).collect();
        let mut layers = Vec::with_capacity(self.cells.len());
        for cell in &self.cells {
            let caches = cell.forward_sequence(&inputs);
            inputs = caches.iter().map(|c| c.h.clone()).collect();
            layers.push(caches);
        }
        let y = match inputs.last() {
            Some(h_last) => self.head_w.dot(h_last) + self.head_b[0],
            None => self.head_b[0],
        };
        (layers, y)
    }

    /// Add this sample's gradients (scaled by `scale`) and return its
    /// squared error.
    fn accumulate_gradients(&self, window: &[f64], target: f64, scale: f64, grads: &mut Gradients) -> f64 {
        let (layers, y) = self.forward_cached(window);
        let err = y - target;
        let dy = 2.0 * err * scale;

        let Some(h_last) = layers.last().and_then(|l| l.last()).map(|c| &c.h) else {
            return err * err;
        };
        grads.head_w.scaled_add(dy, h_last);
        grads.head_b[0] += dy;

        let mut dh_out = vec![Array1::zeros(self.hidden_size); window.len()];
        dh_out[window.len() - 1] = &self.head_w * dy;
        for (l, cell) in self.cells.iter().enumerate().rev() {
            dh_out = cell.backward_sequence(&layers[l], &dh_out, &mut grads.cells[l]);
        }

        err * err
    }
}

impl SequenceRegressor for LstmRegressor {
    fn from_config(config: &ForecastConfig) -> Self {
        LstmRegressor::new(config.hidden_size, config.num_layers, config.seed)
    }

    fn fit(&mut self, windows: &[Vec<f64>], targets: &[f64], config: &ForecastConfig) -> Result<f64, AppError> {
        if windows.is_empty() {
            return Err(AppError::InsufficientData { needed: 1, available: 0 });
        }
        if windows.len() != targets.len() {
            return Err(AppError::Computation(format!(
                "{} windows but {} targets",
                windows.len(),
                targets.len()
            )));
        }
        if windows.iter().any(|w| w.is_empty()) {
            return Err(AppError::Computation("empty training window".into()));
        }

        let n = windows.len();
        let batch_size = config.batch_size.max(1);
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
        let mut adam = Adam::new(self);
        let mut order: Vec<usize> = (0..n).collect();
        let mut epoch_loss = f64::NAN;

        for epoch in 0..config.epochs {
            order.shuffle(&mut rng);
            let mut total = 0.0;
            for batch in order.chunks(batch_size) {
                let mut grads = Gradients::zeros_like(self);
                let scale = 1.0 / batch.len() as f64;
                for &idx in batch {
                    total += self.accumulate_gradients(&windows[idx], targets[idx], scale, &mut grads);
                }
                grads.clip_norm(GRADIENT_CLIP);
                adam.step(self, &grads, config.learning_rate);
            }
            epoch_loss = total / n as f64;
            if !epoch_loss.is_finite() {
                return Err(AppError::Computation(format!(
                    "training diverged at epoch {}",
                    epoch + 1
                )));
            }
            debug!("Epoch {}/{}: loss={:.6}", epoch + 1, config.epochs, epoch_loss);
        }

        Ok(epoch_loss)
    }

    fn predict(&self, window: &[f64]) -> f64 {
        self.forward_cached(window).1
    }
}

// ── Gradients and optimiser ──

#[derive(Clone)]
struct CellGrads {
    w: Array2<f64>,
    b: Array1<f64>,
}

#[derive(Clone)]
struct Gradients {
    cells: Vec<CellGrads>,
    head_w: Array1<f64>,
    head_b: Array1<f64>,
}

impl Gradients {
    fn zeros_like(model: &LstmRegressor) -> Self {
        Gradients {
            cells: model
                .cells
                .iter()
                .map(|c| CellGrads {
                    w: Array2::zeros(c.w.raw_dim()),
                    b: Array1::zeros(c.b.raw_dim()),
                })
                .collect(),
            head_w: Array1::zeros(model.head_w.raw_dim()),
            head_b: Array1::zeros(1),
        }
    }

    fn clip_norm(&mut self, max_norm: f64) {
        let mut sq = self.head_w.mapv(|v| v * v).sum() + self.head_b.mapv(|v| v * v).sum();
        for c in &self.cells {
            sq += c.w.mapv(|v| v * v).sum() + c.b.mapv(|v| v * v).sum();
        }
        let norm = sq.sqrt();
        if norm > max_norm {
            let k = max_norm / norm;
            self.head_w *= k;
            self.head_b *= k;
            for c in &mut self.cells {
                c.w *= k;
                c.b *= k;
            }
        }
    }
}

struct Adam {
    m: Gradients,
    v: Gradients,
    t: i32,
}

impl Adam {
    fn new(model: &LstmRegressor) -> Self {
        let zeros = Gradients::zeros_like(model);
        Adam {
            m: zeros.clone(),
            v: zeros,
            t: 0,
        }
    }

    fn step(&mut self, model: &mut LstmRegressor, grads: &Gradients, lr: f64) {
        self.t += 1;
        let lr_t = lr * (1.0 - BETA2.powi(self.t)).sqrt() / (1.0 - BETA1.powi(self.t));

        for (l, cell) in model.cells.iter_mut().enumerate() {
            let g = &grads.cells[l];
            adam_update(&mut cell.w, &g.w, &mut self.m.cells[l].w, &mut self.v.cells[l].w, lr_t);
            adam_update(&mut cell.b, &g.b, &mut self.m.cells[l].b, &mut self.v.cells[l].b, lr_t);
        }
        adam_update(&mut model.head_w, &grads.head_w, &mut self.m.head_w, &mut self.v.head_w, lr_t);
        adam_update(&mut model.head_b, &grads.head_b, &mut self.m.head_b, &mut self.v.head_b, lr_t);
    }
}

fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr_t: f64,
) {
    Zip::from(param).and(grad).and(m).and(v).for_each(|p, &g, m, v| {
        *m = BETA1 * *m + (1.0 - BETA1) * g;
        *v = BETA2 * *v + (1.0 - BETA2) * g * g;
        *p -= lr_t * *m / (v.sqrt() + EPSILON);
    });
}

fn sigmoid(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    a.view().insert_axis(Axis(1)).dot(&b.view().insert_axis(Axis(0)))
}
