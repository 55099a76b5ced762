//! Two-layer linear model: pooled input rows, then a loss over output rows.

use lightlm_core::{DenseMatrix, Error, Result, RowMatrix, RowUpdate, Vector};
use lightlm_quant::QuantMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::args::Pooling;
use crate::loss::{Loss, Scored};

/// Per-worker scratch space and running loss.
///
/// Never shared between threads.
#[derive(Debug, Clone)]
pub struct ModelState {
    pub hidden: Vector,
    pub output: Vector,
    pub grad: Vector,
    pub rng: StdRng,
    loss_sum: f64,
    nexamples: u64,
}

impl ModelState {
    pub fn new(hidden_size: usize, output_size: usize, seed: u64) -> Result<Self> {
        Ok(Self {
            hidden: Vector::new(hidden_size)?,
            output: Vector::new(output_size)?,
            grad: Vector::new(hidden_size)?,
            rng: StdRng::seed_from_u64(seed),
            loss_sum: 0.0,
            nexamples: 0,
        })
    }

    /// Mean loss per example since the last reset.
    pub fn loss(&self) -> f64 {
        if self.nexamples == 0 {
            0.0
        } else {
            self.loss_sum / self.nexamples as f64
        }
    }

    pub fn nexamples(&self) -> u64 {
        self.nexamples
    }

    pub fn reset_loss(&mut self) {
        self.loss_sum = 0.0;
        self.nexamples = 0;
    }

    fn record(&mut self, loss: f32) {
        self.loss_sum += loss as f64;
        self.nexamples += 1;
    }
}

/// Stored weights of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Weights {
    Dense(DenseMatrix),
    Quantized(QuantMatrix),
}

impl Weights {
    pub fn is_quantized(&self) -> bool {
        matches!(self, Weights::Quantized(_))
    }

    pub fn as_dense(&self) -> Option<&DenseMatrix> {
        match self {
            Weights::Dense(m) => Some(m),
            Weights::Quantized(_) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Weights::Dense(m) => {
                if m.as_slice().len() != m.rows() * m.cols() {
                    return Err(Error::format("matrix data does not match its shape"));
                }
                Ok(())
            }
            Weights::Quantized(q) => q.validate(),
        }
    }
}

impl RowMatrix for Weights {
    fn rows(&self) -> usize {
        match self {
            Weights::Dense(m) => m.rows(),
            Weights::Quantized(q) => q.rows(),
        }
    }

    fn cols(&self) -> usize {
        match self {
            Weights::Dense(m) => m.cols(),
            Weights::Quantized(q) => q.cols(),
        }
    }

    fn dot_row(&self, vec: &[f32], i: usize) -> Result<f32> {
        match self {
            Weights::Dense(m) => m.dot_row(vec, i),
            Weights::Quantized(q) => q.dot_row(vec, i),
        }
    }

    fn add_row_to_vector(&self, out: &mut [f32], i: usize, scale: f32) -> Result<()> {
        match self {
            Weights::Dense(m) => m.add_row_to_vector(out, i, scale),
            Weights::Quantized(q) => q.add_row_to_vector(out, i, scale),
        }
    }
}

/// Input matrix `wi`, output matrix `wo` and the loss tying them together.
///
/// Generic over storage so the same code trains on [`SharedMatrix`] rows
/// and serves from dense or quantized [`Weights`].
///
/// [`SharedMatrix`]: lightlm_core::SharedMatrix
#[derive(Debug)]
pub struct Model<I, O> {
    wi: I,
    wo: O,
    loss: Loss,
    normalize_gradient: bool,
    pooling: Pooling,
}

impl<I: RowMatrix, O: RowMatrix> Model<I, O> {
    pub fn new(wi: I, wo: O, loss: Loss, normalize_gradient: bool, pooling: Pooling) -> Result<Self> {
        if wi.cols() != wo.cols() {
            return Err(Error::dimension_mismatch(wi.cols(), wo.cols()));
        }
        if loss.nclasses() != wo.rows() {
            return Err(Error::dimension_mismatch(wo.rows(), loss.nclasses()));
        }
        Ok(Self {
            wi,
            wo,
            loss,
            normalize_gradient,
            pooling,
        })
    }

    pub fn input(&self) -> &I {
        &self.wi
    }

    pub fn output(&self) -> &O {
        &self.wo
    }

    pub fn loss(&self) -> &Loss {
        &self.loss
    }

    pub fn into_parts(self) -> (I, O) {
        (self.wi, self.wo)
    }

    /// Scratch state sized for this model.
    pub fn state(&self, seed: u64) -> Result<ModelState> {
        ModelState::new(self.wi.cols(), self.wo.rows(), seed)
    }

    /// Pool the rows of `input` into `state.hidden`.
    pub fn compute_hidden(&self, input: &[u32], state: &mut ModelState) -> Result<()> {
        let hidden = &mut state.hidden;
        hidden.zero();
        for &row in input {
            hidden.add_row(&self.wi, row as usize, 1.0)?;
        }
        if self.pooling == Pooling::Mean && !input.is_empty() {
            hidden.mul(1.0 / input.len() as f32);
        }
        Ok(())
    }

    /// Top `k` classes for `input` with probability at least `threshold`.
    ///
    /// An empty input has no hidden vector and predicts nothing.
    pub fn predict(
        &self,
        input: &[u32],
        k: usize,
        threshold: f32,
        state: &mut ModelState,
    ) -> Result<Vec<Scored>> {
        if input.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.compute_hidden(input, state)?;
        self.loss.predict(&self.wo, k, threshold, state)
    }
}

impl<I: RowUpdate, O: RowUpdate> Model<I, O> {
    /// One SGD step on `targets[target_index]`.
    ///
    /// Updates output rows inside the loss and then every input row in
    /// `input` with the accumulated gradient.
    pub fn update(
        &self,
        input: &[u32],
        targets: &[u32],
        target_index: usize,
        lr: f32,
        state: &mut ModelState,
    ) -> Result<()> {
        if input.is_empty() {
            return Ok(());
        }
        self.compute_hidden(input, state)?;
        state.grad.zero();
        let loss = self.loss.forward(&self.wo, targets, target_index, state, lr)?;
        state.record(loss);

        if self.normalize_gradient {
            state.grad.mul(1.0 / input.len() as f32);
        }
        for &row in input {
            self.wi.add_vector_to_row(state.grad.as_slice(), row as usize, 1.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::LossKind;
    use lightlm_core::{SharedMatrix, UpdatePolicy};

    fn model(kind: LossKind, pooling: Pooling) -> Model<SharedMatrix, SharedMatrix> {
        let mut wi = DenseMatrix::new(6, 4).unwrap();
        wi.uniform(0.25, 1);
        let wo = DenseMatrix::new(3, 4).unwrap();
        Model::new(
            SharedMatrix::from_dense(wi, UpdatePolicy::Hogwild),
            SharedMatrix::from_dense(wo, UpdatePolicy::Hogwild),
            Loss::for_training(kind, &[4, 2, 1], 2, 0),
            true,
            pooling,
        )
        .unwrap()
    }

    #[test]
    fn test_mean_and_sum_pooling() {
        let mean = model(LossKind::Softmax, Pooling::Mean);
        let sum = model(LossKind::Softmax, Pooling::Sum);
        let mut a = mean.state(0).unwrap();
        let mut b = sum.state(0).unwrap();
        mean.compute_hidden(&[0, 1], &mut a).unwrap();
        sum.compute_hidden(&[0, 1], &mut b).unwrap();
        for j in 0..4 {
            assert!((a.hidden[j] * 2.0 - b.hidden[j]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_empty_input_is_noop() {
        let m = model(LossKind::Softmax, Pooling::Mean);
        let mut state = m.state(0).unwrap();
        m.update(&[], &[0], 0, 0.1, &mut state).unwrap();
        assert_eq!(state.nexamples(), 0);
        assert!(!m.output().any_nonzero());
        assert!(m.predict(&[], 2, 0.0, &mut state).unwrap().is_empty());
    }

    #[test]
    fn test_update_learns_target() {
        let m = model(LossKind::Softmax, Pooling::Mean);
        let mut state = m.state(0).unwrap();
        for _ in 0..50 {
            m.update(&[2, 3], &[1], 0, 0.5, &mut state).unwrap();
        }
        let top = m.predict(&[2, 3], 1, 0.0, &mut state).unwrap();
        assert_eq!(top[0].1, 1);
        assert!(state.loss() > 0.0);
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let wi = DenseMatrix::new(4, 3).unwrap();
        let wo = DenseMatrix::new(2, 5).unwrap();
        let loss = Loss::for_inference(LossKind::Softmax, &[1, 1]);
        let err = Model::new(wi, wo, loss, true, Pooling::Mean).unwrap_err();
        assert_eq!(err.category(), "bounds");
    }

    #[test]
    fn test_out_of_range_row_is_error() {
        let m = model(LossKind::Softmax, Pooling::Mean);
        let mut state = m.state(0).unwrap();
        assert!(m.update(&[99], &[0], 0, 0.1, &mut state).is_err());
    }
}
