//! Output layers: softmax, hierarchical softmax, negative sampling and
//! one-vs-all.

use std::cmp::Ordering;

use lightlm_core::{Error, Result, RowMatrix, RowUpdate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::args::LossKind;
use crate::model::ModelState;
use crate::tree::HuffmanTree;

pub const SIGMOID_TABLE_SIZE: usize = 512;
pub const MAX_SIGMOID: f32 = 8.0;
pub const LOG_TABLE_SIZE: usize = 512;
pub const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

/// A scored class: `(log-probability, id)`.
pub type Scored = (f32, u32);

/// Higher scores first, then lower ids.
pub fn by_score(a: &Scored, b: &Scored) -> Ordering {
    b.0.total_cmp(&a.0).then(a.1.cmp(&b.1))
}

/// `ln(x + 1e-5)`, finite for probabilities of zero.
#[inline]
pub fn std_log(x: f32) -> f32 {
    (x + 1e-5).ln()
}

/// Lookup tables for the sigmoid and log used while training.
#[derive(Debug, Clone)]
pub struct LossTables {
    sigmoid: Vec<f32>,
    log: Vec<f32>,
}

impl Default for LossTables {
    fn default() -> Self {
        let sigmoid = (0..=SIGMOID_TABLE_SIZE)
            .map(|i| {
                let x = (i as f64 * 2.0 * MAX_SIGMOID as f64) / SIGMOID_TABLE_SIZE as f64
                    - MAX_SIGMOID as f64;
                (1.0 / (1.0 + (-x).exp())) as f32
            })
            .collect();
        let log = (0..=LOG_TABLE_SIZE)
            .map(|i| ((i as f64 + 1e-5) / LOG_TABLE_SIZE as f64).ln() as f32)
            .collect();
        Self { sigmoid, log }
    }
}

impl LossTables {
    #[inline]
    pub fn sigmoid(&self, x: f32) -> f32 {
        if x < -MAX_SIGMOID {
            0.0
        } else if x > MAX_SIGMOID {
            1.0
        } else {
            let i = ((x + MAX_SIGMOID) * SIGMOID_TABLE_SIZE as f32 / MAX_SIGMOID / 2.0) as usize;
            self.sigmoid[i.min(SIGMOID_TABLE_SIZE)]
        }
    }

    #[inline]
    pub fn log(&self, x: f32) -> f32 {
        if x > 1.0 {
            return 0.0;
        }
        let i = (x * LOG_TABLE_SIZE as f32) as usize;
        self.log[i.min(LOG_TABLE_SIZE)]
    }
}

#[derive(Debug, Clone)]
enum Objective {
    Softmax,
    OneVsAll,
    NegativeSampling { neg: usize, table: Vec<u32> },
    Hierarchical(HuffmanTree),
}

/// Loss over an output matrix with one row per class.
#[derive(Debug, Clone)]
pub struct Loss {
    kind: LossKind,
    nclasses: usize,
    tables: LossTables,
    objective: Objective,
}

impl Loss {
    /// Loss ready for training. Negative sampling draws from a shuffled
    /// table where each class appears in proportion to `count^0.5`.
    pub fn for_training(kind: LossKind, counts: &[u64], neg: usize, seed: u64) -> Self {
        let mut loss = Self::for_inference(kind, counts);
        if kind == LossKind::NegativeSampling {
            loss.objective = Objective::NegativeSampling {
                neg,
                table: negative_table(counts, seed),
            };
        }
        loss
    }

    /// Loss for prediction only; no sampling table is built.
    pub fn for_inference(kind: LossKind, counts: &[u64]) -> Self {
        let objective = match kind {
            LossKind::Softmax => Objective::Softmax,
            LossKind::OneVsAll => Objective::OneVsAll,
            LossKind::NegativeSampling => Objective::NegativeSampling {
                neg: 0,
                table: Vec::new(),
            },
            LossKind::HierarchicalSoftmax => Objective::Hierarchical(HuffmanTree::new(counts)),
        };
        Self {
            kind,
            nclasses: counts.len(),
            tables: LossTables::default(),
            objective,
        }
    }

    pub fn kind(&self) -> LossKind {
        self.kind
    }

    pub fn nclasses(&self) -> usize {
        self.nclasses
    }

    pub fn tables(&self) -> &LossTables {
        &self.tables
    }

    /// Forward pass for `targets[target_index]` followed by the in-place
    /// update of `wo`. The input gradient accumulates into `state.grad`.
    pub fn forward<O: RowUpdate>(
        &self,
        wo: &O,
        targets: &[u32],
        target_index: usize,
        state: &mut ModelState,
        lr: f32,
    ) -> Result<f32> {
        let target = *targets
            .get(target_index)
            .ok_or_else(|| Error::bounds("targets", target_index, targets.len()))? as usize;

        match &self.objective {
            Objective::Softmax => {
                self.compute_output(wo, state)?;
                for i in 0..wo.rows() {
                    let label = if i == target { 1.0 } else { 0.0 };
                    let alpha = lr * (label - state.output[i]);
                    wo.add_row_to_vector(state.grad.as_mut_slice(), i, alpha)?;
                    wo.add_vector_to_row(state.hidden.as_slice(), i, alpha)?;
                }
                Ok(-self.tables.log(state.output[target]))
            }
            Objective::OneVsAll => {
                let mut loss = 0.0;
                for i in 0..wo.rows() {
                    let is_match = targets.contains(&(i as u32));
                    loss += self.binary_logistic(wo, i, state, is_match, lr)?;
                }
                Ok(loss)
            }
            Objective::NegativeSampling { neg, table } => {
                let mut loss = self.binary_logistic(wo, target, state, true, lr)?;
                if self.nclasses > 1 && !table.is_empty() {
                    for _ in 0..*neg {
                        let negative = loop {
                            let n = table[state.rng.gen_range(0..table.len())];
                            if n as usize != target {
                                break n as usize;
                            }
                        };
                        loss += self.binary_logistic(wo, negative, state, false, lr)?;
                    }
                }
                Ok(loss)
            }
            Objective::Hierarchical(tree) => {
                if target >= tree.nleaves() {
                    return Err(Error::bounds("class", target, tree.nleaves()));
                }
                let mut loss = 0.0;
                for (&row, &branch) in tree.path(target).iter().zip(tree.code(target)) {
                    loss += self.binary_logistic(wo, row as usize, state, branch, lr)?;
                }
                Ok(loss)
            }
        }
    }

    fn binary_logistic<O: RowUpdate>(
        &self,
        wo: &O,
        row: usize,
        state: &mut ModelState,
        label: bool,
        lr: f32,
    ) -> Result<f32> {
        let score = self.tables.sigmoid(wo.dot_row(state.hidden.as_slice(), row)?);
        let alpha = lr * (if label { 1.0 } else { 0.0 } - score);
        wo.add_row_to_vector(state.grad.as_mut_slice(), row, alpha)?;
        wo.add_vector_to_row(state.hidden.as_slice(), row, alpha)?;
        Ok(if label {
            -self.tables.log(score)
        } else {
            -self.tables.log(1.0 - score)
        })
    }

    /// Class probabilities for `state.hidden` into `state.output`.
    ///
    /// Softmax normalizes across classes; the binary objectives score each
    /// class independently with a sigmoid.
    pub fn compute_output<O: RowMatrix>(&self, wo: &O, state: &mut ModelState) -> Result<()> {
        state.output.mul_matrix(wo, state.hidden.as_slice())?;
        let output = state.output.as_mut_slice();
        match self.objective {
            Objective::Softmax => {
                let max = output.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut z = 0.0;
                for v in output.iter_mut() {
                    *v = (*v - max).exp();
                    z += *v;
                }
                for v in output.iter_mut() {
                    *v /= z;
                }
            }
            _ => {
                for v in output.iter_mut() {
                    *v = sigmoid(*v);
                }
            }
        }
        Ok(())
    }

    /// Top `k` classes with probability at least `threshold`, scored by
    /// log-probability.
    pub fn predict<O: RowMatrix>(
        &self,
        wo: &O,
        k: usize,
        threshold: f32,
        state: &mut ModelState,
    ) -> Result<Vec<Scored>> {
        let mut best = Vec::with_capacity(k + 1);
        if k == 0 {
            return Ok(best);
        }
        if let Objective::Hierarchical(tree) = &self.objective {
            self.dfs(tree, wo, k, std_log(threshold), tree.root(), 0.0, &mut best, state)?;
        } else {
            self.compute_output(wo, state)?;
            for (i, &p) in state.output.as_slice().iter().enumerate() {
                if p < threshold {
                    continue;
                }
                push_best(&mut best, (std_log(p), i as u32), k);
            }
        }
        best.sort_by(by_score);
        Ok(best)
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs<O: RowMatrix>(
        &self,
        tree: &HuffmanTree,
        wo: &O,
        k: usize,
        threshold: f32,
        node: usize,
        score: f32,
        best: &mut Vec<Scored>,
        state: &ModelState,
    ) -> Result<()> {
        if score < threshold {
            return Ok(());
        }
        if best.len() == k && best.last().is_some_and(|worst| score < worst.0) {
            return Ok(());
        }
        if tree.is_leaf(node) {
            push_best(best, (score, node as u32), k);
            return Ok(());
        }
        let f = sigmoid(wo.dot_row(state.hidden.as_slice(), node - tree.nleaves())?);
        let n = tree.node(node);
        if let Some(left) = n.left {
            self.dfs(tree, wo, k, threshold, left as usize, score + std_log(1.0 - f), best, state)?;
        }
        if let Some(right) = n.right {
            self.dfs(tree, wo, k, threshold, right as usize, score + std_log(f), best, state)?;
        }
        Ok(())
    }
}

/// Insert keeping `best` sorted and at most `k` long.
fn push_best(best: &mut Vec<Scored>, item: Scored, k: usize) {
    let pos = best
        .binary_search_by(|probe| by_score(probe, &item))
        .unwrap_or_else(|e| e);
    if pos < k {
        best.insert(pos, item);
        best.truncate(k);
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn negative_table(counts: &[u64], seed: u64) -> Vec<u32> {
    let z: f64 = counts.iter().map(|&c| (c as f64).sqrt()).sum();
    if z == 0.0 {
        return Vec::new();
    }
    let mut table = Vec::with_capacity(NEGATIVE_TABLE_SIZE + counts.len());
    for (i, &c) in counts.iter().enumerate() {
        let n = ((c as f64).sqrt() * NEGATIVE_TABLE_SIZE as f64 / z).ceil() as usize;
        table.extend(std::iter::repeat(i as u32).take(n));
    }
    table.shuffle(&mut StdRng::seed_from_u64(seed));
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightlm_core::{DenseMatrix, SharedMatrix, UpdatePolicy};

    fn shared(rows: usize, cols: usize, seed: u64) -> SharedMatrix {
        let mut m = DenseMatrix::new(rows, cols).unwrap();
        m.uniform(0.5, seed);
        SharedMatrix::from_dense(m, UpdatePolicy::Hogwild)
    }

    fn state_with_hidden(hidden: &[f32], osz: usize) -> ModelState {
        let mut state = ModelState::new(hidden.len(), osz, 0).unwrap();
        state.hidden.as_mut_slice().copy_from_slice(hidden);
        state
    }

    #[test]
    fn test_tables_track_exact_functions() {
        let t = LossTables::default();
        for x in [-7.5f32, -1.0, 0.0, 0.3, 4.0] {
            assert!((t.sigmoid(x) - sigmoid(x)).abs() < 0.02);
        }
        assert_eq!(t.sigmoid(-9.0), 0.0);
        assert_eq!(t.sigmoid(9.0), 1.0);
        assert_eq!(t.sigmoid(MAX_SIGMOID), t.sigmoid[SIGMOID_TABLE_SIZE]);
        assert!((t.log(0.5) - 0.5f32.ln()).abs() < 0.01);
        assert_eq!(t.log(1.5), 0.0);
    }

    #[test]
    fn test_softmax_output_sums_to_one() {
        let wo = shared(4, 3, 1);
        let loss = Loss::for_inference(LossKind::Softmax, &[1, 1, 1, 1]);
        let mut state = state_with_hidden(&[0.2, -0.4, 1.0], 4);
        loss.compute_output(&wo, &mut state).unwrap();
        let sum: f32 = state.output.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_forward_reduces_loss() {
        for kind in [
            LossKind::Softmax,
            LossKind::OneVsAll,
            LossKind::NegativeSampling,
            LossKind::HierarchicalSoftmax,
        ] {
            let wo = shared(3, 4, 2);
            let loss = Loss::for_training(kind, &[5, 3, 1], 2, 0);
            let hidden = [0.5, -0.5, 0.25, 1.0];
            let mut state = state_with_hidden(&hidden, 3);
            let first = loss.forward(&wo, &[1], 0, &mut state, 0.5).unwrap();
            let mut last = first;
            for _ in 0..20 {
                last = loss.forward(&wo, &[1], 0, &mut state, 0.5).unwrap();
            }
            assert!(last < first, "{kind}: {last} >= {first}");
            assert!(state.grad.as_slice().iter().any(|&g| g != 0.0));
        }
    }

    #[test]
    fn test_forward_rejects_bad_target_index() {
        let wo = shared(2, 2, 0);
        let loss = Loss::for_inference(LossKind::Softmax, &[1, 1]);
        let mut state = state_with_hidden(&[1.0, 1.0], 2);
        assert!(loss.forward(&wo, &[0], 3, &mut state, 0.1).is_err());
    }

    #[test]
    fn test_predict_orders_by_score_then_id() {
        // Zero weights give every class the same probability.
        let wo = SharedMatrix::from_dense(DenseMatrix::new(4, 2).unwrap(), UpdatePolicy::Hogwild);
        let loss = Loss::for_inference(LossKind::Softmax, &[1, 1, 1, 1]);
        let mut state = state_with_hidden(&[1.0, 1.0], 4);
        let top = loss.predict(&wo, 3, 0.0, &mut state).unwrap();
        assert_eq!(top.iter().map(|p| p.1).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!((top[0].0 - std_log(0.25)).abs() < 1e-6);

        let none = loss.predict(&wo, 3, 0.5, &mut state).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_hierarchical_predict_is_a_distribution() {
        let wo = shared(5, 3, 7);
        let loss = Loss::for_inference(LossKind::HierarchicalSoftmax, &[10, 8, 4, 2, 1]);
        let mut state = state_with_hidden(&[0.1, 0.2, -0.3], 5);
        let all = loss.predict(&wo, 5, 0.0, &mut state).unwrap();
        assert_eq!(all.len(), 5);
        let total: f32 = all.iter().map(|p| p.0.exp()).sum();
        assert!((total - 1.0).abs() < 1e-3);
        for pair in all.windows(2) {
            assert_ne!(by_score(&pair[0], &pair[1]), Ordering::Greater);
        }
    }

    #[test]
    fn test_negative_table_covers_every_class() {
        let table = negative_table(&[100, 1], 3);
        assert!(table.contains(&1));
        let ones = table.iter().filter(|&&c| c == 1).count() as f64;
        let ratio = ones / table.len() as f64;
        assert!((ratio - 1.0 / 11.0).abs() < 1e-3);
    }
}
