//! Product-quantized matrix serving rows without expanding them.

use lightlm_core::traits::{check_row, check_width};
use lightlm_core::{DenseMatrix, Error, Result, RowMatrix};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::kmeans::KMeansInit;
use crate::product::ProductQuantizer;

/// Quantization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantConfig {
    /// Values per sub-space
    pub dsub: usize,
    /// Normalize rows and quantize their norms separately
    pub qnorm: bool,
    /// Seed for codebook training
    pub seed: u64,
    /// Centroid seeding for every codebook
    pub init: KMeansInit,
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            dsub: 2,
            qnorm: false,
            seed: 1234,
            init: KMeansInit::Random,
        }
    }
}

/// Immutable product-quantized replacement for a [`DenseMatrix`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantMatrix {
    rows: usize,
    cols: usize,
    pq: ProductQuantizer,
    codes: Vec<u8>,
    /// Norm quantizer and one norm code per row, when `qnorm` was set.
    norms: Option<(ProductQuantizer, Vec<u8>)>,
}

impl QuantMatrix {
    /// Quantize `matrix`. The source is left untouched.
    pub fn quantize(matrix: &DenseMatrix, config: &QuantConfig) -> Result<Self> {
        let (rows, cols) = (matrix.rows(), matrix.cols());
        let mut pq = ProductQuantizer::new(cols, config.dsub)?;

        let normalized;
        let (data, norms) = if config.qnorm {
            let row_norms = matrix.l2_norms()?;
            let mut m = matrix.clone();
            m.divide_row(&row_norms, 0, None)?;
            normalized = m;

            let mut npq = ProductQuantizer::new(1, 1)?;
            npq.train(&row_norms, config.seed, config.init)?;
            let norm_codes = npq.compute_codes(&row_norms);
            (normalized.as_slice(), Some((npq, norm_codes)))
        } else {
            (matrix.as_slice(), None)
        };

        pq.train(data, config.seed, config.init)?;
        let codes = pq.compute_codes(data);
        info!(
            rows,
            cols,
            dsub = config.dsub,
            qnorm = config.qnorm,
            ksub = pq.ksub(),
            "quantized matrix"
        );
        Ok(Self {
            rows,
            cols,
            pq,
            codes,
            norms,
        })
    }

    pub fn dsub(&self) -> usize {
        self.pq.dsub()
    }

    pub fn qnorm(&self) -> bool {
        self.norms.is_some()
    }

    /// Codes of row `i`.
    pub fn codes(&self, i: usize) -> Result<&[u8]> {
        check_row(i, self.rows)?;
        let n = self.pq.nsubq();
        Ok(&self.codes[i * n..(i + 1) * n])
    }

    /// Reconstructed norm of row `i`, `1.0` without `qnorm`.
    pub fn norm(&self, i: usize) -> Result<f32> {
        check_row(i, self.rows)?;
        Ok(match &self.norms {
            Some((npq, codes)) => npq.centroid(0, codes[i])[0],
            None => 1.0,
        })
    }

    /// Approximate row `i` in full precision.
    pub fn reconstruct_row(&self, i: usize) -> Result<Vec<f32>> {
        let mut out = vec![0.0; self.cols];
        self.add_row_to_vector(&mut out, i, 1.0)?;
        Ok(out)
    }

    /// Approximate the whole matrix.
    pub fn reconstruct(&self) -> Result<DenseMatrix> {
        let mut data = Vec::with_capacity(self.rows * self.cols);
        for i in 0..self.rows {
            data.extend(self.reconstruct_row(i)?);
        }
        DenseMatrix::from_vec(self.rows, self.cols, data)
    }

    /// Approximate storage footprint in bytes.
    pub fn size_in_bytes(&self) -> usize {
        let book = self.pq.nsubq() * self.pq.ksub() * self.pq.dsub() * 4;
        let norms = self.norms.as_ref().map_or(0, |(npq, c)| npq.ksub() * 4 + c.len());
        self.codes.len() + book + norms
    }

    fn check_consistent(&self) -> Result<()> {
        if self.codes.len() != self.rows * self.pq.nsubq() || !self.pq.is_trained() {
            return Err(Error::format("quantized matrix codes do not match its shape"));
        }
        Ok(())
    }

    /// Validate a matrix decoded from untrusted bytes.
    pub fn validate(&self) -> Result<()> {
        self.pq.validate()?;
        self.check_consistent()?;
        if self.pq.dim() != self.cols {
            return Err(Error::format("quantizer width does not match matrix"));
        }
        if self.codes.iter().any(|&c| c as usize >= self.pq.ksub()) {
            return Err(Error::format("code out of codebook range"));
        }
        if let Some((npq, codes)) = &self.norms {
            npq.validate()?;
            if npq.dim() != 1 {
                return Err(Error::format("norm quantizer must be one-dimensional"));
            }
            if codes.len() != self.rows {
                return Err(Error::format("norm codes do not match matrix"));
            }
            if codes.iter().any(|&c| c as usize >= npq.ksub()) {
                return Err(Error::format("norm code out of codebook range"));
            }
        }
        Ok(())
    }
}

impl RowMatrix for QuantMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn dot_row(&self, vec: &[f32], i: usize) -> Result<f32> {
        check_width(vec.len(), self.cols)?;
        let norm = self.norm(i)?;
        Ok(self.pq.mul_code(vec, self.codes(i)?, norm))
    }

    fn add_row_to_vector(&self, out: &mut [f32], i: usize, scale: f32) -> Result<()> {
        check_width(out.len(), self.cols)?;
        let norm = self.norm(i)?;
        self.pq.add_code(out, self.codes(i)?, scale * norm);
        Ok(())
    }
}
