//! Product quantizer: one k-means codebook per contiguous sub-space.

use lightlm_core::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::kmeans::{nearest, KMeans, KMeansInit};

/// Bits per code.
pub const NBITS: u32 = 8;
/// Centroids per sub-space.
pub const KSUB: usize = 1 << NBITS;
/// Lloyd iterations per sub-space.
pub const NITER: usize = 25;
/// Cap on the training sample, per centroid.
pub const MAX_POINTS_PER_CLUSTER: usize = 256;

/// Product quantizer over `dim`-wide vectors split into `dim / dsub` parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dim: usize,
    dsub: usize,
    nsubq: usize,
    ksub: usize,
    /// `nsubq * ksub * dsub` values; sub-space `m`, centroid `c` starts at
    /// `(m * ksub + c) * dsub`.
    centroids: Vec<f32>,
}

impl ProductQuantizer {
    /// Create an untrained quantizer.
    ///
    /// `dim` must be a non-zero multiple of `dsub`.
    pub fn new(dim: usize, dsub: usize) -> Result<Self> {
        if dsub == 0 {
            return Err(Error::config("dsub", "sub-space size must be non-zero"));
        }
        if dim == 0 || dim % dsub != 0 {
            return Err(Error::config(
                "dsub",
                format!("dimension {dim} is not divisible by dsub {dsub}"),
            ));
        }
        Ok(Self {
            dim,
            dsub,
            nsubq: dim / dsub,
            ksub: KSUB,
            centroids: Vec::new(),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn dsub(&self) -> usize {
        self.dsub
    }

    /// Number of sub-spaces, i.e. codes per vector.
    pub fn nsubq(&self) -> usize {
        self.nsubq
    }

    /// Centroids per sub-space.
    pub fn ksub(&self) -> usize {
        self.ksub
    }

    /// Train codebooks on `x`, `n` rows of `dim` values.
    ///
    /// With fewer rows than [`KSUB`] the codebooks shrink to one centroid
    /// per row. At most `MAX_POINTS_PER_CLUSTER * ksub` rows are sampled.
    /// Sub-spaces train in parallel, each with its own generator derived
    /// from `seed`, starting from centroids picked by `init`.
    pub fn train(&mut self, x: &[f32], seed: u64, init: KMeansInit) -> Result<()> {
        if x.is_empty() || x.len() % self.dim != 0 {
            return Err(Error::dimension_mismatch(self.dim, x.len()));
        }
        let n = x.len() / self.dim;
        self.ksub = KSUB.min(n);
        let np = n.min(MAX_POINTS_PER_CLUSTER * self.ksub);
        let (dim, dsub, ksub) = (self.dim, self.dsub, self.ksub);
        debug!(rows = n, sampled = np, nsubq = self.nsubq, ksub, "training product quantizer");

        let kmeans = KMeans::new(ksub, NITER).with_init(init);
        let books: Vec<Vec<f32>> = (0..self.nsubq)
            .into_par_iter()
            .map(|m| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(m as u64));
                let mut perm: Vec<usize> = (0..n).collect();
                if np != n {
                    perm.shuffle(&mut rng);
                }
                let mut slice = Vec::with_capacity(np * dsub);
                for &row in &perm[..np] {
                    let start = row * dim + m * dsub;
                    slice.extend_from_slice(&x[start..start + dsub]);
                }
                kmeans.train(&slice, dsub, &mut rng)
            })
            .collect();
        self.centroids = books.concat();
        Ok(())
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Check the codebook shape of a quantizer decoded from untrusted bytes.
    pub fn validate(&self) -> Result<()> {
        if self.dsub == 0 || self.dim == 0 || self.nsubq * self.dsub != self.dim {
            return Err(Error::format(format!(
                "quantizer splits dimension {} into {} sub-spaces of {}",
                self.dim, self.nsubq, self.dsub
            )));
        }
        if self.ksub == 0 || self.ksub > KSUB {
            return Err(Error::format(format!(
                "{} centroids per sub-space, expected 1..={KSUB}",
                self.ksub
            )));
        }
        let expected = self.nsubq * self.ksub * self.dsub;
        if self.centroids.len() != expected {
            return Err(Error::format(format!(
                "codebook holds {} values, expected {expected}",
                self.centroids.len()
            )));
        }
        if self.centroids.iter().any(|v| !v.is_finite()) {
            return Err(Error::format("codebook holds non-finite values"));
        }
        Ok(())
    }

    /// Centroid `c` of sub-space `m`.
    #[inline]
    pub fn centroid(&self, m: usize, c: u8) -> &[f32] {
        let start = (m * self.ksub + c as usize) * self.dsub;
        &self.centroids[start..start + self.dsub]
    }

    /// Codes for `n` rows of `x`, `nsubq` codes per row.
    pub fn compute_codes(&self, x: &[f32]) -> Vec<u8> {
        let mut codes = vec![0u8; x.len() / self.dim * self.nsubq];
        codes
            .par_chunks_mut(self.nsubq)
            .zip(x.par_chunks(self.dim))
            .for_each(|(code, row)| self.compute_code(row, code));
        codes
    }

    fn compute_code(&self, row: &[f32], code: &mut [u8]) {
        let book_len = self.ksub * self.dsub;
        for (m, c) in code.iter_mut().enumerate() {
            let sub = &row[m * self.dsub..(m + 1) * self.dsub];
            let book = &self.centroids[m * book_len..(m + 1) * book_len];
            // ksub <= 256, so the index fits.
            *c = nearest(sub, book, self.dsub) as u8;
        }
    }

    /// `out += alpha * decode(code)`.
    pub fn add_code(&self, out: &mut [f32], code: &[u8], alpha: f32) {
        for (m, &c) in code.iter().enumerate() {
            let centroid = self.centroid(m, c);
            for (o, v) in out[m * self.dsub..(m + 1) * self.dsub].iter_mut().zip(centroid) {
                *o += alpha * v;
            }
        }
    }

    /// `alpha * (x . decode(code))`.
    pub fn mul_code(&self, x: &[f32], code: &[u8], alpha: f32) -> f32 {
        let mut res = 0.0;
        for (m, &c) in code.iter().enumerate() {
            let centroid = self.centroid(m, c);
            res += x[m * self.dsub..(m + 1) * self.dsub]
                .iter()
                .zip(centroid)
                .map(|(a, b)| a * b)
                .sum::<f32>();
        }
        res * alpha
    }
}
