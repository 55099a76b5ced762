//! Lloyd's k-means over contiguous `d`-dimensional points.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Offset applied when an empty cluster is split off a populated one.
const SPLIT_EPS: f32 = 1e-7;

/// Centroid initialization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KMeansInit {
    /// First `k` points of a random permutation.
    #[default]
    Random,
    /// k-means++ seeding, proportional to squared distance.
    PlusPlus,
}

/// K-means trainer for one sub-space.
#[derive(Debug, Clone)]
pub struct KMeans {
    /// Number of centroids
    pub k: usize,
    /// Lloyd iterations
    pub niter: usize,
    /// Initialization strategy
    pub init: KMeansInit,
}

impl KMeans {
    pub fn new(k: usize, niter: usize) -> Self {
        Self {
            k,
            niter,
            init: KMeansInit::Random,
        }
    }

    pub fn with_init(mut self, init: KMeansInit) -> Self {
        self.init = init;
        self
    }

    /// Cluster `n = x.len() / d` points, returning `k * d` centroid values.
    ///
    /// Requires `n >= k`. Clusters that end an M-step empty are re-seeded by
    /// splitting a populated cluster, so every centroid stays in use.
    pub fn train(&self, x: &[f32], d: usize, rng: &mut StdRng) -> Vec<f32> {
        let n = x.len() / d;
        debug_assert!(n >= self.k, "k-means needs at least k points");

        let mut centroids = match self.init {
            KMeansInit::Random => random_init(x, n, d, self.k, rng),
            KMeansInit::PlusPlus => plus_plus_init(x, n, d, self.k, rng),
        };
        let mut codes = vec![0usize; n];
        for _ in 0..self.niter {
            e_step(x, &centroids, &mut codes, d);
            m_step(x, &mut centroids, &codes, d, self.k, rng);
        }
        centroids
    }
}

/// Squared L2 distance.
#[inline]
pub fn dist_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the centroid closest to `x` (lowest index on ties).
pub fn nearest(x: &[f32], centroids: &[f32], d: usize) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (j, c) in centroids.chunks_exact(d).enumerate() {
        let dist = dist_l2(x, c);
        if dist < best_dist {
            best_dist = dist;
            best = j;
        }
    }
    best
}

fn random_init(x: &[f32], n: usize, d: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(rng);
    let mut centroids = Vec::with_capacity(k * d);
    for &p in &perm[..k] {
        centroids.extend_from_slice(&x[p * d..(p + 1) * d]);
    }
    centroids
}

fn plus_plus_init(x: &[f32], n: usize, d: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let mut centroids = Vec::with_capacity(k * d);
    let mut distances = vec![f32::INFINITY; n];

    let first = rng.gen_range(0..n);
    centroids.extend_from_slice(&x[first * d..(first + 1) * d]);

    for _ in 1..k {
        let last = centroids.len() - d;
        for (i, dist) in distances.iter_mut().enumerate() {
            *dist = dist.min(dist_l2(&x[i * d..(i + 1) * d], &centroids[last..]));
        }

        let total: f32 = distances.iter().sum();
        let threshold = rng.gen::<f32>() * total;
        let mut cumsum = 0.0;
        let mut chosen = n - 1;
        for (i, &dist) in distances.iter().enumerate() {
            cumsum += dist;
            if cumsum >= threshold {
                chosen = i;
                break;
            }
        }
        centroids.extend_from_slice(&x[chosen * d..(chosen + 1) * d]);
    }
    centroids
}

fn e_step(x: &[f32], centroids: &[f32], codes: &mut [usize], d: usize) {
    for (code, point) in codes.iter_mut().zip(x.chunks_exact(d)) {
        *code = nearest(point, centroids, d);
    }
}

fn m_step(x: &[f32], centroids: &mut [f32], codes: &[usize], d: usize, k: usize, rng: &mut StdRng) {
    let n = codes.len();
    let mut nelts = vec![0usize; k];
    centroids.fill(0.0);
    for (&code, point) in codes.iter().zip(x.chunks_exact(d)) {
        for (c, v) in centroids[code * d..(code + 1) * d].iter_mut().zip(point) {
            *c += v;
        }
        nelts[code] += 1;
    }
    for (c, &count) in centroids.chunks_exact_mut(d).zip(&nelts) {
        if count != 0 {
            let z = count as f32;
            for v in c {
                *v /= z;
            }
        }
    }

    // Split a populated cluster into each empty one. Larger clusters are
    // more likely to be picked.
    let spare = (n - k) as f64;
    for empty in 0..k {
        if nelts[empty] != 0 {
            continue;
        }
        let mut m = 0;
        while nelts[m] < 2 || rng.gen::<f64>() * spare >= (nelts[m] - 1) as f64 {
            m = (m + 1) % k;
        }
        centroids.copy_within(m * d..(m + 1) * d, empty * d);
        for j in 0..d {
            let sign = if j % 2 == 1 { 1.0 } else { -1.0 };
            centroids[empty * d + j] += sign * SPLIT_EPS;
            centroids[m * d + j] -= sign * SPLIT_EPS;
        }
        nelts[empty] = nelts[m] / 2;
        nelts[m] -= nelts[empty];
    }
}
