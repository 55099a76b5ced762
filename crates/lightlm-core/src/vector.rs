//! Dense `f32` vectors.

use std::ops::{Index, IndexMut};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::traits::{check_width, RowMatrix};

/// Fixed-length vector of `f32` values.
///
/// A `Vector` never changes length after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    /// Create a zero-filled vector of `len` elements.
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::config("length", "vector length must be non-zero"));
        }
        Ok(Self {
            data: vec![0.0; len],
        })
    }

    /// Wrap existing values.
    pub fn from_vec(data: Vec<f32>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::config("length", "vector length must be non-zero"));
        }
        Ok(Self { data })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; kept for slice-like ergonomics.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Checked element read.
    pub fn get(&self, i: usize) -> Result<f32> {
        self.data
            .get(i)
            .copied()
            .ok_or_else(|| Error::bounds("vector", i, self.data.len()))
    }

    /// Checked element write.
    pub fn set(&mut self, i: usize, value: f32) -> Result<()> {
        let len = self.data.len();
        let slot = self
            .data
            .get_mut(i)
            .ok_or_else(|| Error::bounds("vector", i, len))?;
        *slot = value;
        Ok(())
    }

    /// Set every element to zero.
    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Fill with `U(-bound, bound)` drawn from a generator seeded with `seed`.
    pub fn uniform(&mut self, bound: f32, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for v in &mut self.data {
            *v = rng.gen_range(-bound..=bound);
        }
    }

    /// Multiply every element by `a`.
    pub fn mul(&mut self, a: f32) {
        for v in &mut self.data {
            *v *= a;
        }
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Dot product with another vector of the same length.
    pub fn dot(&self, other: &Vector) -> Result<f32> {
        check_width(other.len(), self.len())?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum())
    }

    /// `self += source`.
    pub fn add_vector(&mut self, source: &Vector) -> Result<()> {
        self.add_vector_scaled(source, 1.0)
    }

    /// `self += s * source`.
    pub fn add_vector_scaled(&mut self, source: &Vector, s: f32) -> Result<()> {
        check_width(source.len(), self.len())?;
        for (d, v) in self.data.iter_mut().zip(source.data.iter()) {
            *d += s * v;
        }
        Ok(())
    }

    /// Accumulate `scale * A[i]` into this vector.
    pub fn add_row<M: RowMatrix + ?Sized>(&mut self, a: &M, i: usize, scale: f32) -> Result<()> {
        check_width(self.len(), a.cols())?;
        a.add_row_to_vector(&mut self.data, i, scale)
    }

    /// Overwrite this vector with `A · source`.
    pub fn mul_matrix<M: RowMatrix + ?Sized>(&mut self, a: &M, source: &[f32]) -> Result<()> {
        if a.rows() != self.len() {
            return Err(Error::dimension_mismatch(self.len(), a.rows()));
        }
        check_width(source.len(), a.cols())?;
        for (i, out) in self.data.iter_mut().enumerate() {
            *out = a.dot_row(source, i)?;
        }
        Ok(())
    }

    /// Index of the largest element (first one on ties).
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, &v) in self.data.iter().enumerate().skip(1) {
            if v > self.data[best] {
                best = i;
            }
        }
        best
    }
}

impl Index<usize> for Vector {
    type Output = f32;

    fn index(&self, i: usize) -> &f32 {
        &self.data[i]
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, i: usize) -> &mut f32 {
        &mut self.data[i]
    }
}

impl AsRef<[f32]> for Vector {
    fn as_ref(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DenseMatrix;

    #[test]
    fn test_new_is_zeroed() {
        let v = Vector::new(10).unwrap();
        assert_eq!(v.len(), 10);
        assert!(v.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_zero_length_rejected() {
        let err = Vector::new(0).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_zero_after_uniform() {
        let mut v = Vector::new(16).unwrap();
        v.uniform(1.0, 7);
        assert!(v.as_slice().iter().any(|&x| x != 0.0));
        v.zero();
        assert!(v.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_uniform_is_seeded() {
        let mut a = Vector::new(8).unwrap();
        let mut b = Vector::new(8).unwrap();
        a.uniform(0.5, 42);
        b.uniform(0.5, 42);
        assert_eq!(a, b);
        assert!(a.as_slice().iter().all(|x| x.abs() <= 0.5));
    }

    #[test]
    fn test_arithmetic() {
        let mut a = Vector::from_vec(vec![1.0, 2.0, 3.0]).unwrap();
        let b = Vector::from_vec(vec![1.0, 1.0, 1.0]).unwrap();
        assert_eq!(a.dot(&b).unwrap(), 6.0);
        a.add_vector_scaled(&b, 2.0).unwrap();
        assert_eq!(a.as_slice(), &[3.0, 4.0, 5.0]);
        a.mul(0.5);
        assert_eq!(a.as_slice(), &[1.5, 2.0, 2.5]);
        assert_eq!(a.argmax(), 2);
    }

    #[test]
    fn test_length_mismatch() {
        let mut a = Vector::new(3).unwrap();
        let b = Vector::new(4).unwrap();
        assert!(matches!(
            a.add_vector(&b),
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_checked_access() {
        let mut v = Vector::new(2).unwrap();
        v.set(1, 4.0).unwrap();
        assert_eq!(v.get(1).unwrap(), 4.0);
        assert!(matches!(v.get(2), Err(Error::Bounds { index: 2, .. })));
        assert!(v.set(5, 1.0).is_err());
    }

    #[test]
    fn test_mul_matrix() {
        let mut m = DenseMatrix::new(2, 3).unwrap();
        m.row_mut(0).unwrap().copy_from_slice(&[1.0, 0.0, 0.0]);
        m.row_mut(1).unwrap().copy_from_slice(&[0.0, 2.0, 1.0]);
        let mut out = Vector::new(2).unwrap();
        out.mul_matrix(&m, &[3.0, 4.0, 5.0]).unwrap();
        assert_eq!(out.as_slice(), &[3.0, 13.0]);

        out.zero();
        out.add_row(&DenseMatrix::new(2, 2).unwrap(), 0, 1.0)
            .unwrap();
        assert_eq!(out.as_slice(), &[0.0, 0.0]);
    }
}
