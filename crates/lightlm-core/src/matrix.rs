//! Dense row-major matrices.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::traits::{check_row, check_width, RowMatrix};

/// Row-major `rows x cols` matrix of `f32`.
///
/// The shape is fixed at construction; no operation resizes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl DenseMatrix {
    /// Create a zero-filled matrix.
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 {
            return Err(Error::config("rows", "matrix must have at least one row"));
        }
        if cols == 0 {
            return Err(Error::config("cols", "matrix must have at least one column"));
        }
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::config("rows", format!("{rows} x {cols} overflows")))?;
        Ok(Self {
            rows,
            cols,
            data: vec![0.0; len],
        })
    }

    /// Build from row-major values.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        let mut m = Self::new(rows, cols)?;
        check_width(data.len(), rows * cols)?;
        m.data = data;
        Ok(m)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Backing storage, row-major.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Set every element to zero.
    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Fill with `U(-bound, bound)` from a generator seeded with `seed`.
    pub fn uniform(&mut self, bound: f32, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for v in &mut self.data {
            *v = rng.gen_range(-bound..=bound);
        }
    }

    /// Borrow row `i`.
    pub fn row(&self, i: usize) -> Result<&[f32]> {
        check_row(i, self.rows)?;
        Ok(&self.data[i * self.cols..(i + 1) * self.cols])
    }

    /// Mutably borrow row `i`.
    pub fn row_mut(&mut self, i: usize) -> Result<&mut [f32]> {
        check_row(i, self.rows)?;
        let cols = self.cols;
        Ok(&mut self.data[i * cols..(i + 1) * cols])
    }

    /// Element `(i, j)`.
    pub fn at(&self, i: usize, j: usize) -> Result<f32> {
        check_row(i, self.rows)?;
        if j >= self.cols {
            return Err(Error::bounds("matrix column", j, self.cols));
        }
        Ok(self.data[i * self.cols + j])
    }

    /// `row(i) += scale * vec`.
    pub fn add_row(&mut self, vec: &[f32], i: usize, scale: f32) -> Result<()> {
        check_width(vec.len(), self.cols)?;
        for (d, v) in self.row_mut(i)?.iter_mut().zip(vec) {
            *d += scale * v;
        }
        Ok(())
    }

    /// Multiply each row `i` in `ib..ie` by `nums[i - ib]`.
    ///
    /// `ie = None` runs to the last row. Zero factors are skipped.
    pub fn multiply_row(&mut self, nums: &[f32], ib: usize, ie: Option<usize>) -> Result<()> {
        let ie = self.row_span(nums, ib, ie)?;
        for i in ib..ie {
            let n = nums[i - ib];
            if n != 0.0 {
                for v in self.row_mut(i)? {
                    *v *= n;
                }
            }
        }
        Ok(())
    }

    /// Divide each row `i` in `ib..ie` by `denoms[i - ib]`.
    ///
    /// Zero denominators leave the row unchanged.
    pub fn divide_row(&mut self, denoms: &[f32], ib: usize, ie: Option<usize>) -> Result<()> {
        let ie = self.row_span(denoms, ib, ie)?;
        for i in ib..ie {
            let n = denoms[i - ib];
            if n != 0.0 {
                for v in self.row_mut(i)? {
                    *v /= n;
                }
            }
        }
        Ok(())
    }

    /// L2 norm of row `i`.
    pub fn l2_norm_row(&self, i: usize) -> Result<f32> {
        let norm = self.row(i)?.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm.is_nan() {
            return Err(Error::format(format!("row {i} contains NaN")));
        }
        Ok(norm)
    }

    /// L2 norm of every row.
    pub fn l2_norms(&self) -> Result<Vec<f32>> {
        (0..self.rows).map(|i| self.l2_norm_row(i)).collect()
    }

    fn row_span(&self, nums: &[f32], ib: usize, ie: Option<usize>) -> Result<usize> {
        let ie = ie.unwrap_or(self.rows);
        if ie > self.rows {
            return Err(Error::bounds("matrix row", ie, self.rows));
        }
        if ib > ie {
            return Err(Error::bounds("matrix row", ib, ie));
        }
        check_width(nums.len(), ie - ib)?;
        Ok(ie)
    }
}

impl RowMatrix for DenseMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn dot_row(&self, vec: &[f32], i: usize) -> Result<f32> {
        check_width(vec.len(), self.cols)?;
        let row = self.row(i)?;
        Ok(row.iter().zip(vec).map(|(a, b)| a * b).sum())
    }

    fn add_row_to_vector(&self, out: &mut [f32], i: usize, scale: f32) -> Result<()> {
        check_width(out.len(), self.cols)?;
        for (o, v) in out.iter_mut().zip(self.row(i)?) {
            *o += scale * v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_dimensions_rejected() {
        assert_eq!(DenseMatrix::new(0, 4).unwrap_err().category(), "config");
        assert_eq!(DenseMatrix::new(4, 0).unwrap_err().category(), "config");
    }

    #[test]
    fn test_row_is_a_view() {
        let mut m = DenseMatrix::new(3, 2).unwrap();
        m.row_mut(1).unwrap()[0] = 5.0;
        let row = m.row(1).unwrap();
        assert_eq!(row, &[5.0, 0.0]);
        assert_eq!(row.as_ptr(), m.as_slice()[2..].as_ptr());
    }

    #[test]
    fn test_out_of_range() {
        let m = DenseMatrix::new(3, 2).unwrap();
        assert!(matches!(m.row(3), Err(Error::Bounds { index: 3, len: 3, .. })));
        assert!(matches!(m.at(0, 2), Err(Error::Bounds { index: 2, len: 2, .. })));
        assert!(m.dot_row(&[1.0, 1.0], 7).is_err());
    }

    #[test]
    fn test_row_operations() {
        let mut m = DenseMatrix::new(2, 2).unwrap();
        m.add_row(&[3.0, 4.0], 0, 1.0).unwrap();
        m.add_row(&[1.0, 1.0], 1, 2.0).unwrap();
        assert_eq!(m.l2_norm_row(0).unwrap(), 5.0);
        assert_eq!(m.dot_row(&[1.0, 1.0], 1).unwrap(), 4.0);

        m.divide_row(&[5.0, 0.0], 0, None).unwrap();
        assert_eq!(m.row(0).unwrap(), &[0.6, 0.8]);
        assert_eq!(m.row(1).unwrap(), &[2.0, 2.0]);

        m.multiply_row(&[3.0], 1, Some(2)).unwrap();
        assert_eq!(m.row(1).unwrap(), &[6.0, 6.0]);
        assert!(m.multiply_row(&[1.0], 0, Some(3)).is_err());
    }

    #[test]
    fn test_uniform_then_zero() {
        let mut m = DenseMatrix::new(4, 4).unwrap();
        m.uniform(0.25, 3);
        assert!(m.as_slice().iter().all(|v| v.abs() <= 0.25));
        assert!(m.as_slice().iter().any(|&v| v != 0.0));
        m.zero();
        assert!(m.as_slice().iter().all(|&v| v == 0.0));
    }

    proptest! {
        #[test]
        fn prop_fresh_matrix_is_zero(rows in 1usize..64, cols in 1usize..64) {
            let m = DenseMatrix::new(rows, cols).unwrap();
            prop_assert_eq!(m.rows(), rows);
            prop_assert_eq!(m.cols(), cols);
            prop_assert!(m.as_slice().iter().all(|&v| v == 0.0));
        }
    }
}
