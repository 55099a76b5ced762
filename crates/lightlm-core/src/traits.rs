//! Row-oriented matrix traits.
//!
//! ## Trait Hierarchy
//!
//! ```text
//! RowMatrix  (read: dot a row, accumulate a row into a vector)
//!     ↓
//! RowUpdate  (write through a shared reference, training only)
//! ```
//!
//! Every model-facing matrix (dense, shared, quantized) is consumed through
//! these traits, so forward passes never care how rows are stored.

use crate::error::{Error, Result};

/// Read access to a matrix one row at a time.
pub trait RowMatrix {
    /// Number of rows.
    fn rows(&self) -> usize;

    /// Number of columns.
    fn cols(&self) -> usize;

    /// Dot product of row `i` with `vec`.
    fn dot_row(&self, vec: &[f32], i: usize) -> Result<f32>;

    /// Accumulate `scale * row(i)` into `out`.
    fn add_row_to_vector(&self, out: &mut [f32], i: usize, scale: f32) -> Result<()>;
}

/// In-place row updates through a shared reference.
///
/// Only storage that tolerates concurrent writers implements this; see
/// [`crate::SharedMatrix`].
pub trait RowUpdate: RowMatrix {
    /// `row(i) += scale * vec`.
    fn add_vector_to_row(&self, vec: &[f32], i: usize, scale: f32) -> Result<()>;
}

impl<T: RowMatrix + ?Sized> RowMatrix for &T {
    fn rows(&self) -> usize {
        (**self).rows()
    }

    fn cols(&self) -> usize {
        (**self).cols()
    }

    fn dot_row(&self, vec: &[f32], i: usize) -> Result<f32> {
        (**self).dot_row(vec, i)
    }

    fn add_row_to_vector(&self, out: &mut [f32], i: usize, scale: f32) -> Result<()> {
        (**self).add_row_to_vector(out, i, scale)
    }
}

impl<T: RowUpdate + ?Sized> RowUpdate for &T {
    fn add_vector_to_row(&self, vec: &[f32], i: usize, scale: f32) -> Result<()> {
        (**self).add_vector_to_row(vec, i, scale)
    }
}

/// Fail with a bounds error unless `i < rows`.
#[inline]
pub fn check_row(i: usize, rows: usize) -> Result<()> {
    if i < rows {
        Ok(())
    } else {
        Err(Error::bounds("matrix row", i, rows))
    }
}

/// Fail with a dimension mismatch unless a vector of `len` matches `cols`.
#[inline]
pub fn check_width(len: usize, cols: usize) -> Result<()> {
    if len == cols {
        Ok(())
    } else {
        Err(Error::dimension_mismatch(cols, len))
    }
}
