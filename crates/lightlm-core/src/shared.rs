//! Matrix storage shared by concurrent training workers.
//!
//! ## Consistency model
//!
//! Workers update the same rows without coordination (asynchronous SGD).
//! Each element is an `AtomicU32` holding `f32` bits, read and written with
//! `Ordering::Relaxed`. A read-modify-write of one element is therefore
//! not atomic: two workers adding to the same element at the same moment
//! may lose one of the additions. This is an intentional relaxed-consistency
//! tradeoff. It keeps the program free of data races in the language sense
//! while matching the throughput of unsynchronized updates, and SGD
//! converges in spite of the occasional lost write.
//!
//! [`UpdatePolicy::RowLocked`] removes lost writes within a row by holding a
//! per-row `parking_lot::Mutex` for the duration of each row update.
//! Readers never lock.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::matrix::DenseMatrix;
use crate::traits::{check_row, check_width, RowMatrix, RowUpdate};

/// How concurrent writers to a [`SharedMatrix`] are coordinated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// No locking; concurrent writers may overwrite each other.
    #[default]
    Hogwild,
    /// One mutex per row, held while that row is written.
    RowLocked,
}

/// One `f32` stored as relaxed atomic bits.
#[derive(Debug, Default)]
struct Cell {
    bits: AtomicU32,
}

impl Cell {
    fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Row-major matrix updatable through `&self`.
#[derive(Debug)]
pub struct SharedMatrix {
    rows: usize,
    cols: usize,
    cells: Vec<Cell>,
    locks: Option<Vec<Mutex<()>>>,
}

impl SharedMatrix {
    /// Take ownership of a dense matrix's values.
    pub fn from_dense(matrix: DenseMatrix, policy: UpdatePolicy) -> Self {
        let rows = matrix.rows();
        let cols = matrix.cols();
        let cells = matrix.into_vec().into_iter().map(Cell::new).collect();
        let locks = match policy {
            UpdatePolicy::Hogwild => None,
            UpdatePolicy::RowLocked => Some((0..rows).map(|_| Mutex::new(())).collect()),
        };
        Self {
            rows,
            cols,
            cells,
            locks,
        }
    }

    /// Copy the current values out into a dense matrix.
    pub fn to_dense(&self) -> Result<DenseMatrix> {
        let data = self.cells.iter().map(Cell::get).collect();
        DenseMatrix::from_vec(self.rows, self.cols, data)
    }

    /// Consume the shared matrix, returning the dense values.
    pub fn into_dense(self) -> Result<DenseMatrix> {
        let data = self
            .cells
            .into_iter()
            .map(|c| f32::from_bits(c.bits.into_inner()))
            .collect();
        DenseMatrix::from_vec(self.rows, self.cols, data)
    }

    pub fn policy(&self) -> UpdatePolicy {
        if self.locks.is_some() {
            UpdatePolicy::RowLocked
        } else {
            UpdatePolicy::Hogwild
        }
    }

    /// Copy row `i` into `out`.
    pub fn read_row(&self, i: usize, out: &mut [f32]) -> Result<()> {
        check_width(out.len(), self.cols)?;
        for (o, c) in out.iter_mut().zip(self.cells_of(i)?) {
            *o = c.get();
        }
        Ok(())
    }

    /// True if any element of the matrix is non-zero.
    pub fn any_nonzero(&self) -> bool {
        self.cells.iter().any(|c| c.get() != 0.0)
    }

    fn cells_of(&self, i: usize) -> Result<&[Cell]> {
        check_row(i, self.rows)?;
        Ok(&self.cells[i * self.cols..(i + 1) * self.cols])
    }
}

impl RowMatrix for SharedMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn dot_row(&self, vec: &[f32], i: usize) -> Result<f32> {
        check_width(vec.len(), self.cols)?;
        Ok(self
            .cells_of(i)?
            .iter()
            .zip(vec)
            .map(|(c, v)| c.get() * v)
            .sum())
    }

    fn add_row_to_vector(&self, out: &mut [f32], i: usize, scale: f32) -> Result<()> {
        check_width(out.len(), self.cols)?;
        for (o, c) in out.iter_mut().zip(self.cells_of(i)?) {
            *o += scale * c.get();
        }
        Ok(())
    }
}

impl RowUpdate for SharedMatrix {
    fn add_vector_to_row(&self, vec: &[f32], i: usize, scale: f32) -> Result<()> {
        check_width(vec.len(), self.cols)?;
        let row = self.cells_of(i)?;
        let _guard = self.locks.as_ref().map(|locks| locks[i].lock());
        for (c, v) in row.iter().zip(vec) {
            c.set(c.get() + scale * v);
        }
        Ok(())
    }
}
