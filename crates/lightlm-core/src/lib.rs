//! lightlm core
//!
//! Numeric containers and the error taxonomy shared by the lightlm engine.
//!
//! # Storage
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     RowMatrix (read)                      │
//! ├───────────────┬───────────────────┬──────────────────────┤
//! │ DenseMatrix   │ SharedMatrix      │ QuantMatrix          │
//! │ owned f32     │ relaxed atomics   │ PQ codes + codebooks │
//! │ (serving,     │ + RowUpdate       │ (lightlm-quant)      │
//! │  persistence) │ (training)        │                      │
//! └───────────────┴───────────────────┴──────────────────────┘
//! ```
//!
//! Dense matrices are zero-initialized and never resize. A training run
//! moves the dense matrices into [`SharedMatrix`] for the duration of the
//! run and takes them back afterwards.

pub mod error;
pub mod matrix;
pub mod shared;
pub mod traits;
pub mod vector;

pub use error::{Error, Result};
pub use matrix::DenseMatrix;
pub use shared::{SharedMatrix, UpdatePolicy};
pub use traits::{RowMatrix, RowUpdate};
pub use vector::Vector;

/// Prelude for common imports
pub mod prelude {
    pub use super::{DenseMatrix, Error, Result, RowMatrix, RowUpdate, SharedMatrix, Vector};
}
