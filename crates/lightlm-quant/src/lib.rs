//! lightlm product quantization
//!
//! Compresses trained embedding matrices for serving.
//!
//! ```text
//! row (dim values)
//! ┌──────┬──────┬──────┬─────┬──────┐
//! │ dsub │ dsub │ dsub │ ... │ dsub │   nsubq = dim / dsub sub-spaces
//! └──┬───┴──┬───┴──┬───┴─────┴──┬───┘
//!    ↓      ↓      ↓            ↓       k-means codebook per sub-space
//!   u8     u8     u8    ...    u8       (up to 256 centroids)
//! ```
//!
//! With `qnorm`, rows are scaled to unit length first and each row's norm
//! is stored as a code into a one-dimensional quantizer.

pub mod kmeans;
pub mod product;
pub mod quant_matrix;

pub use kmeans::{KMeans, KMeansInit};
pub use product::{ProductQuantizer, KSUB, NITER};
pub use quant_matrix::{QuantConfig, QuantMatrix};

/// Prelude for common imports
pub mod prelude {
    pub use super::{ProductQuantizer, QuantConfig, QuantMatrix};
}
