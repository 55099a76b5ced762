//! lightlm
//!
//! Word embeddings and text classification with subword features, trained
//! by lock-free asynchronous SGD and served from dense or product-quantized
//! matrices.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌─────────────────────┐   ┌───────────┐
//! │  corpus  │ → │ Dictionary │ → │ Trainer (N workers) │ → │   Model   │
//! └──────────┘   │ words      │   │ hogwild updates on  │   │ wi · wo   │
//!                │ labels     │   │ shared matrices     │   └─────┬─────┘
//!                │ n-grams    │   └─────────────────────┘         │
//!                └────────────┘                     ┌─────────────┼────────────┐
//!                                                   ↓             ↓            ↓
//!                                               quantize       predict     save/load
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lightlm::prelude::*;
//!
//! let args = Args::supervised("train.txt");
//! let mut engine = LightLm::new();
//! let report = engine.train(&args)?;
//! println!("loss {:.4} after {} epochs", report.loss, report.epochs_completed);
//!
//! for p in engine.predict("which baking dish is best", 2)? {
//!     println!("{} {:.3}", p.label, p.probability());
//! }
//! engine.save("model.ltlm")?;
//! # Ok::<(), lightlm::Error>(())
//! ```

pub mod args;
pub mod dictionary;
pub mod engine;
pub mod format;
pub mod loss;
pub mod meter;
pub mod model;
pub mod trainer;
pub mod tree;

pub use args::{Args, LossKind, ModelKind, Pooling};
pub use dictionary::{Dictionary, EntryKind, Line};
pub use engine::{LightLm, Neighbor, Prediction};
pub use lightlm_core::{DenseMatrix, Error, Result, UpdatePolicy, Vector};
pub use lightlm_quant::{QuantConfig, QuantMatrix};
pub use meter::{Meter, Metrics, TestReport};
pub use model::{Model, ModelState, Weights};
pub use trainer::{CancellationToken, Trainer, TrainingReport};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        Args, CancellationToken, Error, LightLm, LossKind, ModelKind, Prediction, Result,
        TestReport, TrainingReport,
    };
}
