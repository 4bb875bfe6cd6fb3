//! # Toxicity MPL
//!
//! Semi-supervised toxic text classification with Meta Pseudo Labels and UDA consistency,
//! built on the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: CSV loading, augmentation, tokenization and the cycling batch streams
//! - `model`: the TextCNN student, the transformer teacher and the run configuration
//! - `training`: the MPL step engine, fine-tuning, schedules, losses and checkpoints
//! - `utils`: logging, metrics, errors, seeding and experiment tracking
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use toxicity_mpl::backend::{default_device, TrainingBackend};
//! use toxicity_mpl::training::{run_finetune, run_mpl};
//! use toxicity_mpl::utils::FileTracker;
//! use toxicity_mpl::RunConfig;
//!
//! let config = RunConfig::load_toml("mpl.toml".as_ref())?;
//! let mut tracker = FileTracker::create(&config.output_dir)?;
//! run_mpl::<TrainingBackend>(&config, &default_device(), &mut tracker)?;
//! run_finetune::<TrainingBackend>(&config, &default_device(), &mut tracker)?;
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{BatchSource, TextBatch, TextEncoder};
pub use model::{RunConfig, SequenceClassifier, TextCnn, TextTransformer};
pub use training::{run_finetune, run_mpl, FinetuneOutcome, MplOutcome, MplStepEngine};
pub use utils::error::{MplError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
