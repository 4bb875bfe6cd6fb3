//! Dataset module for the toxicity corpora
//!
//! This module provides:
//! - CSV loading and stratified sampling of the unlabeled pool
//! - Punctuation-insertion augmentation (weak and strong views)
//! - WordPiece tokenization to fixed-length id/mask pairs
//! - Burn `Dataset`/`Batcher` glue and the cycling batch streams used by MPL

pub mod augmentation;
pub mod batch_source;
pub mod burn_dataset;
pub mod loader;
pub mod pipeline;
pub mod tokenizer;

// Re-export main types for convenience
pub use augmentation::{AugmentationConfig, Augmenter, TextAugmenter};
pub use batch_source::{ordered_batches, shuffled_batches, BatchSource, CyclingStream, StepBatches};
pub use burn_dataset::{TextBatch, TextBatcher, TextItem};
pub use loader::{LabelStats, LabeledText, UnlabeledText};
pub use pipeline::{load_finetune_data, load_mpl_data, FinetuneData, MplData};
pub use tokenizer::{EncodedText, TextEncoder};

/// Class index of clean text
pub const LABEL_CLEAN: usize = 0;

/// Class index of toxic / curse text
pub const LABEL_CURSE: usize = 1;
