//! Model module containing the student and teacher classifiers
//!
//! Both models map a padded batch of token ids to `[batch, num_classes]` logits.
//! The training engines only talk to them through [`SequenceClassifier`].

pub mod config;
pub mod student;
pub mod teacher;

use burn::tensor::{backend::Backend, Int, Tensor};

pub use config::{DataConfig, FinetuneConfig, MplConfig, RunConfig, StudentConfig, TeacherConfig};
pub use student::TextCnn;
pub use teacher::TextTransformer;

/// A text classifier producing raw logits
pub trait SequenceClassifier<B: Backend> {
    /// `input_ids` and `attention_mask` are `[batch, seq_len]`; returns `[batch, num_classes]`
    fn logits(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2>;
}
