//! TextCNN student
//!
//! Embedding, a single same-padded 1D convolution, max-over-time pooling and a linear
//! head. Small enough to be trained from scratch by the MPL loop.

use burn::{
    module::Module,
    nn::{
        conv::{Conv1d, Conv1dConfig},
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig, PaddingConfig1d,
        Relu,
    },
    tensor::{backend::Backend, Int, Tensor},
};

use super::config::StudentConfig;
use super::SequenceClassifier;

#[derive(Module, Debug)]
pub struct TextCnn<B: Backend> {
    embedding: Embedding<B>,
    /// dropout1, applied after the embedding
    embed_dropout: Dropout,
    conv: Conv1d<B>,
    activation: Relu,
    /// dropout2, applied after the convolution
    conv_dropout: Dropout,
    /// dropout1, applied before the classifier
    head_dropout: Dropout,
    classifier: Linear<B>,
}

impl<B: Backend> TextCnn<B> {
    pub fn new(config: &StudentConfig, device: &B::Device) -> Self {
        Self {
            embedding: EmbeddingConfig::new(config.vocab_size, config.embedding_dim).init(device),
            embed_dropout: DropoutConfig::new(config.dropout1).init(),
            conv: Conv1dConfig::new(config.embedding_dim, config.hidden_size, config.kernel_size)
                .with_padding(PaddingConfig1d::Same)
                .init(device),
            activation: Relu::new(),
            conv_dropout: DropoutConfig::new(config.dropout2).init(),
            head_dropout: DropoutConfig::new(config.dropout1).init(),
            classifier: LinearConfig::new(config.hidden_size, config.num_classes).init(device),
        }
    }

    /// # Arguments
    /// * `input_ids` - Token ids of shape [batch_size, seq_len]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        // [B, L] -> [B, L, E] -> [B, E, L]
        let x = self.embedding.forward(input_ids);
        let x = self.embed_dropout.forward(x).swap_dims(1, 2);

        // [B, E, L] -> [B, H, L]
        let x = self.conv.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv_dropout.forward(x);

        // Max over time: [B, H, L] -> [B, H]
        let [batch_size, hidden, _] = x.dims();
        let x = x.max_dim(2).reshape([batch_size, hidden]);

        let x = self.head_dropout.forward(x);
        self.classifier.forward(x)
    }
}

impl<B: Backend> SequenceClassifier<B> for TextCnn<B> {
    /// The student reads token ids only; padding is handled by max pooling
    fn logits(&self, input_ids: Tensor<B, 2, Int>, _attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        self.forward(input_ids)
    }
}
