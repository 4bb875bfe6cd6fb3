//! Transformer teacher
//!
//! Token and learned position embeddings feed a Burn `TransformerEncoder`; padding
//! positions are masked out of attention and the `[CLS]` position is classified.

use burn::{
    module::Module,
    nn::{
        transformer::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderInput},
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig,
    },
    tensor::{backend::Backend, Int, Tensor},
};

use super::config::TeacherConfig;
use super::SequenceClassifier;

#[derive(Module, Debug)]
pub struct TextTransformer<B: Backend> {
    token_embedding: Embedding<B>,
    position_embedding: Embedding<B>,
    encoder: TransformerEncoder<B>,
    dropout: Dropout,
    classifier: Linear<B>,
}

impl<B: Backend> TextTransformer<B> {
    /// `max_length` bounds the sequence length the position table can address
    pub fn new(
        config: &TeacherConfig,
        vocab_size: usize,
        num_classes: usize,
        max_length: usize,
        device: &B::Device,
    ) -> Self {
        let encoder = TransformerEncoderConfig::new(
            config.d_model,
            config.d_ff,
            config.n_heads,
            config.n_layers,
        )
        .with_dropout(config.dropout)
        .init(device);

        Self {
            token_embedding: EmbeddingConfig::new(vocab_size, config.d_model).init(device),
            position_embedding: EmbeddingConfig::new(max_length, config.d_model).init(device),
            encoder,
            dropout: DropoutConfig::new(config.dropout).init(),
            classifier: LinearConfig::new(config.d_model, num_classes).init(device),
        }
    }

    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let device = input_ids.device();
        let [batch_size, seq_len] = input_ids.dims();

        // [1, L] positions broadcast over the batch
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device).reshape([1, seq_len]);
        let x = self.token_embedding.forward(input_ids) + self.position_embedding.forward(positions);
        let x = self.dropout.forward(x);

        // true = padding, excluded from attention
        let pad_mask = attention_mask.equal_elem(0);
        let encoded = self
            .encoder
            .forward(TransformerEncoderInput::new(x).mask_pad(pad_mask));

        // [CLS] sits at position 0
        let [_, _, d_model] = encoded.dims();
        let cls = encoded.narrow(1, 0, 1).reshape([batch_size, d_model]);
        self.classifier.forward(self.dropout.forward(cls))
    }
}

impl<B: Backend> SequenceClassifier<B> for TextTransformer<B> {
    fn logits(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        self.forward(input_ids, attention_mask)
    }
}
