//! Burn Batcher for tokenized text
//!
//! Stacks pre-tokenized rows into `[batch, seq_len]` id/mask tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use super::tokenizer::EncodedText;

/// A single tokenized text, optionally labeled
#[derive(Clone, Debug, PartialEq)]
pub struct TextItem {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    /// `None` for unlabeled (weak/strong view) rows
    pub label: Option<usize>,
}

impl TextItem {
    pub fn labeled(encoded: EncodedText, label: usize) -> Self {
        Self {
            input_ids: encoded.input_ids,
            attention_mask: encoded.attention_mask,
            label: Some(label),
        }
    }

    pub fn unlabeled(encoded: EncodedText) -> Self {
        Self {
            input_ids: encoded.input_ids,
            attention_mask: encoded.attention_mask,
            label: None,
        }
    }
}

/// A batch ready for a forward pass
#[derive(Clone, Debug)]
pub struct TextBatch<B: Backend> {
    /// Token ids with shape [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,
    /// 1 = real token, 0 = padding; same shape as `input_ids`
    pub attention_mask: Tensor<B, 2, Int>,
    /// Present only when every item in the batch carries a label
    pub targets: Option<Tensor<B, 1, Int>>,
}

impl<B: Backend> TextBatch<B> {
    pub fn len(&self) -> usize {
        self.input_ids.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: AutodiffBackend> TextBatch<B> {
    /// Same batch on the non-differentiable inner backend
    pub fn inner(self) -> TextBatch<B::InnerBackend> {
        TextBatch {
            input_ids: self.input_ids.inner(),
            attention_mask: self.attention_mask.inner(),
            targets: self.targets.map(Tensor::inner),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TextBatcher;

impl<B: Backend> Batcher<B, TextItem, TextBatch<B>> for TextBatcher {
    fn batch(&self, items: Vec<TextItem>, device: &B::Device) -> TextBatch<B> {
        let batch_size = items.len();
        let seq_len = items.first().map_or(0, |item| item.input_ids.len());

        let ids: Vec<i64> = items
            .iter()
            .flat_map(|item| item.input_ids.iter().map(|&id| id as i64))
            .collect();
        let mask: Vec<i64> = items
            .iter()
            .flat_map(|item| item.attention_mask.iter().map(|&m| m as i64))
            .collect();

        let input_ids =
            Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [batch_size, seq_len]), device);
        let attention_mask =
            Tensor::<B, 2, Int>::from_data(TensorData::new(mask, [batch_size, seq_len]), device);

        let labels: Option<Vec<i64>> = items
            .iter()
            .map(|item| item.label.map(|l| l as i64))
            .collect();
        let targets = labels.map(|labels| {
            Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device)
        });

        TextBatch {
            input_ids,
            attention_mask,
            targets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn item(ids: [u32; 3], label: Option<usize>) -> TextItem {
        TextItem {
            input_ids: ids.to_vec(),
            attention_mask: ids.iter().map(|&id| u32::from(id != 0)).collect(),
            label,
        }
    }

    #[test]
    fn test_batch_preserves_order() {
        let device = Default::default();
        let batch: TextBatch<TestBackend> = TextBatcher.batch(
            vec![item([2, 7, 3], Some(1)), item([2, 3, 0], Some(0))],
            &device,
        );

        assert_eq!(batch.len(), 2);
        let ids: Vec<i64> = batch.input_ids.into_data().iter::<i64>().collect();
        assert_eq!(ids, vec![2, 7, 3, 2, 3, 0]);
        let mask: Vec<i64> = batch.attention_mask.into_data().iter::<i64>().collect();
        assert_eq!(mask, vec![1, 1, 1, 1, 1, 0]);
        let targets: Vec<i64> = batch.targets.unwrap().into_data().iter::<i64>().collect();
        assert_eq!(targets, vec![1, 0]);
    }

    #[test]
    fn test_unlabeled_batch_has_no_targets() {
        let device = Default::default();
        let batch: TextBatch<TestBackend> =
            TextBatcher.batch(vec![item([2, 5, 3], None), item([2, 6, 3], None)], &device);
        assert!(batch.targets.is_none());
    }
}
