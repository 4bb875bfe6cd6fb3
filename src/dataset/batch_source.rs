//! Batch streams for the MPL loop and the fine-tune epochs
//!
//! Training streams are [`CyclingStream`]s: a persistent cursor over a shuffled
//! index order that reshuffles with its own worker RNG when it runs out, so every
//! draw is a full batch and consecutive draws never repeat a row until the whole
//! stream has been visited. Evaluation is a single in-order pass.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::burn_dataset::{TextBatch, TextBatcher, TextItem};
use crate::utils::error::{MplError, Result};
use crate::utils::random::{workers, RandomContext};

/// Endless, reshuffling stream of fixed-size batches
pub struct CyclingStream {
    name: &'static str,
    items: Vec<TextItem>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    passes: usize,
    rng: ChaCha8Rng,
}

impl CyclingStream {
    pub fn new(
        name: &'static str,
        items: Vec<TextItem>,
        batch_size: usize,
        mut rng: ChaCha8Rng,
    ) -> Result<Self> {
        if items.is_empty() {
            return Err(MplError::Data(format!("{name} stream is empty")));
        }
        if batch_size == 0 {
            return Err(MplError::Config("batch_size must be positive".into()));
        }

        let mut order: Vec<usize> = (0..items.len()).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            name,
            items,
            order,
            cursor: 0,
            batch_size,
            passes: 0,
            rng,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of completed passes over the stream
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Draw the next `batch_size` items, wrapping (and reshuffling) as often as needed.
    pub fn next_items(&mut self) -> Vec<TextItem> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            if self.cursor == self.order.len() {
                self.order.shuffle(&mut self.rng);
                self.cursor = 0;
                self.passes += 1;
                debug!("{} stream reshuffled after pass {}", self.name, self.passes);
            }
            batch.push(self.items[self.order[self.cursor]].clone());
            self.cursor += 1;
        }
        batch
    }
}

/// One batch from each training stream, drawn for a single MPL step
#[derive(Clone, Debug)]
pub struct StepBatches<B: Backend> {
    pub labeled: TextBatch<B>,
    pub strong: TextBatch<B>,
    pub weak: TextBatch<B>,
}

/// The labeled, weak-view and strong-view training streams plus the held-out set
pub struct BatchSource<B: Backend> {
    labeled: CyclingStream,
    weak: CyclingStream,
    strong: CyclingStream,
    eval: Vec<TextItem>,
    batch_size: usize,
    batcher: TextBatcher,
    device: B::Device,
}

impl<B: Backend> BatchSource<B> {
    /// Each training stream gets its own worker RNG so the three orders are independent.
    pub fn new(
        labeled: Vec<TextItem>,
        weak: Vec<TextItem>,
        strong: Vec<TextItem>,
        eval: Vec<TextItem>,
        batch_size: usize,
        random: &RandomContext,
        device: &B::Device,
    ) -> Result<Self> {
        if eval.is_empty() {
            return Err(MplError::Data("evaluation set is empty".into()));
        }
        if eval.iter().any(|item| item.label.is_none()) {
            return Err(MplError::Data("evaluation rows must be labeled".into()));
        }
        if labeled.iter().any(|item| item.label.is_none()) {
            return Err(MplError::Data("labeled stream contains unlabeled rows".into()));
        }

        Ok(Self {
            labeled: CyclingStream::new(
                "labeled",
                labeled,
                batch_size,
                random.worker_rng(workers::LABELED),
            )?,
            weak: CyclingStream::new("weak", weak, batch_size, random.worker_rng(workers::WEAK))?,
            strong: CyclingStream::new(
                "strong",
                strong,
                batch_size,
                random.worker_rng(workers::STRONG),
            )?,
            eval,
            batch_size,
            batcher: TextBatcher,
            device: device.clone(),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// `ceil(|weak| / batch_size)`
    pub fn steps_per_epoch(&self) -> usize {
        self.weak.len().div_ceil(self.batch_size)
    }

    pub fn eval_len(&self) -> usize {
        self.eval.len()
    }

    pub fn next_step(&mut self) -> StepBatches<B> {
        StepBatches {
            labeled: self.batcher.batch(self.labeled.next_items(), &self.device),
            strong: self.batcher.batch(self.strong.next_items(), &self.device),
            weak: self.batcher.batch(self.weak.next_items(), &self.device),
        }
    }

    /// The held-out set in file order, last batch possibly short.
    pub fn eval_batches<E: Backend>(&self, device: &E::Device) -> Vec<TextBatch<E>> {
        ordered_batches(&self.eval, self.batch_size, device).collect()
    }
}

/// Lazily batched view over a slice in a fixed index order
pub struct Batches<'a, B: Backend> {
    items: &'a [TextItem],
    order: Vec<usize>,
    position: usize,
    batch_size: usize,
    batcher: TextBatcher,
    device: B::Device,
}

impl<B: Backend> Batches<'_, B> {
    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size.max(1))
    }
}

impl<B: Backend> Iterator for Batches<'_, B> {
    type Item = TextBatch<B>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch_size == 0 || self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let items: Vec<TextItem> = self.order[self.position..end]
            .iter()
            .map(|&i| self.items[i].clone())
            .collect();
        self.position = end;
        Some(self.batcher.batch(items, &self.device))
    }
}

pub fn ordered_batches<'a, B: Backend>(
    items: &'a [TextItem],
    batch_size: usize,
    device: &B::Device,
) -> Batches<'a, B> {
    Batches {
        items,
        order: (0..items.len()).collect(),
        position: 0,
        batch_size,
        batcher: TextBatcher,
        device: device.clone(),
    }
}

/// One shuffled epoch, keeping the trailing partial batch
pub fn shuffled_batches<'a, B: Backend>(
    items: &'a [TextItem],
    batch_size: usize,
    rng: &mut ChaCha8Rng,
    device: &B::Device,
) -> Batches<'a, B> {
    let mut batches = ordered_batches(items, batch_size, device);
    batches.order.shuffle(rng);
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use std::collections::HashSet;

    type TestBackend = NdArray;

    fn items(n: usize, labeled: bool) -> Vec<TextItem> {
        (0..n)
            .map(|i| TextItem {
                input_ids: vec![2, 100 + i as u32, 3],
                attention_mask: vec![1, 1, 1],
                label: labeled.then_some(i % 2),
            })
            .collect()
    }

    fn marker(item: &TextItem) -> u32 {
        item.input_ids[1]
    }

    #[test]
    fn test_stream_visits_everything_before_repeating() {
        let ctx = RandomContext::new(7);
        let mut stream = CyclingStream::new("t", items(6, true), 3, ctx.worker_rng(1)).unwrap();

        let first: Vec<u32> = stream.next_items().iter().map(marker).collect();
        let second: Vec<u32> = stream.next_items().iter().map(marker).collect();
        let seen: HashSet<u32> = first.iter().chain(second.iter()).copied().collect();

        assert_eq!(seen.len(), 6);
        assert_eq!(stream.passes(), 0);

        stream.next_items();
        assert_eq!(stream.passes(), 1);
    }

    #[test]
    fn test_stream_always_full_batches() {
        let ctx = RandomContext::new(1);
        let mut stream = CyclingStream::new("t", items(3, false), 5, ctx.worker_rng(2)).unwrap();
        for _ in 0..4 {
            assert_eq!(stream.next_items().len(), 5);
        }
    }

    #[test]
    fn test_stream_is_deterministic_per_seed() {
        let draw = |seed| {
            let ctx = RandomContext::new(seed);
            let mut stream =
                CyclingStream::new("t", items(10, false), 4, ctx.worker_rng(3)).unwrap();
            (0..5)
                .flat_map(|_| stream.next_items())
                .map(|item| marker(&item))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(11), draw(11));
    }

    #[test]
    fn test_empty_stream_is_error() {
        let ctx = RandomContext::new(0);
        let result = CyclingStream::new("t", Vec::new(), 4, ctx.worker_rng(0));
        assert!(matches!(result, Err(MplError::Data(_))));
    }

    #[test]
    fn test_batch_source_step_and_eval() {
        let device = Default::default();
        let ctx = RandomContext::new(3);
        let mut source = BatchSource::<TestBackend>::new(
            items(4, true),
            items(5, false),
            items(5, false),
            items(5, true),
            2,
            &ctx,
            &device,
        )
        .unwrap();

        assert_eq!(source.steps_per_epoch(), 3);

        let step = source.next_step();
        assert_eq!(step.labeled.len(), 2);
        assert_eq!(step.weak.len(), 2);
        assert_eq!(step.strong.len(), 2);
        assert!(step.labeled.targets.is_some());
        assert!(step.weak.targets.is_none());

        let eval = source.eval_batches::<TestBackend>(&device);
        let sizes: Vec<usize> = eval.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let first_ids: Vec<i64> = eval[0].input_ids.clone().into_data().iter::<i64>().collect();
        assert_eq!(first_ids, vec![2, 100, 3, 2, 101, 3]);
    }

    #[test]
    fn test_unlabeled_eval_rejected() {
        let device = Default::default();
        let ctx = RandomContext::new(3);
        let result = BatchSource::<TestBackend>::new(
            items(4, true),
            items(4, false),
            items(4, false),
            items(4, false),
            2,
            &ctx,
            &device,
        );
        assert!(matches!(result, Err(MplError::Data(_))));
    }

    #[test]
    fn test_shuffled_epoch_covers_all_rows() {
        let device = Default::default();
        let data = items(7, true);
        let mut rng = RandomContext::new(5).worker_rng(workers::FINETUNE);
        let batches = shuffled_batches::<TestBackend>(&data, 3, &mut rng, &device);
        assert_eq!(batches.num_batches(), 3);

        let total: usize = batches.map(|b| b.len()).sum();
        assert_eq!(total, 7);
    }
}
