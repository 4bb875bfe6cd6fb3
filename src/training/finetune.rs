//! Supervised fine-tuning of the selected MPL student
//!
//! Plain epochs over the (weakly augmented) labeled set: raw logits, smoothed
//! cross-entropy, AdamW stepped once per batch under a one-cycle schedule.
//! Every epoch is evaluated; improvements are written as `result_{f1:.3}`.
//! There is no early stopping here.

use std::path::PathBuf;

use burn::{
    module::AutodiffModule,
    optim::AdamWConfig,
    tensor::backend::AutodiffBackend,
};
use colored::Colorize;
use tracing::info;

use super::checkpoint::{load_record, CheckpointStore};
use super::evaluator::Evaluator;
use super::loss::cross_entropy;
use super::mpl::progress_bar;
use super::optimizer_unit::OptimizerUnit;
use super::scaler::GradScaler;
use super::scheduler::LrScheduler;
use crate::dataset::{load_finetune_data, ordered_batches, shuffled_batches, TextBatch, TextEncoder};
use crate::model::{RunConfig, SequenceClassifier, TextCnn};
use crate::utils::error::{MplError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::RunningAverage;
use crate::utils::random::{workers, RandomContext};
use crate::utils::tracking::ExperimentTracker;

/// Name the fine-tuned student is registered under
pub const FINETUNE_MODEL_NAME: &str = "ToxicityText";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: f64,
    pub eval_accuracy: f64,
    pub eval_f1: f64,
}

#[derive(Debug, Clone)]
pub struct FinetuneOutcome {
    pub best_f1: f64,
    pub best_checkpoint: Option<PathBuf>,
    pub history: Vec<EpochSummary>,
}

pub fn run_finetune<B: AutodiffBackend>(
    config: &RunConfig,
    device: &B::Device,
    tracker: &mut dyn ExperimentTracker,
) -> Result<FinetuneOutcome> {
    config.validate()?;
    println!("{}", "Initializing Fine-tuning...".green().bold());

    let random = RandomContext::new(config.seed);
    random.seed_backend::<B>();

    let encoder = TextEncoder::from_path(&config.data.vocab_path, config.data.max_length)?;
    if encoder.vocab_size() > config.student.vocab_size {
        return Err(MplError::Config(format!(
            "tokenizer has {} tokens but vocab_size is {}",
            encoder.vocab_size(),
            config.student.vocab_size
        )));
    }
    let data = load_finetune_data(&config.data, &encoder, &random)?;
    if data.train.is_empty() {
        return Err(MplError::Data("fine-tune set is empty".into()));
    }

    let store = CheckpointStore::new(&config.output_dir);
    let model = load_record(
        TextCnn::<B>::new(&config.student, device),
        &store.best_student_path(),
        device,
    )?;

    let ft = &config.finetune;
    let batch_size = config.data.batch_size;
    let batches_per_epoch = data.train.len().div_ceil(batch_size);
    let total_steps = batches_per_epoch * ft.epochs;
    let scheduler = LrScheduler::one_cycle(ft.max_lr, total_steps, ft.pct_start, ft.div_factor);
    let description = scheduler.description();
    let mut unit = OptimizerUnit::new(
        "finetune",
        model,
        AdamWConfig::new().with_weight_decay(ft.weight_decay).init(),
        GradScaler::disabled(),
        scheduler,
    );

    let eval_batches: Vec<_> = ordered_batches::<B>(&data.eval, batch_size, device)
        .map(TextBatch::inner)
        .collect();
    let evaluator = Evaluator::new(eval_batches, 1)?;

    tracker.log_params(&config.to_params()?)?;

    println!();
    println!("{}", "Fine-tune Configuration:".cyan().bold());
    println!("  🏷️  Training samples: {}", data.train.len());
    println!("  🔄 Epochs:           {}", ft.epochs);
    println!("  📦 Batch size:       {}", batch_size);
    println!("  📈 Schedule:         {}", description);
    println!();

    let logger = TrainingLogger::new(ft.epochs, "Epoch");
    let mut rng = random.worker_rng(workers::FINETUNE);
    let mut best_f1 = 0.0;
    let mut best_checkpoint = None;
    let mut history = Vec::with_capacity(ft.epochs);

    for epoch in 0..ft.epochs {
        let progress = progress_bar(batches_per_epoch, "batches");
        let mut running_loss = RunningAverage::new();

        for batch in shuffled_batches::<B>(&data.train, batch_size, &mut rng, device) {
            let targets = batch
                .targets
                .clone()
                .ok_or_else(|| MplError::Data("fine-tune batch has no targets".into()))?;
            let logits = unit.model().logits(batch.input_ids, batch.attention_mask);
            let outcome = unit.step(cross_entropy(logits, targets, config.label_smoothing));
            running_loss.add(outcome.loss as f64);
            progress.inc(1);
        }
        progress.finish_and_clear();

        let eval = evaluator.evaluate(&unit.model().valid())?;
        let summary = EpochSummary {
            epoch,
            train_loss: running_loss.average(),
            eval_accuracy: eval.accuracy,
            eval_f1: eval.macro_f1,
        };
        println!(
            "  {} Epoch: {} | Train Loss : {:.5} | Acc : {:.5} | F1 : {:.3}",
            "→".cyan(),
            epoch + 1,
            summary.train_loss,
            summary.eval_accuracy,
            summary.eval_f1
        );
        logger.log_evaluation(epoch, eval.loss, eval.accuracy, eval.macro_f1, eval.zeros, eval.ones);
        tracker.log_metric("train loss", summary.train_loss, epoch)?;
        tracker.log_metric("eval acc", summary.eval_accuracy, epoch)?;
        tracker.log_metric("eval f1", summary.eval_f1, epoch)?;

        if eval.macro_f1 > best_f1 {
            logger.log_new_best(best_f1, eval.macro_f1);
            best_checkpoint = Some(store.save_finetuned(unit.model(), eval.macro_f1)?);
            best_f1 = eval.macro_f1;
        }
        history.push(summary);
    }

    if let Some(path) = &best_checkpoint {
        tracker.register_model(FINETUNE_MODEL_NAME, path)?;
    }
    logger.log_complete(ft.epochs, best_f1);
    info!("Fine-tune best f1 = {:.3}", best_f1);

    Ok(FinetuneOutcome {
        best_f1,
        best_checkpoint,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::testing::write_corpus;
    use crate::utils::tracking::MemoryTracker;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_missing_mpl_checkpoint_is_error() {
        let dir = TempDir::new().unwrap();
        let config = write_corpus(&dir);
        let result =
            run_finetune::<TestBackend>(&config, &Default::default(), &mut MemoryTracker::new());
        assert!(matches!(result, Err(MplError::Checkpoint(_, _))));
    }

    #[test]
    fn test_finetune_runs_every_epoch() {
        let dir = TempDir::new().unwrap();
        let mut config = write_corpus(&dir);
        config.finetune.epochs = 3;

        let device = Default::default();
        let store = CheckpointStore::new(&config.output_dir);
        let student = TextCnn::<TestBackend>::new(&config.student, &device);
        store.save_best_student(&student).unwrap();

        let mut tracker = MemoryTracker::new();
        let outcome = run_finetune::<TestBackend>(&config, &device, &mut tracker).unwrap();

        assert_eq!(outcome.history.len(), 3);
        assert_eq!(tracker.series("train loss").len(), 3);
        assert_eq!(tracker.series("eval acc").len(), 3);
        assert_eq!(tracker.series("eval f1").len(), 3);

        let best = outcome
            .history
            .iter()
            .map(|e| e.eval_f1)
            .fold(0.0, f64::max);
        assert_eq!(outcome.best_f1, best);
        match &outcome.best_checkpoint {
            Some(path) => {
                assert!(path.exists());
                assert_eq!(tracker.models.len(), 1);
                assert_eq!(tracker.models[0].name, FINETUNE_MODEL_NAME);
            }
            None => assert!(tracker.models.is_empty()),
        }
    }
}
