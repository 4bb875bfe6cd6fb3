//! Held-out scoring, model selection and the plateau stop rule

use burn::prelude::*;
use burn::tensor::ElementConversion;

use super::loss::cross_entropy;
use crate::dataset::{TextBatch, LABEL_CLEAN, LABEL_CURSE};
use crate::model::SequenceClassifier;
use crate::utils::error::{MplError, Result};
use crate::utils::metrics::{Metrics, RunningAverage};

/// Training state for model selection and early stopping
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingState {
    /// Completed MPL steps
    pub step: usize,
    /// Best evaluation F1 so far
    pub best_f1: f64,
    /// F1 of the previous evaluation; -1 before the first one
    pub prev_f1: f64,
    /// Consecutive evaluations whose F1 equalled the previous one
    pub patience_count: usize,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            step: 0,
            best_f1: 0.0,
            prev_f1: -1.0,
            patience_count: 0,
        }
    }
}

/// What the caller must do after an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalVerdict {
    /// F1 strictly beat the best so far: persist the model
    pub new_best: bool,
    /// Patience exhausted: stop at this step boundary
    pub stop: bool,
}

impl TrainingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one evaluation F1 into the state.
    ///
    /// The plateau test is exact equality with the previous F1, not a tolerance.
    pub fn record_evaluation(&mut self, f1: f64, patience: usize) -> EvalVerdict {
        let new_best = f1 > self.best_f1;
        if new_best {
            self.best_f1 = f1;
        }

        let mut stop = false;
        if self.prev_f1 == f1 {
            self.patience_count += 1;
            stop = self.patience_count == patience;
        } else {
            self.patience_count = 0;
        }
        self.prev_f1 = f1;

        EvalVerdict { new_best, stop }
    }
}

/// Result of one pass over the held-out set
#[derive(Debug, Clone)]
pub struct EvalReport {
    /// Mean of the per-batch mean cross-entropy
    pub loss: f64,
    pub accuracy: f64,
    pub macro_f1: f64,
    /// Rows predicted clean
    pub zeros: usize,
    /// Rows predicted curse
    pub ones: usize,
    pub metrics: Metrics,
}

/// Scores a model on a fixed, pre-batched held-out set
pub struct Evaluator<B: Backend> {
    batches: Vec<TextBatch<B>>,
    interval: usize,
}

impl<B: Backend> Evaluator<B> {
    pub fn new(batches: Vec<TextBatch<B>>, interval: usize) -> Result<Self> {
        if batches.is_empty() {
            return Err(MplError::Data("evaluation set is empty".into()));
        }
        if batches.iter().any(|b| b.targets.is_none()) {
            return Err(MplError::Data("evaluation batches must carry labels".into()));
        }
        Ok(Self {
            batches,
            interval: interval.max(1),
        })
    }

    /// Evaluation runs every `interval` steps, never at step 0
    pub fn is_due(&self, step: usize) -> bool {
        step > 0 && step % self.interval == 0
    }

    /// Raw-logit inference over every batch in order
    pub fn evaluate<M: SequenceClassifier<B>>(&self, model: &M) -> Result<EvalReport> {
        let mut loss = RunningAverage::new();
        let mut predictions = Vec::new();
        let mut ground_truth = Vec::new();

        for batch in &self.batches {
            let targets = batch
                .targets
                .clone()
                .ok_or_else(|| MplError::Data("evaluation batch without labels".into()))?;
            let logits = model.logits(batch.input_ids.clone(), batch.attention_mask.clone());

            let batch_loss: f32 = cross_entropy(logits.clone(), targets.clone(), 0.0)
                .into_scalar()
                .elem();
            loss.add(batch_loss as f64);

            predictions.extend(
                logits
                    .argmax(1)
                    .flatten::<1>(0, 1)
                    .into_data()
                    .iter::<i64>()
                    .map(|p| p as usize),
            );
            ground_truth.extend(targets.into_data().iter::<i64>().map(|t| t as usize));
        }

        let metrics = Metrics::from_predictions(&predictions, &ground_truth);
        Ok(EvalReport {
            loss: loss.average(),
            accuracy: metrics.accuracy,
            macro_f1: metrics.macro_f1,
            zeros: metrics.predicted_count(LABEL_CLEAN),
            ones: metrics.predicted_count(LABEL_CURSE),
            metrics,
        })
    }
}
