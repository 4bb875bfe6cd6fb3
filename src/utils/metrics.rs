//! Metrics Module for Model Evaluation
//!
//! Binary classification metrics for the toxicity task:
//! - Accuracy
//! - Per-class precision, recall, F1-score
//! - Macro F1 across exactly the two classes {0, 1}
//! - Confusion Matrix

use serde::{Deserialize, Serialize};

/// Number of classes every metric is averaged over
pub const BINARY_CLASSES: usize = 2;

/// Evaluation metrics for one pass over a labeled set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Total number of samples evaluated
    pub total_samples: usize,

    /// Number of correct predictions
    pub correct_predictions: usize,

    /// Overall accuracy (correct / total)
    pub accuracy: f64,

    /// Macro-averaged F1-score over {0, 1}
    pub macro_f1: f64,

    /// Per-class metrics, indexed by class id
    pub per_class: Vec<ClassMetrics>,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Create metrics from predictions and ground truth labels.
    ///
    /// Both classes always take part in the macro average, even when one of them is
    /// absent from the labels and the predictions (its F1 is then 0).
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize]) -> Self {
        debug_assert_eq!(predictions.len(), ground_truth.len());

        let confusion_matrix = ConfusionMatrix::from_predictions(predictions, ground_truth);
        let total_samples = confusion_matrix.total();
        let correct_predictions = confusion_matrix.correct();

        let per_class: Vec<ClassMetrics> = (0..BINARY_CLASSES)
            .map(|class_idx| ClassMetrics::from_confusion_matrix(&confusion_matrix, class_idx))
            .collect();

        let macro_f1 = per_class.iter().map(|m| m.f1).sum::<f64>() / BINARY_CLASSES as f64;

        Self {
            total_samples,
            correct_predictions,
            accuracy: confusion_matrix.accuracy(),
            macro_f1,
            per_class,
            confusion_matrix,
        }
    }

    /// How many samples were predicted as `class_idx`
    pub fn predicted_count(&self, class_idx: usize) -> usize {
        (0..BINARY_CLASSES)
            .map(|actual| self.confusion_matrix.get(actual, class_idx))
            .sum()
    }
}

/// Per-class precision / recall / F1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    /// F1 = 2 * (precision * recall) / (precision + recall), 0 when undefined
    pub f1: f64,
    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let other = 1 - class_idx;
        let true_positives = cm.get(class_idx, class_idx);
        let false_positives = cm.get(other, class_idx);
        let false_negatives = cm.get(class_idx, other);

        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, true_positives + false_negatives);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support: true_positives + false_negatives,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

/// 2x2 confusion matrix (row = actual, column = predicted)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: [[usize; BINARY_CLASSES]; BINARY_CLASSES],
}

impl ConfusionMatrix {
    /// Build from predictions and ground truth; ids outside {0, 1} are ignored
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize]) -> Self {
        let mut cm = Self::default();
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < BINARY_CLASSES && predicted < BINARY_CLASSES {
            self.counts[actual][predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts
            .get(actual)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..BINARY_CLASSES).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }
}

/// Running average for tracking losses during training
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 1, 0, 1, 0];
        let ground_truth = vec![0, 1, 0, 0, 1, 1];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth);

        assert_eq!(cm.get(0, 0), 2);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.get(1, 0), 1);
        assert_eq!(cm.get(1, 1), 2);
        assert_eq!(cm.total(), 6);
        assert_eq!(cm.correct(), 4);
    }

    #[test]
    fn test_macro_f1_balanced() {
        // class 0: tp=2 fp=1 fn=1 -> f1 = 2/3; class 1 symmetric
        let metrics = Metrics::from_predictions(&[0, 1, 1, 0, 1, 0], &[0, 1, 0, 0, 1, 1]);
        assert!((metrics.macro_f1 - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.accuracy - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_macro_f1_counts_missing_class_as_zero() {
        // Everything is class 0 and predicted 0: class 1 has F1 = 0
        let metrics = Metrics::from_predictions(&[0, 0, 0], &[0, 0, 0]);
        assert!((metrics.per_class[0].f1 - 1.0).abs() < 1e-12);
        assert_eq!(metrics.per_class[1].f1, 0.0);
        assert!((metrics.macro_f1 - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_predicted_counts() {
        let metrics = Metrics::from_predictions(&[0, 1, 1, 1], &[0, 0, 1, 1]);
        assert_eq!(metrics.predicted_count(0), 1);
        assert_eq!(metrics.predicted_count(1), 3);
    }

    #[test]
    fn test_running_average() {
        let mut avg = RunningAverage::new();
        assert_eq!(avg.average(), 0.0);
        avg.add(1.0);
        avg.add(3.0);
        assert_eq!(avg.count(), 2);
        assert!((avg.average() - 2.0).abs() < 1e-12);
    }
}
