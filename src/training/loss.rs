//! Loss terms for the teacher and student updates

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::ElementConversion;

use crate::model::config::MplConfig;

/// Mean cross-entropy over the batch, with optional label smoothing (`0.0` = none)
pub fn cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    smoothing: f32,
) -> Tensor<B, 1> {
    CrossEntropyLossConfig::new()
        .with_smoothing((smoothing > 0.0).then_some(smoothing))
        .init(&logits.device())
        .forward(logits, targets)
}

/// `softmax(logits / temperature)`, cut from the graph
pub fn soft_pseudo_labels<B: Backend>(logits: Tensor<B, 2>, temperature: f32) -> Tensor<B, 2> {
    softmax(logits.detach().div_scalar(temperature), 1)
}

/// Most probable class per row
pub fn hard_labels<B: Backend>(probabilities: Tensor<B, 2>) -> Tensor<B, 1, Int> {
    probabilities.argmax(1).flatten::<1>(0, 1)
}

/// 1.0 where the top probability reaches `threshold`, else 0.0
pub fn confidence_mask<B: Backend>(soft_labels: Tensor<B, 2>, threshold: f32) -> Tensor<B, 1> {
    soft_labels
        .max_dim(1)
        .greater_equal_elem(threshold)
        .float()
        .flatten::<1>(0, 1)
}

/// `mean_i(mask_i * -sum_c soft_ic * log_softmax(logits)_ic)`
///
/// The mean runs over the whole batch, so masked rows still count in the denominator.
pub fn masked_soft_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    soft_labels: Tensor<B, 2>,
    mask: Tensor<B, 1>,
) -> Tensor<B, 1> {
    let per_row = (soft_labels * log_softmax(logits, 1))
        .sum_dim(1)
        .neg()
        .flatten::<1>(0, 1);
    (per_row * mask).mean()
}

/// `uda_lambda * min(1, (step + 1) / uda_step)`
pub fn uda_weight(step: usize, uda_lambda: f64, uda_step: f64) -> f64 {
    uda_lambda * ((step as f64 + 1.0) / uda_step).min(1.0)
}

/// Hyperparameters of the teacher's UDA objective
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UdaParams {
    pub temperature: f32,
    pub threshold: f32,
    pub uda_lambda: f64,
    pub uda_step: f64,
    pub label_smoothing: f32,
}

impl UdaParams {
    pub fn from_config(config: &MplConfig, label_smoothing: f32) -> Self {
        Self {
            temperature: config.temperature,
            threshold: config.threshold,
            uda_lambda: config.uda_lambda,
            uda_step: config.uda_step,
            label_smoothing,
        }
    }
}

/// Teacher UDA objective and the intermediates the rest of the step reuses
#[derive(Debug, Clone)]
pub struct UdaLoss<B: Backend> {
    /// `labeled + weight * unlabeled`
    pub total: Tensor<B, 1>,
    pub labeled: Tensor<B, 1>,
    pub unlabeled: Tensor<B, 1>,
    pub weight: f64,
    /// Detached, temperature-scaled distribution over the weak view
    pub soft_labels: Tensor<B, 2>,
    pub mask: Tensor<B, 1>,
}

impl<B: Backend> UdaLoss<B> {
    /// Fraction of unlabeled rows that passed the confidence threshold
    pub fn mask_ratio(&self) -> f32 {
        self.mask.clone().mean().into_scalar().elem()
    }
}

pub fn teacher_uda_loss<B: Backend>(
    labeled_logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    strong_logits: Tensor<B, 2>,
    weak_logits: Tensor<B, 2>,
    step: usize,
    params: &UdaParams,
) -> UdaLoss<B> {
    let labeled = cross_entropy(labeled_logits, targets, params.label_smoothing);

    let soft_labels = soft_pseudo_labels(weak_logits, params.temperature);
    let mask = confidence_mask(soft_labels.clone(), params.threshold);
    let unlabeled = masked_soft_cross_entropy(strong_logits, soft_labels.clone(), mask.clone());

    let weight = uda_weight(step, params.uda_lambda, params.uda_step);
    let total = labeled.clone() + unlabeled.clone().mul_scalar(weight);

    UdaLoss {
        total,
        labeled,
        unlabeled,
        weight,
        soft_labels,
        mask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn scalar(t: Tensor<TestBackend, 1>) -> f64 {
        t.into_scalar().elem::<f32>() as f64
    }

    fn logits(rows: [[f32; 2]; 2]) -> Tensor<TestBackend, 2> {
        Tensor::from_floats(rows, &Default::default())
    }

    fn log_softmax_row(row: [f64; 2]) -> [f64; 2] {
        let lse = (row[0].exp() + row[1].exp()).ln();
        [row[0] - lse, row[1] - lse]
    }

    fn params(threshold: f32) -> UdaParams {
        UdaParams {
            temperature: 0.9,
            threshold,
            uda_lambda: 1.0,
            uda_step: 1.0,
            label_smoothing: 0.0,
        }
    }

    #[test]
    fn test_cross_entropy_matches_manual() {
        let device = Default::default();
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device);
        let loss = scalar(cross_entropy(logits([[2.0, 0.0], [0.0, 1.0]]), targets, 0.0));

        let expected =
            -(log_softmax_row([2.0, 0.0])[0] + log_softmax_row([0.0, 1.0])[1]) / 2.0;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_unreachable_threshold_zeroes_unlabeled_loss() {
        let device = Default::default();
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device);
        let uda = teacher_uda_loss(
            logits([[0.3, -4.0], [5.0, 1.0]]),
            targets,
            logits([[9.0, -9.0], [-3.0, 2.5]]),
            logits([[50.0, 0.0], [0.0, 50.0]]),
            0,
            &params(1.01),
        );

        assert_eq!(scalar(uda.unlabeled.clone()), 0.0);
        assert_eq!(uda.mask_ratio(), 0.0);
    }

    #[test]
    fn test_uda_weight_ramp() {
        let (lambda, ramp) = (2.0, 10.0);
        let weights: Vec<f64> = (0..30).map(|s| uda_weight(s, lambda, ramp)).collect();

        assert!(weights.windows(2).all(|w| w[0] <= w[1]));
        assert!(weights.iter().all(|&w| w <= lambda));
        assert_eq!(uda_weight(9, lambda, ramp), lambda);
        assert!((uda_weight(4, lambda, ramp) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_teacher_uda_loss_hand_computed() {
        let device = Default::default();
        let labeled_rows = [[2.0, 0.0], [0.0, 1.0]];
        let strong_rows = [[1.0, 2.0], [0.5, -0.5]];
        let weak_rows = [[3.0, 0.0], [0.2, 0.1]];
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device);

        let uda = teacher_uda_loss(
            logits(labeled_rows.map(|r| r.map(|v| v as f32))),
            targets,
            logits(strong_rows.map(|r| r.map(|v| v as f32))),
            logits(weak_rows.map(|r| r.map(|v| v as f32))),
            0,
            &params(0.6),
        );

        let supervised = -(log_softmax_row(labeled_rows[0])[0]
            + log_softmax_row(labeled_rows[1])[1])
            / 2.0;

        let mut unlabeled = 0.0;
        for (weak, strong) in weak_rows.iter().zip(strong_rows.iter()) {
            let soft = log_softmax_row([weak[0] / 0.9, weak[1] / 0.9]).map(f64::exp);
            let confident = soft[0].max(soft[1]) >= 0.6;
            let log_q = log_softmax_row(*strong);
            let row = -(soft[0] * log_q[0] + soft[1] * log_q[1]);
            if confident {
                unlabeled += row;
            }
        }
        unlabeled /= 2.0;

        // only the first weak row is confident
        assert_eq!(uda.mask_ratio(), 0.5);
        assert!((scalar(uda.unlabeled.clone()) - unlabeled).abs() < 1e-5);
        assert!((scalar(uda.total) - (supervised + unlabeled)).abs() < 1e-5);
    }

    #[test]
    fn test_hard_labels_pick_max() {
        let labels: Vec<i64> = hard_labels(logits([[0.1, 0.9], [0.7, 0.3]]))
            .into_data()
            .iter::<i64>()
            .collect();
        assert_eq!(labels, vec![1, 0]);
    }
}
