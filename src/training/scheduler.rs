//! Learning Rate Scheduler Module
//!
//! Step-indexed schedules used by the two training stages:
//! - MPL teacher and student: cosine decay with optional wait and linear warmup
//! - Fine-tune: one-cycle (cosine up to `max_lr`, cosine down to `initial / 1e4`)

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Multiplicative factor in `[0, 1]` for the wait / warmup / cosine schedule.
///
/// - `t < wait` gives 0
/// - `wait <= t < wait + warmup` ramps linearly as `t / max(1, wait + warmup)`
/// - afterwards `max(0, 0.5 * (1 + cos(pi * cycles * 2 * progress)))`, where progress
///   runs from 0 at the end of warmup to 1 at `total`
pub fn cosine_warmup_factor(
    step: usize,
    warmup_steps: usize,
    wait_steps: usize,
    total_steps: usize,
    num_cycles: f64,
) -> f64 {
    let t = step as f64;
    let ramp_end = warmup_steps + wait_steps;

    if step < wait_steps {
        return 0.0;
    }
    if step < ramp_end {
        return t / ramp_end.max(1) as f64;
    }

    let progress = (t - ramp_end as f64) / total_steps.saturating_sub(ramp_end).max(1) as f64;
    (0.5 * (1.0 + (PI * num_cycles * 2.0 * progress).cos())).max(0.0)
}

/// `end + (start - end) / 2 * (cos(pi * pct) + 1)`
fn cosine_anneal(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0)
}

/// Learning rate scheduler indexed by optimizer step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LrScheduler {
    /// Constant learning rate (no scheduling)
    Constant { lr: f64 },

    /// Wait, linear warmup, then cosine decay over `total_steps`
    WarmupCosine {
        base_lr: f64,
        warmup_steps: usize,
        wait_steps: usize,
        total_steps: usize,
        num_cycles: f64,
    },

    /// One-cycle policy with cosine annealing in both phases
    OneCycle {
        max_lr: f64,
        total_steps: usize,
        pct_start: f64,
        div_factor: f64,
        final_div_factor: f64,
    },
}

impl LrScheduler {
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    pub fn warmup_cosine(
        base_lr: f64,
        warmup_steps: usize,
        wait_steps: usize,
        total_steps: usize,
        num_cycles: f64,
    ) -> Self {
        Self::WarmupCosine {
            base_lr,
            warmup_steps,
            wait_steps,
            total_steps,
            num_cycles,
        }
    }

    /// One-cycle starting at `max_lr / div_factor`, peaking at `max_lr` after `pct_start`
    /// of the steps and finishing at the starting rate divided by `1e4`.
    ///
    /// The optimizer's own rate plays no part; the schedule owns the rate entirely.
    pub fn one_cycle(max_lr: f64, total_steps: usize, pct_start: f64, div_factor: f64) -> Self {
        Self::OneCycle {
            max_lr,
            total_steps,
            pct_start,
            div_factor,
            final_div_factor: 1e4,
        }
    }

    /// Learning rate for the optimizer step `step` (0-based)
    pub fn lr_at(&self, step: usize) -> f64 {
        match self {
            Self::Constant { lr } => *lr,

            Self::WarmupCosine {
                base_lr,
                warmup_steps,
                wait_steps,
                total_steps,
                num_cycles,
            } => {
                base_lr
                    * cosine_warmup_factor(
                        step,
                        *warmup_steps,
                        *wait_steps,
                        *total_steps,
                        *num_cycles,
                    )
            }

            Self::OneCycle {
                max_lr,
                total_steps,
                pct_start,
                div_factor,
                final_div_factor,
            } => {
                let initial_lr = max_lr / div_factor;
                let min_lr = initial_lr / final_div_factor;
                let peak_step = pct_start * *total_steps as f64 - 1.0;
                let last_step = total_steps.saturating_sub(1) as f64;
                let t = step as f64;

                if t <= peak_step {
                    cosine_anneal(initial_lr, *max_lr, t / peak_step.max(f64::EPSILON))
                } else {
                    let span = last_step - peak_step;
                    let pct = if span > 0.0 {
                        ((t - peak_step) / span).min(1.0)
                    } else {
                        1.0
                    };
                    cosine_anneal(*max_lr, min_lr, pct)
                }
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Constant { lr } => format!("Constant LR: {:.6}", lr),
            Self::WarmupCosine {
                base_lr,
                warmup_steps,
                wait_steps,
                total_steps,
                ..
            } => format!(
                "Warmup + Cosine: base={:e}, wait={}, warmup={}, total={}",
                base_lr, wait_steps, warmup_steps, total_steps
            ),
            Self::OneCycle {
                max_lr,
                total_steps,
                ..
            } => format!("One-Cycle: max_lr={:.6}, steps={}", max_lr, total_steps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_phase_is_zero() {
        for t in 0..5 {
            assert_eq!(cosine_warmup_factor(t, 3, 5, 100, 0.5), 0.0);
        }
        assert!(cosine_warmup_factor(5, 3, 5, 100, 0.5) > 0.0);
    }

    #[test]
    fn test_warmup_is_increasing() {
        let factors: Vec<f64> = (4..10).map(|t| cosine_warmup_factor(t, 6, 4, 100, 0.5)).collect();
        assert!(factors.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_boundaries_half_cycle() {
        let (warmup, wait, total) = (10, 5, 100);
        assert!((cosine_warmup_factor(wait + warmup, warmup, wait, total, 0.5) - 1.0).abs() < 1e-12);
        assert!(cosine_warmup_factor(total, warmup, wait, total, 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_never_negative() {
        for cycles in [0.5, 1.0, 1.7] {
            for t in 0..300 {
                assert!(cosine_warmup_factor(t, 7, 3, 120, cycles) >= 0.0);
            }
        }
    }

    #[test]
    fn test_degenerate_total_does_not_divide_by_zero() {
        // total <= warmup + wait
        let f = cosine_warmup_factor(4, 2, 2, 3, 0.5);
        assert!(f.is_finite());
        assert_eq!(cosine_warmup_factor(0, 0, 0, 0, 0.5), 1.0);
    }

    #[test]
    fn test_default_mpl_schedule_decays_monotonically() {
        let scheduler = LrScheduler::warmup_cosine(1e-3, 0, 0, 50, 0.5);
        assert_eq!(scheduler.lr_at(0), 1e-3);
        let lrs: Vec<f64> = (0..=50).map(|t| scheduler.lr_at(t)).collect();
        assert!(lrs.windows(2).all(|w| w[0] >= w[1]));
        assert!(lrs[50].abs() < 1e-15);
    }

    #[test]
    fn test_one_cycle_boundaries() {
        let scheduler = LrScheduler::one_cycle(0.01, 100, 0.1, 25.0);

        assert!((scheduler.lr_at(0) - 0.0004).abs() < 1e-12);
        // peak at pct_start * total - 1
        assert!((scheduler.lr_at(9) - 0.01).abs() < 1e-12);
        assert!(scheduler.lr_at(5) < 0.01);
        assert!(scheduler.lr_at(5) > 0.0004);
        assert!((scheduler.lr_at(99) - 0.0004 / 1e4).abs() < 1e-15);
    }

    #[test]
    fn test_one_cycle_tiny_run_is_finite() {
        let scheduler = LrScheduler::one_cycle(0.01, 1, 0.1, 25.0);
        assert!(scheduler.lr_at(0).is_finite());
    }

    #[test]
    fn test_constant_scheduler() {
        let scheduler = LrScheduler::constant(0.001);
        assert_eq!(scheduler.lr_at(0), 0.001);
        assert_eq!(scheduler.lr_at(1000), 0.001);
    }
}
