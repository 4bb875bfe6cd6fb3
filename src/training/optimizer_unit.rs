//! A model bundled with everything that updates it
//!
//! `OptimizerUnit` owns one trainable module together with its optimizer, loss
//! scaler and learning-rate schedule. Callers hand it a scalar loss; it decides
//! whether the step is numerically safe, applies it, and advances the schedule.

use std::marker::PhantomData;

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};
use tracing::warn;

use super::scaler::GradScaler;
use super::scheduler::LrScheduler;

/// What happened during one call to [`OptimizerUnit::step`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Unscaled loss value
    pub loss: f32,
    /// Scheduled learning rate for this step
    pub lr: f64,
    /// Loss scale used for this step
    pub scale: f32,
    /// The update was dropped because the scaled loss overflowed
    pub skipped: bool,
}

/// Walks a module's float parameters looking for a non-finite gradient
struct GradientOverflow<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    found: bool,
    _backend: PhantomData<B>,
}

impl<'a, B: AutodiffBackend> GradientOverflow<'a, B> {
    fn scan<M: AutodiffModule<B>>(module: &M, grads: &'a GradientsParams) -> bool {
        let mut visitor = Self {
            grads,
            found: false,
            _backend: PhantomData,
        };
        module.visit(&mut visitor);
        visitor.found
    }
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientOverflow<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if self.found {
            return;
        }
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            // NaN survives the sum and any inf makes it inf
            let total: f32 = grad.abs().sum().into_scalar().elem();
            self.found = !total.is_finite();
        }
    }
}

pub struct OptimizerUnit<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    name: &'static str,
    model: M,
    optimizer: O,
    scaler: GradScaler,
    scheduler: LrScheduler,
    step: usize,
    _backend: PhantomData<B>,
}

impl<B, M, O> OptimizerUnit<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    pub fn new(
        name: &'static str,
        model: M,
        optimizer: O,
        scaler: GradScaler,
        scheduler: LrScheduler,
    ) -> Self {
        Self {
            name,
            model,
            optimizer,
            scaler,
            scheduler,
            step: 0,
            _backend: PhantomData,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn scaler(&self) -> &GradScaler {
        &self.scaler
    }

    /// Number of `step` calls so far, skipped ones included
    pub fn steps(&self) -> usize {
        self.step
    }

    /// Learning rate the next step will use
    pub fn current_lr(&self) -> f64 {
        self.scheduler.lr_at(self.step)
    }

    /// Back-propagate `loss` through the owned model and apply one update.
    ///
    /// The loss is scaled before `backward`; the matching unscale is folded into the
    /// learning rate. A non-finite scaled loss or any non-finite gradient drops the
    /// update and backs the scale off. The schedule advances either way.
    pub fn step(&mut self, loss: Tensor<B, 1>) -> StepOutcome {
        let loss_value: f32 = loss.clone().into_scalar().elem();
        let scale = self.scaler.scale();
        let lr = self.scheduler.lr_at(self.step);
        self.step += 1;

        if !self.scaler.check(loss_value) {
            self.scaler.update(false);
            warn!(
                "{}: non-finite loss at scale {} (loss = {}), update skipped",
                self.name, scale, loss_value
            );
            return StepOutcome {
                loss: loss_value,
                lr,
                scale,
                skipped: true,
            };
        }

        let grads = loss.mul_scalar(scale).backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        if GradientOverflow::<B>::scan(&self.model, &grads) {
            self.scaler.update(false);
            warn!(
                "{}: non-finite gradient at scale {} (loss = {}), update skipped",
                self.name, scale, loss_value
            );
            return StepOutcome {
                loss: loss_value,
                lr,
                scale,
                skipped: true,
            };
        }
        self.model = self
            .optimizer
            .step(lr / scale as f64, self.model.clone(), grads);
        self.scaler.update(true);

        StepOutcome {
            loss: loss_value,
            lr,
            scale,
            skipped: false,
        }
    }
}
