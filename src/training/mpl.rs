//! Meta Pseudo Labeling
//!
//! One MPL step runs these phases, strictly in order:
//! 1. teacher forward over `labeled ++ strong ++ weak` and the UDA objective
//! 2. student update on `labeled ++ strong` against the teacher's hard pseudo-labels,
//!    caching the student's labeled loss from before the update
//! 3. meta feedback: the updated student's labeled loss, `dot = old - new`, and the
//!    teacher's `dot * CE(strong, argmax strong)` term
//! 4. teacher update on `uda + meta`
//!
//! Evaluation and the stop decision happen between steps, in [`run_mpl`].

use std::path::PathBuf;

use burn::{
    module::AutodiffModule,
    optim::{Optimizer, SgdConfig},
    prelude::*,
    tensor::{activation::sigmoid, backend::AutodiffBackend, ElementConversion},
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use super::checkpoint::{load_record, CheckpointStore};
use super::evaluator::{Evaluator, TrainingState};
use super::loss::{cross_entropy, hard_labels, teacher_uda_loss, UdaLoss, UdaParams};
use super::optimizer_unit::{OptimizerUnit, StepOutcome};
use super::scaler::GradScaler;
use super::scheduler::LrScheduler;
use crate::dataset::{load_mpl_data, BatchSource, StepBatches, TextBatch, TextEncoder};
use crate::model::{RunConfig, SequenceClassifier, TextCnn, TextTransformer};
use crate::utils::error::{MplError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::random::RandomContext;
use crate::utils::tracking::ExperimentTracker;

/// Name the best MPL student is registered under
pub const MPL_MODEL_NAME: &str = "toxicity_text";

/// Scalars produced by one MPL step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub step: usize,
    /// `uda + meta`
    pub teacher_loss: f32,
    pub uda_loss: f32,
    pub labeled_loss: f32,
    pub unlabeled_loss: f32,
    pub uda_weight: f64,
    pub mask_ratio: f32,
    pub student_loss: f32,
    pub old_labeled_loss: f32,
    pub new_labeled_loss: f32,
    /// `old_labeled_loss - new_labeled_loss`; positive when the student improved
    pub dot_product: f32,
    pub meta_loss: f32,
    pub teacher: StepOutcome,
    pub student: StepOutcome,
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
    tensor.into_scalar().elem()
}

fn labeled_targets<B: Backend>(batch: &TextBatch<B>) -> Result<Tensor<B, 1, Int>> {
    batch
        .targets
        .clone()
        .ok_or_else(|| MplError::Data("labeled batch has no targets".into()))
}

/// Row-concatenate the ids and masks of several batches
fn concat<B: Backend>(batches: &[&TextBatch<B>]) -> (Tensor<B, 2, Int>, Tensor<B, 2, Int>) {
    let ids = batches.iter().map(|b| b.input_ids.clone()).collect();
    let masks = batches.iter().map(|b| b.attention_mask.clone()).collect();
    (Tensor::cat(ids, 0), Tensor::cat(masks, 0))
}

/// `sigmoid(student logits)` then unsmoothed cross-entropy, detached
fn student_labeled_loss<B: Backend, S: SequenceClassifier<B>>(
    student: &S,
    batch: &TextBatch<B>,
    targets: Tensor<B, 1, Int>,
) -> f32 {
    let probs = sigmoid(student.logits(batch.input_ids.clone(), batch.attention_mask.clone()));
    scalar(cross_entropy(probs.detach(), targets, 0.0))
}

/// `dot * CE(strong_logits, argmax(strong_logits))`; only `strong_logits` carries gradient
pub fn meta_pseudo_label_loss<B: Backend>(strong_logits: Tensor<B, 2>, dot_product: f32) -> Tensor<B, 1> {
    let hard = hard_labels(strong_logits.clone().detach());
    cross_entropy(strong_logits, hard, 0.0).mul_scalar(dot_product)
}

/// Teacher-side tensors that survive from phase 1 to phase 4
struct TeacherForward<B: Backend> {
    uda: UdaLoss<B>,
    strong_logits: Tensor<B, 2>,
}

/// Orchestrates the teacher and student [`OptimizerUnit`]s through one MPL step
pub struct MplStepEngine<B, T, S, OT, OS>
where
    B: AutodiffBackend,
    T: AutodiffModule<B> + SequenceClassifier<B>,
    S: AutodiffModule<B> + SequenceClassifier<B>,
    OT: Optimizer<T, B>,
    OS: Optimizer<S, B>,
{
    teacher: OptimizerUnit<B, T, OT>,
    student: OptimizerUnit<B, S, OS>,
    params: UdaParams,
    step: usize,
}

impl<B, T, S, OT, OS> MplStepEngine<B, T, S, OT, OS>
where
    B: AutodiffBackend,
    T: AutodiffModule<B> + SequenceClassifier<B>,
    S: AutodiffModule<B> + SequenceClassifier<B>,
    OT: Optimizer<T, B>,
    OS: Optimizer<S, B>,
{
    pub fn new(
        teacher: OptimizerUnit<B, T, OT>,
        student: OptimizerUnit<B, S, OS>,
        params: UdaParams,
    ) -> Self {
        Self {
            teacher,
            student,
            params,
            step: 0,
        }
    }

    pub fn teacher(&self) -> &T {
        self.teacher.model()
    }

    pub fn student(&self) -> &S {
        self.student.model()
    }

    /// Steps completed so far
    pub fn steps(&self) -> usize {
        self.step
    }

    pub fn into_models(self) -> (T, S) {
        (self.teacher.into_model(), self.student.into_model())
    }

    /// Run one full step on already-fetched batches.
    ///
    /// All three batches must have the same number of rows.
    pub fn step(&mut self, batches: &StepBatches<B>) -> Result<StepReport> {
        let bs = batches.labeled.len();
        if batches.strong.len() != bs || batches.weak.len() != bs || bs == 0 {
            return Err(MplError::Data(format!(
                "step batches must be equally sized and non-empty (labeled {}, strong {}, weak {})",
                bs,
                batches.strong.len(),
                batches.weak.len()
            )));
        }
        let targets = labeled_targets(&batches.labeled)?;

        let forward = self.teacher_forward(batches, targets.clone());

        let hard_pseudo = hard_labels(forward.uda.soft_labels.clone());
        let (old_labeled_loss, student_outcome) = {
            let (ids, masks) = concat(&[&batches.labeled, &batches.strong]);
            let probs = sigmoid(self.student.model().logits(ids, masks));
            let labeled = probs.clone().narrow(0, 0, bs);
            let strong = probs.narrow(0, bs, bs);

            let old = scalar(cross_entropy(labeled.detach(), targets.clone(), 0.0));
            let student_loss = cross_entropy(strong, hard_pseudo, self.params.label_smoothing);
            let outcome = self.student.step(student_loss);
            (old, outcome)
        };

        let new_labeled_loss =
            student_labeled_loss(self.student.model(), &batches.labeled, targets);
        let dot_product = old_labeled_loss - new_labeled_loss;
        let meta_loss = meta_pseudo_label_loss(forward.strong_logits, dot_product);

        let uda_value = scalar(forward.uda.total.clone());
        let meta_value = scalar(meta_loss.clone());
        let teacher_outcome = self.teacher.step(forward.uda.total.clone() + meta_loss);

        let report = StepReport {
            step: self.step,
            teacher_loss: teacher_outcome.loss,
            uda_loss: uda_value,
            labeled_loss: scalar(forward.uda.labeled.clone()),
            unlabeled_loss: scalar(forward.uda.unlabeled.clone()),
            uda_weight: forward.uda.weight,
            mask_ratio: forward.uda.mask_ratio(),
            student_loss: student_outcome.loss,
            old_labeled_loss,
            new_labeled_loss,
            dot_product,
            meta_loss: meta_value,
            teacher: teacher_outcome,
            student: student_outcome,
        };
        self.step += 1;
        Ok(report)
    }

    /// Phase 1: one teacher pass over `labeled ++ strong ++ weak`, split back in that order
    fn teacher_forward(&self, batches: &StepBatches<B>, targets: Tensor<B, 1, Int>) -> TeacherForward<B> {
        let bs = batches.labeled.len();
        let (ids, masks) = concat(&[&batches.labeled, &batches.strong, &batches.weak]);
        let logits = self.teacher.model().logits(ids, masks);

        let labeled_logits = logits.clone().narrow(0, 0, bs);
        let strong_logits = logits.clone().narrow(0, bs, bs);
        let weak_logits = logits.narrow(0, 2 * bs, bs);

        let uda = teacher_uda_loss(
            labeled_logits,
            targets,
            strong_logits.clone(),
            weak_logits,
            self.step,
            &self.params,
        );
        TeacherForward { uda, strong_logits }
    }
}

/// Summary of an MPL run
#[derive(Debug, Clone)]
pub struct MplOutcome {
    pub steps_run: usize,
    pub total_steps: usize,
    pub best_f1: f64,
    /// Where the best student was written, if any evaluation improved on 0
    pub best_checkpoint: Option<PathBuf>,
    pub stopped_early: bool,
    pub state: TrainingState,
}

pub(crate) fn progress_bar(len: usize, unit: &str) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    let template = format!("[{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} ({{eta}}) {{msg}}");
    bar.set_style(
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    bar
}

/// Build the teacher, warm-starting it from a saved record when one is configured
fn build_teacher<B: AutodiffBackend>(config: &RunConfig, device: &B::Device) -> Result<TextTransformer<B>> {
    let teacher = TextTransformer::new(
        &config.teacher,
        config.student.vocab_size,
        config.student.num_classes,
        config.data.max_length,
        device,
    );
    match &config.teacher.checkpoint {
        Some(path) => load_record(teacher, path, device),
        None => Ok(teacher),
    }
}

/// Full MPL stage: data, models, the step loop, periodic evaluation and best-student saves.
pub fn run_mpl<B: AutodiffBackend>(
    config: &RunConfig,
    device: &B::Device,
    tracker: &mut dyn ExperimentTracker,
) -> Result<MplOutcome> {
    config.validate()?;
    println!("{}", "Initializing Meta Pseudo Labeling...".green().bold());

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

    println!("{}", "Loading Dataset...".cyan());
    let data = load_mpl_data(&config.data, &encoder, &random)?;
    let mut source = BatchSource::<B>::new(
        data.labeled,
        data.weak,
        data.strong,
        data.eval,
        config.data.batch_size,
        &random,
        device,
    )?;
    let evaluator = Evaluator::new(
        source
            .eval_batches::<B>(device)
            .into_iter()
            .map(TextBatch::inner)
            .collect(),
        config.mpl.eval_interval,
    )?;

    let steps_per_epoch = source.steps_per_epoch();
    let total_steps = steps_per_epoch * config.mpl.epochs;
    let mpl = &config.mpl;
    let schedule = |lr| {
        LrScheduler::warmup_cosine(lr, mpl.warmup_steps, mpl.wait_steps, steps_per_epoch, mpl.num_cycles)
    };

    println!("{}", "Creating Models...".cyan());
    let teacher = OptimizerUnit::new(
        "teacher",
        build_teacher::<B>(config, device)?,
        SgdConfig::new().init(),
        GradScaler::from_flag(mpl.mixed_precision),
        schedule(mpl.teacher_learning_rate),
    );
    let student = OptimizerUnit::new(
        "student",
        TextCnn::<B>::new(&config.student, device),
        SgdConfig::new().init(),
        GradScaler::from_flag(mpl.mixed_precision),
        schedule(mpl.student_learning_rate),
    );
    let mut engine = MplStepEngine::new(
        teacher,
        student,
        UdaParams::from_config(mpl, config.label_smoothing),
    );

    tracker.log_params(&config.to_params()?)?;
    let store = CheckpointStore::new(&config.output_dir);

    println!();
    println!("{}", "MPL Configuration:".cyan().bold());
    println!("  🔄 Steps:            {} ({} per epoch)", total_steps, steps_per_epoch);
    println!("  📦 Batch size:       {}", config.data.batch_size);
    println!("  🎓 Teacher LR:       {:e}", mpl.teacher_learning_rate);
    println!("  🧑 Student LR:       {:e}", mpl.student_learning_rate);
    println!("  📈 Schedule:         {}", schedule(mpl.teacher_learning_rate).description());
    println!("  🌡️  Temperature:      {}", mpl.temperature);
    println!("  🎯 Threshold:        {}", mpl.threshold);
    println!("  ⏳ Patience:         {}", mpl.patience);
    println!();

    let logger = TrainingLogger::new(total_steps, "Step");
    let progress = progress_bar(total_steps, "steps");
    let mut state = TrainingState::new();
    let mut best_checkpoint = None;
    let mut stopped_early = false;

    for step in 0..total_steps {
        let batches = source.next_step();
        let report = engine.step(&batches)?;
        state.step = step + 1;
        progress.inc(1);
        debug!(
            "step {} | t_loss {:.5} | s_loss {:.5} | dot {:+.5} | mask {:.2} | w_u {:.3}",
            step, report.teacher_loss, report.student_loss, report.dot_product, report.mask_ratio, report.uda_weight
        );

        if !evaluator.is_due(step) {
            continue;
        }

        let eval = evaluator.evaluate(&engine.student().valid())?;
        progress.set_message(format!("f1 {:.4}", eval.macro_f1));
        logger.log_evaluation(step, eval.loss, eval.accuracy, eval.macro_f1, eval.zeros, eval.ones);
        tracker.log_metric("eval loss", eval.loss, step)?;
        tracker.log_metric("eval acc", eval.accuracy, step)?;
        tracker.log_metric("eval f1", eval.macro_f1, step)?;

        let previous_best = state.best_f1;
        let verdict = state.record_evaluation(eval.macro_f1, mpl.patience);
        if verdict.new_best {
            let path = store.save_best_student(engine.student())?;
            tracker.register_model(MPL_MODEL_NAME, &path)?;
            logger.log_new_best(previous_best, eval.macro_f1);
            best_checkpoint = Some(path);
        }
        if verdict.stop {
            logger.log_early_stop(step, mpl.patience);
            stopped_early = true;
            break;
        }
    }

    progress.finish_and_clear();
    logger.log_complete(state.step, state.best_f1);
    info!("best f1 = {}", state.best_f1);

    Ok(MplOutcome {
        steps_run: state.step,
        total_steps,
        best_f1: state.best_f1,
        best_checkpoint,
        stopped_early,
        state,
    })
}
