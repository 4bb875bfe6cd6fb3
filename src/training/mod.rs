//! Training module for Meta Pseudo Labeling
//!
//! This module provides:
//! - The MPL step engine and its runner (teacher/student co-training)
//! - Supervised fine-tuning of the selected student
//! - Learning rate schedules, loss scaling and optimizer bookkeeping
//! - Evaluation, patience tracking and checkpoint persistence
//!
//! ## Meta Pseudo Labeling
//!
//! Each step runs four phases on fresh labeled, weak and strong batches:
//! 1. The teacher scores all three in one forward pass and builds its UDA loss
//! 2. The student trains on the teacher's hard pseudo-labels for the strong view
//! 3. The change in student labeled loss becomes the teacher's feedback signal
//! 4. The teacher steps on UDA loss plus the feedback-weighted pseudo-label loss

pub mod checkpoint;
pub mod evaluator;
pub mod finetune;
pub mod loss;
pub mod mpl;
pub mod optimizer_unit;
pub mod scaler;
pub mod scheduler;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use checkpoint::{load_record, save_record, CheckpointStore};
pub use evaluator::{EvalReport, EvalVerdict, Evaluator, TrainingState};
pub use finetune::{run_finetune, EpochSummary, FinetuneOutcome, FINETUNE_MODEL_NAME};
pub use loss::{teacher_uda_loss, UdaLoss, UdaParams};
pub use mpl::{run_mpl, MplOutcome, MplStepEngine, StepReport, MPL_MODEL_NAME};
pub use optimizer_unit::{OptimizerUnit, StepOutcome};
pub use scaler::GradScaler;
pub use scheduler::LrScheduler;
