//! Toxicity MPL CLI
//!
//! Entry point for semi-supervised toxic text classification: Meta Pseudo Labeling
//! followed by supervised fine-tuning of the selected student.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use toxicity_mpl::backend::{backend_name, default_device, TrainingBackend};
use toxicity_mpl::training::{run_finetune, run_mpl};
use toxicity_mpl::utils::format_duration;
use toxicity_mpl::utils::logging::{init_logging, LogConfig, LogLevel};
use toxicity_mpl::utils::tracking::FileTracker;
use toxicity_mpl::RunConfig;

/// Meta Pseudo Labels for toxic text classification
///
/// A teacher trained with UDA consistency produces pseudo-labels for a TextCNN student,
/// and learns from how much those labels help the student on labeled data.
#[derive(Parser, Debug)]
#[command(name = "toxicity_mpl")]
#[command(version)]
#[command(about = "Semi-supervised toxicity classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose/--quiet
    #[arg(long)]
    log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Co-train teacher and student with Meta Pseudo Labels
    Train(RunArgs),

    /// Fine-tune the best MPL student on the labeled set
    Finetune(RunArgs),

    /// MPL training followed by fine-tuning
    Run(RunArgs),
}

/// Config file plus per-field overrides
#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// TOML config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for checkpoints and tracker runs
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Labeled training CSV (`text,label`)
    #[arg(long)]
    labeled: Option<PathBuf>,

    /// Unlabeled pool CSV (`text,none,curse`)
    #[arg(long)]
    unlabeled: Option<PathBuf>,

    /// Evaluation CSV (`text,label`)
    #[arg(long)]
    eval: Option<PathBuf>,

    /// WordPiece `vocab.txt` or a `tokenizer.json`
    #[arg(long)]
    vocab: Option<PathBuf>,

    /// Batch size for every stream
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Fraction of the non-curse unlabeled stratum to sample
    #[arg(long)]
    unlabeled_sample_frac: Option<f64>,

    /// Number of MPL epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Teacher learning rate
    #[arg(long)]
    teacher_lr: Option<f64>,

    /// Student learning rate
    #[arg(long)]
    student_lr: Option<f64>,

    /// Softmax temperature for the teacher's soft pseudo-labels
    #[arg(long)]
    temperature: Option<f32>,

    /// Confidence threshold for the consistency mask
    #[arg(long)]
    threshold: Option<f32>,

    /// Consistency loss weight
    #[arg(long)]
    uda_lambda: Option<f64>,

    /// Steps over which the consistency weight ramps up
    #[arg(long)]
    uda_step: Option<f64>,

    /// Label smoothing for the cross-entropy terms
    #[arg(long)]
    label_smoothing: Option<f32>,

    /// Evaluations without improvement before stopping
    #[arg(long)]
    patience: Option<usize>,

    /// Evaluate every N steps
    #[arg(long)]
    eval_interval: Option<usize>,

    /// Saved teacher record to warm-start from
    #[arg(long)]
    teacher_checkpoint: Option<PathBuf>,

    /// Disable dynamic loss scaling
    #[arg(long, default_value = "false")]
    no_mixed_precision: bool,

    /// Fine-tune epochs
    #[arg(long)]
    finetune_epochs: Option<usize>,

    /// Fine-tune schedule starts at max_lr / this factor
    #[arg(long)]
    finetune_div_factor: Option<f64>,

    /// Fine-tune peak learning rate
    #[arg(long)]
    finetune_max_lr: Option<f64>,
}

impl RunArgs {
    fn resolve(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load_toml(path)?,
            None => RunConfig::default(),
        };

        fn set<T: Clone>(field: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *field = v.clone();
            }
        }

        set(&mut config.output_dir, &self.output_dir);
        set(&mut config.seed, &self.seed);
        set(&mut config.label_smoothing, &self.label_smoothing);

        let data = &mut config.data;
        set(&mut data.labeled_path, &self.labeled);
        set(&mut data.unlabeled_path, &self.unlabeled);
        set(&mut data.eval_path, &self.eval);
        set(&mut data.vocab_path, &self.vocab);
        set(&mut data.batch_size, &self.batch_size);
        set(&mut data.unlabeled_sample_frac, &self.unlabeled_sample_frac);

        let mpl = &mut config.mpl;
        set(&mut mpl.epochs, &self.epochs);
        set(&mut mpl.teacher_learning_rate, &self.teacher_lr);
        set(&mut mpl.student_learning_rate, &self.student_lr);
        set(&mut mpl.temperature, &self.temperature);
        set(&mut mpl.threshold, &self.threshold);
        set(&mut mpl.uda_lambda, &self.uda_lambda);
        set(&mut mpl.uda_step, &self.uda_step);
        set(&mut mpl.patience, &self.patience);
        set(&mut mpl.eval_interval, &self.eval_interval);
        if self.no_mixed_precision {
            mpl.mixed_precision = false;
        }

        if self.teacher_checkpoint.is_some() {
            config.teacher.checkpoint = self.teacher_checkpoint.clone();
        }

        let ft = &mut config.finetune;
        set(&mut ft.epochs, &self.finetune_epochs);
        set(&mut ft.div_factor, &self.finetune_div_factor);
        set(&mut ft.max_lr, &self.finetune_max_lr);

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::parse(level);
    }

    let _ = init_logging(&log_config);

    print_banner();

    let (args, mpl, finetune) = match &cli.command {
        Commands::Train(args) => (args, true, false),
        Commands::Finetune(args) => (args, false, true),
        Commands::Run(args) => (args, true, true),
    };

    let config = args.resolve()?;
    let resolved = config.output_dir.join("config.json");
    config
        .save_json(&resolved)
        .with_context(|| format!("saving resolved config to {}", resolved.display()))?;

    let device = default_device();
    let mut tracker = FileTracker::create(&config.output_dir)?;
    info!("Backend: {}", backend_name());
    info!("Tracker run directory: {}", tracker.run_dir().display());

    let started = Instant::now();

    if mpl {
        let outcome = run_mpl::<TrainingBackend>(&config, &device, &mut tracker)?;
        println!();
        println!("{}", "MPL Summary:".cyan().bold());
        println!("  Steps:        {}/{}", outcome.steps_run, outcome.total_steps);
        println!("  Best F1:      {:.3}", outcome.best_f1);
        println!("  Early stop:   {}", outcome.stopped_early);
        match &outcome.best_checkpoint {
            Some(path) => println!("  Checkpoint:   {}", path.display()),
            None => println!("  Checkpoint:   {}", "none (F1 never above 0)".yellow()),
        }
    }

    if finetune {
        let outcome = run_finetune::<TrainingBackend>(&config, &device, &mut tracker)?;
        println!();
        println!("{}", "Fine-tune Summary:".cyan().bold());
        println!("  Epochs:       {}", outcome.history.len());
        println!("  Best F1:      {:.3}", outcome.best_f1);
        if let Some(path) = &outcome.best_checkpoint {
            println!("  Checkpoint:   {}", path.display());
        }
    }

    println!();
    println!(
        "{} Finished in {}",
        "✓".green().bold(),
        format_duration(started.elapsed().as_secs_f64())
    );

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════╗
 ║   Toxicity MPL                                               ║
 ║   Meta Pseudo Labels + UDA for toxic text, on Burn + Rust    ║
 ╚══════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}
