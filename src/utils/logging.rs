//! Logging Module
//!
//! Structured logging on top of `tracing`. `RUST_LOG` wins over the configured
//! level when it is set, so a run can be made chattier without touching flags.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Create a quiet logging config (errors only)
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            ..Default::default()
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info` for anything unknown
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_tracing_level())
    }
}

/// Initialize the global subscriber
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .with_thread_ids(config.include_thread_ids)
                .compact(),
        )
        .with(filter)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Progress reporting for the MPL step loop and the fine-tune epochs
pub struct TrainingLogger {
    /// Total steps (MPL) or epochs (fine-tune)
    total: usize,
    /// What one unit of `total` is called in log lines
    unit: &'static str,
    start: Instant,
}

impl TrainingLogger {
    pub fn new(total: usize, unit: &'static str) -> Self {
        Self {
            total,
            unit,
            start: Instant::now(),
        }
    }

    /// Log one evaluation pass
    pub fn log_evaluation(&self, at: usize, loss: f64, accuracy: f64, f1: f64, zeros: usize, ones: usize) {
        tracing::info!(
            "{} {}/{} | Eval Loss: {:.5} | Acc: {:.5} | Zero: {} | One: {} | F1: {:.5} | {:.1}s",
            self.unit,
            at + 1,
            self.total,
            loss,
            accuracy,
            zeros,
            ones,
            f1,
            self.start.elapsed().as_secs_f64()
        );
    }

    /// Log a new best model
    pub fn log_new_best(&self, previous: f64, current: f64) {
        tracing::info!("New best model! F1 improved: {:.5} -> {:.5}", previous, current);
    }

    /// Log early stopping
    pub fn log_early_stop(&self, at: usize, patience: usize) {
        tracing::warn!(
            "Early stopping at {} {}: F1 unchanged for {} consecutive evaluations",
            self.unit,
            at + 1,
            patience
        );
    }

    /// Log training completion
    pub fn log_complete(&self, done: usize, best_f1: f64) {
        tracing::info!(
            "Training complete! {} {}s in {:.1}s | Best F1: {:.5}",
            done,
            self.unit,
            self.start.elapsed().as_secs_f64(),
            best_f1
        );
    }
}
