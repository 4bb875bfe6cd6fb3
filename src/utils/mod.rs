//! Utilities module for logging, metrics, and experiment tracking
//!
//! This module provides:
//! - Structured logging with tracing
//! - Metrics computation (accuracy, macro F1, confusion matrix)
//! - Error handling types
//! - Seeded random streams and the experiment tracker sink

pub mod error;
pub mod logging;
pub mod metrics;
pub mod random;
pub mod tracking;

// Re-export main types for convenience
pub use error::{MplError, Result};
pub use logging::init_logging;
pub use metrics::{ConfusionMatrix, Metrics};
pub use random::RandomContext;
pub use tracking::{ExperimentTracker, FileTracker, MemoryTracker};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}
