//! Error Handling Module
//!
//! Error taxonomy for the MPL trainer. Configuration and data problems are fatal
//! before (or at) the first step; checkpoint failures are fatal for the save that was
//! attempted. Loss-scale overflow is not an error: the gradient scaler absorbs it.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for toxicity MPL training
#[derive(Error, Debug)]
pub enum MplError {
    /// Malformed or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Empty stream, missing column, label outside {0,1}
    #[error("Data error: {0}")]
    Data(String),

    /// Tokenizer construction or encoding failure
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Model construction or shape problem
    #[error("Model error: {0}")]
    Model(String),

    /// Checkpoint could not be written or read
    #[error("Checkpoint error at '{0}': {1}")]
    Checkpoint(PathBuf, String),

    /// Experiment tracker sink failure
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience Result type
pub type Result<T> = std::result::Result<T, MplError>;

/// Extension trait for turning foreign errors into data errors with context
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| MplError::Data(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| MplError::Data(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| MplError::Data(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| MplError::Data(f()))
    }
}

impl From<serde_json::Error> for MplError {
    fn from(e: serde_json::Error) -> Self {
        MplError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MplError::Data("label 7 outside {0,1}".to_string());
        assert_eq!(format!("{}", err), "Data error: label 7 outside {0,1}");
    }

    #[test]
    fn test_checkpoint_error_mentions_path() {
        let err = MplError::Checkpoint(PathBuf::from("save/result_temp"), "disk full".into());
        let msg = format!("{}", err);
        assert!(msg.contains("result_temp"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::num::ParseIntError> = "x".parse::<i32>();
        let err = result.context("Failed to parse label").unwrap_err();
        assert!(matches!(err, MplError::Data(_)));
        assert!(format!("{}", err).contains("Failed to parse label"));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        assert!(opt.context("Value was None").is_err());
    }
}
