//! Run Configuration Module
//!
//! One immutable [`RunConfig`] record is assembled at start-up (defaults, then an
//! optional TOML file, then CLI overrides), validated, and then only ever read.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{MplError, Result};

/// Complete configuration for an MPL run and the fine-tune that follows it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Seed for the [`RandomContext`](crate::utils::random::RandomContext)
    pub seed: u64,

    /// Root for checkpoints, tracker runs and the resolved config
    pub output_dir: PathBuf,

    /// Label smoothing for the smoothed cross-entropy terms (MPL and fine-tune)
    pub label_smoothing: f32,

    pub data: DataConfig,
    pub student: StudentConfig,
    pub teacher: TeacherConfig,
    pub mpl: MplConfig,
    pub finetune: FinetuneConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            output_dir: PathBuf::from("save"),
            label_smoothing: 0.0,
            data: DataConfig::default(),
            student: StudentConfig::default(),
            teacher: TeacherConfig::default(),
            mpl: MplConfig::default(),
            finetune: FinetuneConfig::default(),
        }
    }
}

/// Input files and batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Labeled CSV (`text,label`)
    pub labeled_path: PathBuf,
    /// Unlabeled pool CSV (`text,none,curse`)
    pub unlabeled_path: PathBuf,
    /// Held-out evaluation CSV (`text,label`)
    pub eval_path: PathBuf,
    /// `vocab.txt` (WordPiece) or `tokenizer.json`
    pub vocab_path: PathBuf,
    /// Fixed token sequence length after padding/truncation
    pub max_length: usize,
    pub batch_size: usize,
    /// Sampling fraction for the non-curse stratum of the unlabeled pool
    pub unlabeled_sample_frac: f64,
    /// Sampling fraction for the curse stratum (`none < curse`)
    pub curse_sample_frac: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            labeled_path: PathBuf::from("labeled.csv"),
            unlabeled_path: PathBuf::from("twitch.csv"),
            eval_path: PathBuf::from("test2.csv"),
            vocab_path: PathBuf::from("vocab.txt"),
            max_length: 128,
            batch_size: 32,
            unlabeled_sample_frac: 0.025,
            curse_sample_frac: 0.25,
        }
    }
}

/// Student (TextCNN) hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentConfig {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_size: usize,
    pub num_classes: usize,
    /// Dropout on the embedding and linear layers
    pub dropout1: f64,
    /// Dropout on the convolution output
    pub dropout2: f64,
    pub kernel_size: usize,
}

impl Default for StudentConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30000,
            embedding_dim: 100,
            hidden_size: 128,
            num_classes: 2,
            dropout1: 0.3,
            dropout2: 0.4,
            kernel_size: 3,
        }
    }
}

/// Teacher (transformer encoder) hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeacherConfig {
    pub d_model: usize,
    pub d_ff: usize,
    pub n_heads: usize,
    pub n_layers: usize,
    pub dropout: f64,
    /// Pretrained teacher record to warm-start from
    pub checkpoint: Option<PathBuf>,
}

impl Default for TeacherConfig {
    fn default() -> Self {
        Self {
            d_model: 256,
            d_ff: 512,
            n_heads: 4,
            n_layers: 2,
            dropout: 0.1,
            checkpoint: None,
        }
    }
}

/// Meta Pseudo Labeling stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MplConfig {
    pub epochs: usize,
    pub teacher_learning_rate: f64,
    pub student_learning_rate: f64,
    /// Softmax temperature for the soft pseudo-labels
    pub temperature: f32,
    /// Confidence a soft pseudo-label needs to count in the consistency loss
    pub threshold: f32,
    /// Cap of the unsupervised loss weight
    pub uda_lambda: f64,
    /// Steps over which the unsupervised weight ramps up to `uda_lambda`
    pub uda_step: f64,
    /// Consecutive equal-F1 evaluations tolerated before stopping
    pub patience: usize,
    /// Evaluate every N steps (never at step 0)
    pub eval_interval: usize,
    pub warmup_steps: usize,
    pub wait_steps: usize,
    pub num_cycles: f64,
    /// Loss scaling for the teacher and student updates
    pub mixed_precision: bool,
}

impl Default for MplConfig {
    fn default() -> Self {
        Self {
            epochs: 1,
            teacher_learning_rate: 1e-7,
            student_learning_rate: 1e-7,
            temperature: 0.9,
            threshold: 0.6,
            uda_lambda: 1.0,
            uda_step: 1.0,
            patience: 20,
            eval_interval: 10,
            warmup_steps: 0,
            wait_steps: 0,
            num_cycles: 0.5,
            mixed_precision: true,
        }
    }
}

/// Supervised fine-tune stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinetuneConfig {
    pub epochs: usize,
    /// Peak rate of the one-cycle schedule
    pub max_lr: f64,
    /// Fraction of the schedule spent increasing the rate
    pub pct_start: f64,
    /// The schedule starts at `max_lr / div_factor`
    pub div_factor: f64,
    pub weight_decay: f32,
}

impl Default for FinetuneConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            max_lr: 0.01,
            pct_start: 0.1,
            div_factor: 25.0,
            weight_decay: 0.01,
        }
    }
}

impl RunConfig {
    /// Load a TOML file; missing keys keep their defaults
    pub fn load_toml(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MplError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;

        toml::from_str(&content).map_err(|e| {
            MplError::Config(format!("Failed to parse config {}: {e}", path.display()))
        })
    }

    /// Save configuration to a JSON file
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Flatten the record into dotted `key -> value` pairs for the experiment tracker
    pub fn to_params(&self) -> Result<BTreeMap<String, String>> {
        let value = serde_json::to_value(self)?;
        let mut params = BTreeMap::new();
        flatten_into(&mut params, String::new(), &value);
        Ok(params)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(MplError::Config(msg.to_string()));

        if self.data.batch_size == 0 {
            return fail("batch_size must be greater than 0");
        }
        if self.data.max_length < 2 {
            return fail("max_length must leave room for [CLS] and [SEP]");
        }
        for (name, frac) in [
            ("unlabeled_sample_frac", self.data.unlabeled_sample_frac),
            ("curse_sample_frac", self.data.curse_sample_frac),
        ] {
            if !(0.0..=1.0).contains(&frac) {
                return Err(MplError::Config(format!("{name} must be in [0.0, 1.0]")));
            }
        }

        if self.student.num_classes != 2 {
            return fail("num_classes must be 2: labels and macro F1 are defined over {0, 1}");
        }
        if self.student.vocab_size == 0 || self.student.embedding_dim == 0 || self.student.hidden_size == 0 {
            return fail("vocab_size, embedding_dim and hidden_size must be positive");
        }
        if self.student.kernel_size == 0 || self.student.kernel_size % 2 == 0 {
            return fail("kernel_size must be a positive odd number");
        }
        for (name, p) in [
            ("dropout1", self.student.dropout1),
            ("dropout2", self.student.dropout2),
            ("teacher.dropout", self.teacher.dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(MplError::Config(format!("{name} must be in range [0.0, 1.0)")));
            }
        }
        if self.teacher.n_heads == 0 || self.teacher.d_model % self.teacher.n_heads != 0 {
            return fail("teacher d_model must be divisible by n_heads");
        }
        if !(0.0..=1.0).contains(&self.label_smoothing) {
            return fail("label_smoothing must be in [0.0, 1.0]");
        }

        let mpl = &self.mpl;
        if mpl.epochs == 0 {
            return fail("epochs must be greater than 0");
        }
        if mpl.teacher_learning_rate < 0.0 || mpl.student_learning_rate < 0.0 {
            return fail("learning rates must be non-negative");
        }
        if mpl.temperature <= 0.0 {
            return fail("temperature must be positive");
        }
        if mpl.threshold < 0.0 {
            return fail("threshold must be non-negative");
        }
        if mpl.uda_step <= 0.0 || mpl.uda_lambda < 0.0 {
            return fail("uda_step must be positive and uda_lambda non-negative");
        }
        if mpl.patience == 0 || mpl.eval_interval == 0 {
            return fail("patience and eval_interval must be greater than 0");
        }

        let ft = &self.finetune;
        if ft.epochs == 0 {
            return fail("finetune epochs must be greater than 0");
        }
        if ft.max_lr <= 0.0 {
            return fail("finetune max_lr must be greater than 0");
        }
        if ft.div_factor < 1.0 {
            return fail("finetune div_factor must be at least 1");
        }
        if !(ft.pct_start > 0.0 && ft.pct_start < 1.0) {
            return fail("finetune pct_start must be in (0.0, 1.0)");
        }

        Ok(())
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(out, key, child);
            }
        }
        serde_json::Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_documented_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.data.batch_size, 32);
        assert_eq!(config.student.embedding_dim, 100);
        assert_eq!(config.student.hidden_size, 128);
        assert_eq!(config.mpl.patience, 20);
        assert_eq!(config.mpl.eval_interval, 10);
        assert!((config.mpl.threshold - 0.6).abs() < 1e-6);
        assert!((config.finetune.max_lr - 0.01).abs() < 1e-12);
        assert_eq!(config.finetune.div_factor, 25.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = RunConfig::default();
        config.data.batch_size = 0;
        assert!(matches!(config.validate(), Err(MplError::Config(_))));

        let mut config = RunConfig::default();
        config.student.num_classes = 3;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.finetune.div_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.mpl.temperature = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unreachable_threshold_is_allowed() {
        let mut config = RunConfig::default();
        config.mpl.threshold = 1.01;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_params_flattens_sections() {
        let params = RunConfig::default().to_params().unwrap();
        assert_eq!(params.get("seed").map(String::as_str), Some("42"));
        assert_eq!(params.get("student.hidden_size").map(String::as_str), Some("128"));
        assert_eq!(params.get("data.labeled_path").map(String::as_str), Some("labeled.csv"));
        assert_eq!(params.get("teacher.checkpoint").map(String::as_str), Some("null"));
    }

    #[test]
    fn test_toml_partial_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "seed = 7\n[mpl]\npatience = 3\n").unwrap();

        let config = RunConfig::load_toml(&path).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.mpl.patience, 3);
        assert_eq!(config.mpl.eval_interval, 10);
        assert_eq!(config.data, DataConfig::default());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = RunConfig::default();
        config.save_json(&path).unwrap();

        let loaded: RunConfig = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, config);
    }
}
