//! Experiment tracking sink
//!
//! Runs report their parameters once, scalar metrics as they are computed, and
//! register model snapshots under a fixed name. [`FileTracker`] persists all of
//! this as JSON under `<output_dir>/runs/<timestamp>/`, and copies every registered
//! model to `models/<name>/v<N>.<ext>` so later overwrites of the source file leave
//! earlier versions intact.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{MplError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub key: String,
    pub value: f64,
    pub step: usize,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub name: String,
    pub version: usize,
    /// Where this version's bytes live
    pub path: PathBuf,
    /// The file that was registered
    pub source: PathBuf,
    pub timestamp: DateTime<Local>,
}

pub trait ExperimentTracker {
    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<()>;

    fn log_metric(&mut self, key: &str, value: f64, step: usize) -> Result<()>;

    /// Register the model saved at `path` as the next version of `name`
    fn register_model(&mut self, name: &str, path: &Path) -> Result<()>;
}

/// JSON files on disk: `params.json`, `metrics.jsonl`, `models.jsonl`
pub struct FileTracker {
    run_dir: PathBuf,
    metrics: File,
    models: File,
    versions: HashMap<String, usize>,
}

impl FileTracker {
    /// Open a fresh run directory under `<output_dir>/runs/`
    pub fn create(output_dir: &Path) -> Result<Self> {
        let runs = output_dir.join("runs");
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut run_dir = runs.join(&stamp);
        let mut suffix = 1;
        while run_dir.exists() {
            run_dir = runs.join(format!("{stamp}_{suffix}"));
            suffix += 1;
        }
        fs::create_dir_all(&run_dir)?;

        let open = |name: &str| -> Result<File> {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(run_dir.join(name))
                .map_err(|e| MplError::Tracking(format!("Cannot open {name}: {e}")))
        };
        let metrics = open("metrics.jsonl")?;
        let models = open("models.jsonl")?;

        debug!("Tracking run in {:?}", run_dir);
        Ok(Self {
            run_dir,
            metrics,
            models,
            versions: HashMap::new(),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

fn append_line<T: Serialize>(file: &mut File, record: &T) -> Result<()> {
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}").map_err(|e| MplError::Tracking(e.to_string()))
}

impl ExperimentTracker for FileTracker {
    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<()> {
        fs::write(
            self.run_dir.join("params.json"),
            serde_json::to_string_pretty(params)?,
        )
        .map_err(|e| MplError::Tracking(format!("Cannot write params: {e}")))
    }

    fn log_metric(&mut self, key: &str, value: f64, step: usize) -> Result<()> {
        append_line(
            &mut self.metrics,
            &MetricRecord {
                key: key.to_string(),
                value,
                step,
                timestamp: Local::now(),
            },
        )
    }

    fn register_model(&mut self, name: &str, path: &Path) -> Result<()> {
        let version = self.versions.get(name).copied().unwrap_or(0) + 1;

        let dir = self.run_dir.join("models").join(name);
        let file_name = match path.extension() {
            Some(ext) => format!("v{version}.{}", ext.to_string_lossy()),
            None => format!("v{version}"),
        };
        let snapshot = dir.join(file_name);
        fs::create_dir_all(&dir)
            .and_then(|_| fs::copy(path, &snapshot))
            .map_err(|e| {
                MplError::Tracking(format!("Cannot snapshot {} as {name} v{version}: {e}", path.display()))
            })?;

        self.versions.insert(name.to_string(), version);
        debug!("Registered {} v{} from {:?}", name, version, path);
        append_line(
            &mut self.models,
            &ModelRecord {
                name: name.to_string(),
                version,
                path: snapshot,
                source: path.to_path_buf(),
                timestamp: Local::now(),
            },
        )
    }
}

/// Keeps everything in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryTracker {
    pub params: BTreeMap<String, String>,
    pub metrics: Vec<MetricRecord>,
    pub models: Vec<ModelRecord>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values logged under `key`, in order
    pub fn series(&self, key: &str) -> Vec<f64> {
        self.metrics
            .iter()
            .filter(|m| m.key == key)
            .map(|m| m.value)
            .collect()
    }
}

impl ExperimentTracker for MemoryTracker {
    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<()> {
        self.params.extend(params.clone());
        Ok(())
    }

    fn log_metric(&mut self, key: &str, value: f64, step: usize) -> Result<()> {
        self.metrics.push(MetricRecord {
            key: key.to_string(),
            value,
            step,
            timestamp: Local::now(),
        });
        Ok(())
    }

    fn register_model(&mut self, name: &str, path: &Path) -> Result<()> {
        let version = self.models.iter().filter(|m| m.name == name).count() + 1;
        self.models.push(ModelRecord {
            name: name.to_string(),
            version,
            path: path.to_path_buf(),
            source: path.to_path_buf(),
            timestamp: Local::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_tracker_writes_all_sinks() {
        let dir = TempDir::new().unwrap();
        let mut tracker = FileTracker::create(dir.path()).unwrap();

        let mut params = BTreeMap::new();
        params.insert("seed".to_string(), "42".to_string());
        tracker.log_params(&params).unwrap();
        tracker.log_metric("eval f1", 0.5, 10).unwrap();
        tracker.log_metric("eval f1", 0.6, 20).unwrap();
        let artifact = dir.path().join("a.mpk");
        fs::write(&artifact, b"weights").unwrap();
        tracker.register_model("toxicity_text", &artifact).unwrap();
        tracker.register_model("toxicity_text", &artifact).unwrap();

        let run = tracker.run_dir().to_path_buf();
        assert!(run.starts_with(dir.path().join("runs")));

        let params: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(run.join("params.json")).unwrap()).unwrap();
        assert_eq!(params["seed"], "42");

        let metrics: Vec<MetricRecord> = fs::read_to_string(run.join("metrics.jsonl"))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[1].step, 20);

        let models: Vec<ModelRecord> = fs::read_to_string(run.join("models.jsonl"))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(models.iter().map(|m| m.version).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_registered_versions_survive_overwrite() {
        let dir = TempDir::new().unwrap();
        let mut tracker = FileTracker::create(dir.path()).unwrap();
        let best = dir.path().join("result_temp.mpk");

        fs::write(&best, b"first best").unwrap();
        tracker.register_model("toxicity_text", &best).unwrap();
        fs::write(&best, b"second best").unwrap();
        tracker.register_model("toxicity_text", &best).unwrap();

        let models: Vec<ModelRecord> = fs::read_to_string(tracker.run_dir().join("models.jsonl"))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].source, best);
        assert_ne!(models[0].path, models[1].path);
        assert_eq!(
            models[1].path,
            tracker.run_dir().join("models/toxicity_text/v2.mpk")
        );
        assert_eq!(fs::read(&models[0].path).unwrap(), b"first best");
        assert_eq!(fs::read(&models[1].path).unwrap(), b"second best");
    }

    #[test]
    fn test_missing_artifact_is_tracking_error() {
        let dir = TempDir::new().unwrap();
        let mut tracker = FileTracker::create(dir.path()).unwrap();
        let result = tracker.register_model("toxicity_text", &dir.path().join("missing.mpk"));
        assert!(matches!(result, Err(MplError::Tracking(_))));
    }

    #[test]
    fn test_two_runs_get_distinct_dirs() {
        let dir = TempDir::new().unwrap();
        let a = FileTracker::create(dir.path()).unwrap();
        let b = FileTracker::create(dir.path()).unwrap();
        assert_ne!(a.run_dir(), b.run_dir());
    }

    #[test]
    fn test_memory_tracker_series() {
        let mut tracker = MemoryTracker::new();
        tracker.log_metric("loss", 1.0, 0).unwrap();
        tracker.log_metric("f1", 0.2, 0).unwrap();
        tracker.log_metric("loss", 0.5, 1).unwrap();
        assert_eq!(tracker.series("loss"), vec![1.0, 0.5]);
    }
}
