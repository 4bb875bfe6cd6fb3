//! Model snapshots on disk
//!
//! Layout under the run's output directory:
//! - `meta_pseudo/result_temp.mpk`: best student seen during MPL (overwritten on improvement)
//! - `finetune/result_{f1:.3}.mpk`: one file per fine-tune improvement, keyed by F1
//!
//! Paths always carry the recorder extension explicitly, because the recorder replaces
//! whatever follows the last dot and an F1 key such as `0.812` would be eaten.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use tracing::info;

use crate::utils::error::{MplError, Result};

const RECORD_EXTENSION: &str = "mpk";

/// Full precision, so a restored model scores exactly what it scored when saved
type Recorder = NamedMpkFileRecorder<FullPrecisionSettings>;

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: output_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn best_student_path(&self) -> PathBuf {
        self.root
            .join("meta_pseudo")
            .join(format!("result_temp.{RECORD_EXTENSION}"))
    }

    pub fn finetuned_path(&self, f1: f64) -> PathBuf {
        self.root
            .join("finetune")
            .join(format!("result_{f1:.3}.{RECORD_EXTENSION}"))
    }

    pub fn save_best_student<B: Backend, M: Module<B>>(&self, model: &M) -> Result<PathBuf> {
        let path = self.best_student_path();
        save_record(model, &path)?;
        Ok(path)
    }

    pub fn save_finetuned<B: Backend, M: Module<B>>(&self, model: &M, f1: f64) -> Result<PathBuf> {
        let path = self.finetuned_path(f1);
        save_record(model, &path)?;
        Ok(path)
    }
}

/// Save a module with the full-precision MessagePack recorder
pub fn save_record<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let recorder = Recorder::default();
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| MplError::Checkpoint(path.to_path_buf(), format!("{e:?}")))?;

    info!("Checkpoint saved to {:?}", path);
    Ok(())
}

/// Load weights from `path` into `model`
pub fn load_record<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    if !path.exists() {
        return Err(MplError::Checkpoint(
            path.to_path_buf(),
            "file does not exist".into(),
        ));
    }

    let recorder = Recorder::default();
    let model = model
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| MplError::Checkpoint(path.to_path_buf(), format!("{e:?}")))?;

    info!("Checkpoint loaded from {:?}", path);
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SequenceClassifier, StudentConfig, TextCnn};
    use burn::prelude::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn tiny_config() -> StudentConfig {
        StudentConfig {
            vocab_size: 16,
            embedding_dim: 4,
            hidden_size: 6,
            ..StudentConfig::default()
        }
    }

    #[test]
    fn test_paths_keep_f1_key() {
        let store = CheckpointStore::new("save");
        assert_eq!(
            store.best_student_path(),
            PathBuf::from("save/meta_pseudo/result_temp.mpk")
        );
        assert_eq!(
            store.finetuned_path(0.81234),
            PathBuf::from("save/finetune/result_0.812.mpk")
        );
    }

    #[test]
    fn test_round_trip_restores_predictions() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let device = Default::default();

        TestBackend::seed(1);
        let saved = TextCnn::<TestBackend>::new(&tiny_config(), &device);
        let path = store.save_finetuned(&saved, 0.5).unwrap();
        assert!(path.exists());

        let fresh = TextCnn::<TestBackend>::new(&tiny_config(), &device);
        let loaded = load_record(fresh, &path, &device).unwrap();

        let ids = Tensor::<TestBackend, 2, Int>::from_ints([[2, 5, 9, 3]], &device);
        let mask = ids.clone().ones_like();
        let expected = saved.logits(ids.clone(), mask.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = loaded.logits(ids, mask).into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_best_student_restores_exact_weights() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let device = Default::default();

        let saved = TextCnn::<TestBackend>::new(&tiny_config(), &device);
        store.save_best_student(&saved).unwrap();
        let loaded = load_record(
            TextCnn::<TestBackend>::new(&tiny_config(), &device),
            &store.best_student_path(),
            &device,
        )
        .unwrap();

        let ids = Tensor::<TestBackend, 2, Int>::from_ints([[7, 1, 4, 12], [3, 3, 0, 0]], &device);
        let mask = ids.clone().ones_like();
        assert_eq!(
            saved.logits(ids.clone(), mask.clone()).into_data().to_vec::<f32>().unwrap(),
            loaded.logits(ids, mask).into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_missing_file_is_checkpoint_error() {
        let device = Default::default();
        let model = TextCnn::<TestBackend>::new(&tiny_config(), &device);
        let result = load_record(model, Path::new("/nonexistent/result_temp.mpk"), &device);
        assert!(matches!(result, Err(MplError::Checkpoint(_, _))));
    }
}
