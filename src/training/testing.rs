//! Shared fixtures for the training tests

use std::fs;

use tempfile::TempDir;

use crate::dataset::tokenizer::tests::TEST_VOCAB;
use crate::model::RunConfig;

/// A tiny corpus on disk plus a config sized for it
pub(crate) fn write_corpus(dir: &TempDir) -> RunConfig {
    let path = |name: &str| dir.path().join(name);
    fs::write(path("vocab.txt"), TEST_VOCAB.join("\n")).unwrap();
    fs::write(
        path("labeled.csv"),
        "text,label\nyou are nice,0\nyou idiot,1\nnice,0\nbad idiot,1\n",
    )
    .unwrap();
    fs::write(
        path("unlabeled.csv"),
        "text,none,curse\nyou are bad,0.2,0.8\nnice nice,0.9,0.1\nidiots,0.3,0.7\nare you,0.6,0.4\n",
    )
    .unwrap();
    fs::write(path("eval.csv"), "text,label\nnice,0\nidiot,1\nyou are,0\n").unwrap();

    let mut config = RunConfig::default();
    config.output_dir = path("save");
    config.data.labeled_path = path("labeled.csv");
    config.data.unlabeled_path = path("unlabeled.csv");
    config.data.eval_path = path("eval.csv");
    config.data.vocab_path = path("vocab.txt");
    config.data.max_length = 8;
    config.data.batch_size = 2;
    config.data.unlabeled_sample_frac = 1.0;
    config.data.curse_sample_frac = 1.0;
    config.student.vocab_size = 16;
    config.student.embedding_dim = 8;
    config.student.hidden_size = 8;
    config.teacher.d_model = 8;
    config.teacher.d_ff = 16;
    config.teacher.n_heads = 2;
    config.teacher.n_layers = 1;
    config.mpl.epochs = 3;
    config.mpl.eval_interval = 2;
    config.mpl.teacher_learning_rate = 1e-3;
    config.mpl.student_learning_rate = 1e-3;
    config
}
