//! Turning the CSV tables into tokenized items for each training stage

use tracing::info;

use super::augmentation::{Augmenter, TextAugmenter};
use super::burn_dataset::TextItem;
use super::loader::{self, LabelStats, LabeledText};
use super::tokenizer::TextEncoder;
use crate::model::config::DataConfig;
use crate::utils::error::Result;
use crate::utils::random::{workers, RandomContext};

/// Everything the MPL stage consumes
#[derive(Debug, Clone)]
pub struct MplData {
    /// Labeled rows, unaugmented
    pub labeled: Vec<TextItem>,
    /// Weak view of the sampled unlabeled pool
    pub weak: Vec<TextItem>,
    /// Strong view, derived from the weak text
    pub strong: Vec<TextItem>,
    pub eval: Vec<TextItem>,
}

/// Everything the fine-tune stage consumes
#[derive(Debug, Clone)]
pub struct FinetuneData {
    /// Labeled rows with the weak augmentation applied
    pub train: Vec<TextItem>,
    pub eval: Vec<TextItem>,
}

fn encode_labeled(rows: &[LabeledText], encoder: &TextEncoder) -> Result<Vec<TextItem>> {
    let texts: Vec<String> = rows.iter().map(|row| row.text.clone()).collect();
    let encoded = encoder.encode_batch(&texts)?;
    Ok(encoded
        .into_iter()
        .zip(rows)
        .map(|(enc, row)| TextItem::labeled(enc, row.label as usize))
        .collect())
}

fn encode_unlabeled(texts: &[String], encoder: &TextEncoder) -> Result<Vec<TextItem>> {
    Ok(encoder
        .encode_batch(texts)?
        .into_iter()
        .map(TextItem::unlabeled)
        .collect())
}

fn read_eval(config: &DataConfig, encoder: &TextEncoder) -> Result<Vec<TextItem>> {
    let rows = loader::read_labeled(&config.eval_path)?;
    LabelStats::from_rows(&rows).print("Eval");
    encode_labeled(&rows, encoder)
}

pub fn load_mpl_data(
    config: &DataConfig,
    encoder: &TextEncoder,
    random: &RandomContext,
) -> Result<MplData> {
    let labeled_rows = loader::read_labeled(&config.labeled_path)?;
    LabelStats::from_rows(&labeled_rows).print("Labeled");

    let mut sampling_rng = random.worker_rng(workers::SAMPLING);
    let pool = loader::sample_unlabeled(
        loader::read_unlabeled(&config.unlabeled_path)?,
        config.curse_sample_frac,
        config.unlabeled_sample_frac,
        &mut sampling_rng,
    )?;

    let mut augment_rng = random.worker_rng(workers::AUGMENT);
    let (weak_aug, strong_aug) = (Augmenter::weak(), Augmenter::strong());
    let weak_text: Vec<String> = pool
        .iter()
        .map(|text| weak_aug.augment(text, &mut augment_rng))
        .collect();
    let strong_text: Vec<String> = weak_text
        .iter()
        .map(|text| strong_aug.augment(text, &mut augment_rng))
        .collect();

    let data = MplData {
        labeled: encode_labeled(&labeled_rows, encoder)?,
        weak: encode_unlabeled(&weak_text, encoder)?,
        strong: encode_unlabeled(&strong_text, encoder)?,
        eval: read_eval(config, encoder)?,
    };
    info!(
        "MPL data: {} labeled, {} unlabeled, {} eval",
        data.labeled.len(),
        data.weak.len(),
        data.eval.len()
    );
    Ok(data)
}

pub fn load_finetune_data(
    config: &DataConfig,
    encoder: &TextEncoder,
    random: &RandomContext,
) -> Result<FinetuneData> {
    let mut rows = loader::read_labeled(&config.labeled_path)?;
    LabelStats::from_rows(&rows).print("Labeled");

    let mut rng = random.worker_rng(workers::AUGMENT);
    let augmenter = Augmenter::weak();
    for row in &mut rows {
        row.text = augmenter.augment(&row.text, &mut rng);
    }

    Ok(FinetuneData {
        train: encode_labeled(&rows, encoder)?,
        eval: read_eval(config, encoder)?,
    })
}
