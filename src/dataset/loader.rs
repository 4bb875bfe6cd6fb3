//! CSV loading for the labeled, unlabeled and evaluation tables
//!
//! - labeled / evaluation: `text,label` with `label ∈ {0, 1}`
//! - unlabeled pool: `text,none,curse`, where the two scores only drive stratified sampling

use std::path::Path;

use colored::Colorize;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use tracing::{debug, info};

use crate::utils::error::{MplError, Result, ResultExt};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabeledText {
    pub text: String,
    pub label: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnlabeledText {
    pub text: String,
    pub none: f64,
    pub curse: f64,
}

impl UnlabeledText {
    /// Rows scored as more likely curse than clean
    pub fn is_curse_stratum(&self) -> bool {
        self.none < self.curse
    }
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Cannot open '{}'", path.display()))?;

    let mut rows = Vec::new();
    for (line, record) in reader.deserialize::<T>().enumerate() {
        // +2: header row and 1-based numbering
        let row = record.with_context(|| format!("'{}' row {}", path.display(), line + 2))?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(MplError::Data(format!("'{}' contains no rows", path.display())));
    }
    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Read a `text,label` table; every label must be 0 or 1
pub fn read_labeled(path: &Path) -> Result<Vec<LabeledText>> {
    let rows: Vec<LabeledText> = read_rows(path)?;
    if let Some((idx, bad)) = rows.iter().enumerate().find(|(_, r)| !(0..=1).contains(&r.label)) {
        return Err(MplError::Data(format!(
            "'{}' row {}: label {} outside {{0,1}}",
            path.display(),
            idx + 2,
            bad.label
        )));
    }
    Ok(rows)
}

/// Read a `text,none,curse` table
pub fn read_unlabeled(path: &Path) -> Result<Vec<UnlabeledText>> {
    read_rows(path)
}

/// Random subset of `round(frac * len)` items in random order
pub fn sample_fraction<T>(mut items: Vec<T>, frac: f64, rng: &mut ChaCha8Rng) -> Vec<T> {
    let keep = ((items.len() as f64) * frac).round() as usize;
    items.shuffle(rng);
    items.truncate(keep.min(items.len()));
    items
}

/// Two-stratum sample of the unlabeled pool.
///
/// The curse stratum is sampled at `curse_frac`, everything else at `other_frac`;
/// the union is shuffled. Fails if nothing survives sampling.
pub fn sample_unlabeled(
    rows: Vec<UnlabeledText>,
    curse_frac: f64,
    other_frac: f64,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<String>> {
    let (curse, other): (Vec<_>, Vec<_>) = rows.into_iter().partition(UnlabeledText::is_curse_stratum);
    let (curse_total, other_total) = (curse.len(), other.len());

    let mut sampled: Vec<String> = sample_fraction(other, other_frac, rng)
        .into_iter()
        .chain(sample_fraction(curse, curse_frac, rng))
        .map(|row| row.text)
        .collect();
    sampled.shuffle(rng);

    info!(
        "Unlabeled pool: {} curse + {} other rows -> {} sampled",
        curse_total,
        other_total,
        sampled.len()
    );

    if sampled.is_empty() {
        return Err(MplError::Data(
            "unlabeled sampling produced an empty pool; raise the sample fractions".into(),
        ));
    }
    Ok(sampled)
}

/// Label balance of a labeled table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelStats {
    pub total: usize,
    pub zeros: usize,
    pub ones: usize,
}

impl LabelStats {
    pub fn from_rows(rows: &[LabeledText]) -> Self {
        let ones = rows.iter().filter(|r| r.label == 1).count();
        Self {
            total: rows.len(),
            zeros: rows.len() - ones,
            ones,
        }
    }

    pub fn print(&self, name: &str) {
        println!(
            "  {} {:>7} rows | labels 0 : {} | 1 : {}",
            format!("{name}:").cyan(),
            self.total,
            self.zeros,
            self.ones
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_labeled() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "labeled.csv", "text,label\nhello there,0\n\"you, idiot\",1\n");

        let rows = read_labeled(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].text, "you, idiot");
        assert_eq!(LabelStats::from_rows(&rows), LabelStats { total: 2, zeros: 1, ones: 1 });
    }

    #[test]
    fn test_label_outside_binary_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "labeled.csv", "text,label\na,0\nb,2\n");

        let err = read_labeled(&path).unwrap_err();
        assert!(matches!(err, MplError::Data(ref msg) if msg.contains("row 3")));
    }

    #[test]
    fn test_missing_column_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "twitch.csv", "text,none\na,0.3\n");
        assert!(matches!(read_unlabeled(&path), Err(MplError::Data(_))));
    }

    #[test]
    fn test_empty_table_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "test2.csv", "text,label\n");
        assert!(matches!(read_labeled(&path), Err(MplError::Data(_))));
    }

    #[test]
    fn test_stratified_sampling() {
        let rows: Vec<UnlabeledText> = (0..40)
            .map(|i| UnlabeledText {
                text: format!("row{i}"),
                // first 8 rows are curse-stratum
                none: if i < 8 { 0.1 } else { 0.9 },
                curse: if i < 8 { 0.9 } else { 0.1 },
            })
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let sampled = sample_unlabeled(rows, 0.25, 0.5, &mut rng).unwrap();

        let curse = sampled
            .iter()
            .filter(|t| t[3..].parse::<usize>().unwrap() < 8)
            .count();
        assert_eq!(curse, 2);
        assert_eq!(sampled.len() - curse, 16);
    }

    #[test]
    fn test_sampling_to_nothing_is_error() {
        let rows = vec![UnlabeledText { text: "x".into(), none: 0.9, curse: 0.1 }];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(sample_unlabeled(rows, 0.25, 0.0, &mut rng).is_err());
    }
}
