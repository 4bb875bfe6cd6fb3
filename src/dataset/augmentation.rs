//! Text Augmentation Module
//!
//! Punctuation-insertion augmentation for the UDA consistency views. Inserting marks
//! between words perturbs the token sequence without changing its meaning.
//!
//! # Augmentation Strategy
//!
//! - **Weak view**: `light()` preset on the unlabeled text
//! - **Strong view**: `heavy()` preset applied on top of the weak view
//! - **Fine-tune**: labeled text gets the weak view
//! - **Evaluation**: no augmentation

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Marks that may be inserted between words
const PUNCTUATION_MARKS: [&str; 6] = [".", ",", "!", "?", ";", ":"];

/// Configuration for punctuation insertion
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentationConfig {
    /// Upper bound on inserted marks as a fraction of the word count (at least one mark)
    pub insertion_ratio: f64,
    /// Probability that an inserted mark is repeated two or three times ("!!!")
    pub repeat_prob: f64,
}

impl AugmentationConfig {
    /// Weak view: a few single marks
    pub fn light() -> Self {
        Self {
            insertion_ratio: 1.0 / 3.0,
            repeat_prob: 0.0,
        }
    }

    /// Strong view: up to two thirds of the word count, marks often repeated
    pub fn heavy() -> Self {
        Self {
            insertion_ratio: 2.0 / 3.0,
            repeat_prob: 0.3,
        }
    }

    /// Leaves text untouched
    pub fn none() -> Self {
        Self {
            insertion_ratio: 0.0,
            repeat_prob: 0.0,
        }
    }
}

/// Capability the data pipeline uses to produce an augmented view of a text
pub trait TextAugmenter {
    fn augment(&self, text: &str, rng: &mut ChaCha8Rng) -> String;
}

/// Punctuation-insertion augmenter
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn weak() -> Self {
        Self::new(AugmentationConfig::light())
    }

    pub fn strong() -> Self {
        Self::new(AugmentationConfig::heavy())
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    fn pick_mark(&self, rng: &mut ChaCha8Rng) -> String {
        let mark = PUNCTUATION_MARKS.choose(rng).copied().unwrap_or(".");
        if self.config.repeat_prob > 0.0 && rng.gen_bool(self.config.repeat_prob.min(1.0)) {
            mark.repeat(rng.gen_range(2..=3))
        } else {
            mark.to_string()
        }
    }
}

impl TextAugmenter for Augmenter {
    fn augment(&self, text: &str, rng: &mut ChaCha8Rng) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() || self.config.insertion_ratio <= 0.0 {
            return text.to_string();
        }

        let max_marks = ((words.len() as f64 * self.config.insertion_ratio).ceil() as usize).max(1);
        let num_marks = rng.gen_range(1..=max_marks);

        // Slots 0..=len are the gaps before, between and after words
        let mut slots: Vec<usize> = (0..=words.len()).collect();
        slots.shuffle(rng);
        let mut chosen: Vec<usize> = slots.into_iter().take(num_marks).collect();
        chosen.sort_unstable();

        let mut out: Vec<String> = Vec::with_capacity(words.len() + chosen.len());
        let mut next = chosen.iter().peekable();
        for (i, word) in words.iter().enumerate() {
            while next.peek().is_some_and(|&&slot| slot == i) {
                out.push(self.pick_mark(rng));
                next.next();
            }
            out.push((*word).to_string());
        }
        for _ in next {
            out.push(self.pick_mark(rng));
        }

        out.join(" ")
    }
}
