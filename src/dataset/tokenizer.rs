//! Tokenizer wrapper
//!
//! Turns raw text into fixed-length `input_ids` + `attention_mask` rows. The
//! underlying `tokenizers::Tokenizer` is either loaded from a `tokenizer.json` or
//! assembled from a BERT-style `vocab.txt` (WordPiece, no lower-casing, `[CLS] ... [SEP]`).

use std::collections::HashMap;
use std::path::Path;

use tokenizers::decoders::wordpiece::WordPiece as WordPieceDecoder;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{AddedToken, Tokenizer};

use crate::utils::error::{MplError, Result};

const PAD: &str = "[PAD]";
const UNK: &str = "[UNK]";
const CLS: &str = "[CLS]";
const SEP: &str = "[SEP]";

/// One encoded text, already padded/truncated to `max_length`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedText {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

pub struct TextEncoder {
    tokenizer: Tokenizer,
    max_length: usize,
    pad_id: u32,
    sep_id: u32,
}

impl TextEncoder {
    /// Load from `tokenizer.json`, or build a WordPiece tokenizer from any other file
    /// treated as a one-token-per-line vocabulary
    pub fn from_path(path: &Path, max_length: usize) -> Result<Self> {
        let tokenizer = if path.extension().is_some_and(|ext| ext == "json") {
            Tokenizer::from_file(path).map_err(|e| {
                MplError::Tokenizer(format!("Cannot load tokenizer from '{}': {e}", path.display()))
            })?
        } else {
            Self::wordpiece_from_file(path)?
        };

        Self::new(tokenizer, max_length)
    }

    /// BERT WordPiece tokenizer over a `vocab.txt`; a token's id is its line number
    /// and a repeated token keeps its last line
    pub fn wordpiece_from_file(path: &Path) -> Result<Tokenizer> {
        let file = path.to_str().ok_or_else(|| {
            MplError::Tokenizer(format!("Vocabulary path '{}' is not UTF-8", path.display()))
        })?;
        let model = WordPiece::from_file(file)
            .unk_token(UNK.to_string())
            .build()
            .map_err(|e| {
                MplError::Tokenizer(format!("Cannot read vocabulary '{}': {e}", path.display()))
            })?;
        Self::bert_wordpiece(model)
    }

    /// Same numbering as [`Self::wordpiece_from_file`], from in-memory lines
    pub fn wordpiece_from_vocab<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<Tokenizer> {
        let vocab: HashMap<String, u32> = lines
            .into_iter()
            .enumerate()
            .map(|(id, token)| (token.trim_end().to_string(), id as u32))
            .collect();
        let model = WordPiece::builder()
            .vocab(vocab)
            .unk_token(UNK.to_string())
            .build()
            .map_err(|e| MplError::Tokenizer(format!("Cannot build WordPiece model: {e}")))?;
        Self::bert_wordpiece(model)
    }

    /// Cased BERT pipeline around a WordPiece model: `[CLS] ... [SEP]`, no lower-casing
    fn bert_wordpiece(model: WordPiece) -> Result<Tokenizer> {
        let mut tokenizer = Tokenizer::new(model);

        let special_id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| MplError::Tokenizer(format!("Vocabulary is missing {token}")))
        };
        special_id(PAD)?;
        special_id(UNK)?;
        let cls_id = special_id(CLS)?;
        let sep_id = special_id(SEP)?;

        tokenizer
            .with_normalizer(BertNormalizer::new(true, true, None, false))
            .with_pre_tokenizer(BertPreTokenizer)
            .with_post_processor(BertProcessing::new((SEP.to_string(), sep_id), (CLS.to_string(), cls_id)))
            .with_decoder(WordPieceDecoder::new("##".to_string(), true));
        tokenizer.add_special_tokens(&[
            AddedToken::from(PAD, true),
            AddedToken::from(UNK, true),
            AddedToken::from(CLS, true),
            AddedToken::from(SEP, true),
        ]);

        Ok(tokenizer)
    }

    pub fn new(tokenizer: Tokenizer, max_length: usize) -> Result<Self> {
        if max_length < 2 {
            return Err(MplError::Config("max_length must be at least 2".into()));
        }
        let id_of = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| MplError::Tokenizer(format!("Tokenizer has no {token} token")))
        };
        let pad_id = id_of(PAD)?;
        let sep_id = id_of(SEP)?;

        Ok(Self {
            tokenizer,
            max_length,
            pad_id,
            sep_id,
        })
    }

    /// Vocabulary size including special tokens
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn encode(&self, text: &str) -> Result<EncodedText> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| MplError::Tokenizer(format!("Cannot encode text: {e}")))?;
        Ok(self.fit(encoding.get_ids()))
    }

    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<EncodedText>> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| MplError::Tokenizer(format!("Cannot encode batch: {e}")))?;
        Ok(encodings.iter().map(|e| self.fit(e.get_ids())).collect())
    }

    /// Truncate (keeping the closing `[SEP]`) or pad to exactly `max_length`
    fn fit(&self, ids: &[u32]) -> EncodedText {
        let mut input_ids: Vec<u32> = if ids.len() > self.max_length {
            let mut kept = ids[..self.max_length - 1].to_vec();
            kept.push(self.sep_id);
            kept
        } else {
            ids.to_vec()
        };

        let real = input_ids.len();
        input_ids.resize(self.max_length, self.pad_id);
        let mut attention_mask = vec![1u32; real];
        attention_mask.resize(self.max_length, 0);

        EncodedText {
            input_ids,
            attention_mask,
        }
    }
}
