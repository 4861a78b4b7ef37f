//! Text tokenizer producing fixed-length id/mask sequences.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokenizers::decoders::wordpiece::WordPiece as WordPieceDecoder;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{Model, Tokenizer, TokenizerBuilder, TokenizerImpl};
use tokio_util::sync::CancellationToken;

use super::batch::{Encoded, TokenizedBatch};
use crate::config::DEFAULT_MAX_LENGTH;
use crate::{Error, Result};

/// WordPiece vocabulary file.
pub const VOCAB_FILE: &str = "vocab.txt";

/// Serialized `tokenizers` definition.
pub const TOKENIZER_JSON_FILE: &str = "tokenizer.json";

/// Tokenizer settings written next to the vocabulary.
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

const START_TOKENS: &[&str] = &["[CLS]", "<s>"];
const END_TOKENS: &[&str] = &["[SEP]", "</s>"];
const PAD_TOKENS: &[&str] = &["[PAD]", "<pad>"];
const UNK_TOKEN: &str = "[UNK]";

type BertTokenizer =
    TokenizerImpl<WordPiece, BertNormalizer, BertPreTokenizer, BertProcessing, WordPieceDecoder>;

#[derive(Debug, Deserialize)]
struct TokenizerConfigFile {
    #[serde(default = "default_lower_case")]
    do_lower_case: bool,
}

const fn default_lower_case() -> bool {
    true
}

/// Immutable, thread-safe tokenizer.
///
/// Every encoding is padded or truncated to exactly `max_length` tokens,
/// start/end markers included.
pub struct TextTokenizer {
    inner: Tokenizer,
    max_length: usize,
    pad_id: i64,
    end_id: Option<u32>,
    source: PathBuf,
}

impl TextTokenizer {
    /// Load a tokenizer with the default maximum length.
    ///
    /// # Errors
    ///
    /// See [`TextTokenizer::from_path`].
    pub fn from_path_default(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_path(path, DEFAULT_MAX_LENGTH)
    }

    /// Load a tokenizer from a model directory or a vocabulary file.
    ///
    /// A directory is searched for `vocab.txt`, then `tokenizer.json`. A file
    /// ending in `.json` is read as a `tokenizers` definition; any other file
    /// is read as a WordPiece vocabulary.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `max_length < 2`, `Error::NotFound`
    /// if no vocabulary can be located, or a tokenization error if the
    /// vocabulary cannot be parsed.
    pub fn from_path(path: impl AsRef<Path>, max_length: usize) -> Result<Self> {
        if max_length < 2 {
            return Err(Error::config(format!(
                "max_length must be at least 2, got {max_length}"
            )));
        }

        let path = path.as_ref();
        let source = locate_vocabulary(path)?;

        let mut inner = if source.extension().is_some_and(|ext| ext == "json") {
            Tokenizer::from_file(&source).map_err(|e| {
                Error::Tokenization(format!(
                    "failed to load tokenizer '{}': {e}",
                    source.display()
                ))
            })?
        } else {
            let lowercase = read_lower_case(source.parent().unwrap_or(path));
            build_wordpiece(&source, lowercase)?
        };

        // padding and truncation are applied here, per call
        inner.with_padding(None);
        inner
            .with_truncation(None)
            .map_err(|e| Error::Tokenization(format!("failed to disable truncation: {e}")))?;

        let pad_id = find_token(&inner, PAD_TOKENS).map_or(0, i64::from);
        let end_id = find_token(&inner, END_TOKENS);

        tracing::debug!(
            path = %source.display(),
            max_length,
            vocab_size = inner.get_vocab_size(true),
            "Tokenizer loaded"
        );

        Ok(Self {
            inner,
            max_length,
            pad_id,
            end_id,
            source,
        })
    }

    /// Configured maximum sequence length.
    #[must_use]
    pub const fn max_length(&self) -> usize {
        self.max_length
    }

    /// Id used for padding positions.
    #[must_use]
    pub const fn pad_id(&self) -> i64 {
        self.pad_id
    }

    /// File the vocabulary was loaded from.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Encode one text to exactly `max_length` positions.
    ///
    /// # Errors
    ///
    /// Returns a tokenization error if the underlying tokenizer fails.
    pub fn encode(&self, text: &str) -> Result<Encoded> {
        self.encode_with_limit(text, None)
    }

    /// Encode one text, optionally to a shorter length than configured.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `limit` exceeds the configured
    /// maximum or is below 2, or a tokenization error if encoding fails.
    pub fn encode_with_limit(&self, text: &str, limit: Option<usize>) -> Result<Encoded> {
        let limit = self.effective_limit(limit)?;
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| Error::Tokenization(format!("failed to encode text: {e}")))?;
        Ok(self.fit(encoding.get_ids(), limit))
    }

    /// Encode a batch of texts, every row padded/truncated to `max_length`.
    ///
    /// An empty input yields an empty batch.
    ///
    /// # Errors
    ///
    /// Returns a tokenization error if the underlying tokenizer fails.
    pub fn encode_batch<S: AsRef<str>>(&self, texts: &[S]) -> Result<TokenizedBatch> {
        if texts.is_empty() {
            return Ok(TokenizedBatch::default());
        }

        let inputs: Vec<&str> = texts.iter().map(AsRef::as_ref).collect();
        let encodings = self
            .inner
            .encode_batch(inputs, true)
            .map_err(|e| Error::Tokenization(format!("failed to encode batch: {e}")))?;

        Ok(TokenizedBatch::from_encoded(
            encodings
                .iter()
                .map(|encoding| self.fit(encoding.get_ids(), self.max_length))
                .collect(),
        ))
    }

    /// Encode a batch, checking `cancel` before and after encoding.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if the token fired, otherwise as
    /// [`TextTokenizer::encode_batch`].
    pub fn encode_batch_with_cancel<S: AsRef<str>>(
        &self,
        texts: &[S],
        cancel: &CancellationToken,
    ) -> Result<TokenizedBatch> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let batch = self.encode_batch(texts)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(batch)
    }

    /// Number of tokens the text produces, markers included, before any
    /// padding or truncation.
    ///
    /// # Errors
    ///
    /// Returns a tokenization error if the underlying tokenizer fails.
    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        self.inner
            .encode(text, true)
            .map(|encoding| encoding.len())
            .map_err(|e| Error::Tokenization(format!("failed to encode text: {e}")))
    }

    fn effective_limit(&self, limit: Option<usize>) -> Result<usize> {
        match limit {
            None => Ok(self.max_length),
            Some(n) if n > self.max_length => Err(Error::config(format!(
                "length limit {n} exceeds configured max_length {}",
                self.max_length
            ))),
            Some(n) if n < 2 => Err(Error::config(format!(
                "length limit must be at least 2, got {n}"
            ))),
            Some(n) => Ok(n),
        }
    }

    /// Truncate (keeping the end marker) or pad `ids` to `limit`.
    fn fit(&self, ids: &[u32], limit: usize) -> Encoded {
        let mut input_ids: Vec<i64> = Vec::with_capacity(limit);

        if ids.len() > limit {
            let keeps_end = self.end_id.is_some() && ids.last().copied() == self.end_id;
            if keeps_end {
                input_ids.extend(ids[..limit - 1].iter().map(|&id| i64::from(id)));
                input_ids.push(i64::from(ids[ids.len() - 1]));
            } else {
                input_ids.extend(ids[..limit].iter().map(|&id| i64::from(id)));
            }
        } else {
            input_ids.extend(ids.iter().map(|&id| i64::from(id)));
        }

        let real = input_ids.len();
        input_ids.resize(limit, self.pad_id);

        let mut attention_mask = vec![1i64; real];
        attention_mask.resize(limit, 0);

        Encoded {
            input_ids,
            attention_mask,
        }
    }
}

impl std::fmt::Debug for TextTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextTokenizer")
            .field("source", &self.source)
            .field("max_length", &self.max_length)
            .field("pad_id", &self.pad_id)
            .finish_non_exhaustive()
    }
}

fn locate_vocabulary(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    if path.is_dir() {
        for name in [VOCAB_FILE, TOKENIZER_JSON_FILE] {
            let candidate = path.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        return Err(Error::not_found("vocabulary file", path.join(VOCAB_FILE)));
    }

    Err(Error::not_found("vocabulary file", path))
}

fn read_lower_case(dir: &Path) -> bool {
    let config_path = dir.join(TOKENIZER_CONFIG_FILE);
    let Ok(raw) = std::fs::read_to_string(&config_path) else {
        return default_lower_case();
    };

    match serde_json::from_str::<TokenizerConfigFile>(&raw) {
        Ok(config) => config.do_lower_case,
        Err(e) => {
            tracing::warn!(path = %config_path.display(), error = %e, "Ignoring unreadable tokenizer config");
            default_lower_case()
        }
    }
}

fn build_wordpiece(vocab_path: &Path, lowercase: bool) -> Result<Tokenizer> {
    let vocab_str = vocab_path.to_string_lossy();
    let model = WordPiece::from_file(&vocab_str)
        .unk_token(UNK_TOKEN.to_string())
        .build()
        .map_err(|e| {
            Error::Tokenization(format!(
                "failed to read vocabulary '{}': {e}",
                vocab_path.display()
            ))
        })?;

    let vocab = model.get_vocab();
    let lookup = |candidates: &[&str]| {
        candidates
            .iter()
            .find_map(|t| vocab.get(*t).map(|&id| ((*t).to_string(), id)))
    };
    let cls = lookup(START_TOKENS).ok_or_else(|| {
        Error::Tokenization(format!("vocabulary '{}' has no [CLS] token", vocab_path.display()))
    })?;
    let sep = lookup(END_TOKENS).ok_or_else(|| {
        Error::Tokenization(format!("vocabulary '{}' has no [SEP] token", vocab_path.display()))
    })?;

    let built: BertTokenizer = TokenizerBuilder::new()
        .with_model(model)
        .with_normalizer(Some(BertNormalizer::new(true, true, None, lowercase)))
        .with_pre_tokenizer(Some(BertPreTokenizer))
        .with_post_processor(Some(BertProcessing::new(sep, cls)))
        .with_decoder(Some(WordPieceDecoder::default()))
        .build()
        .map_err(|e| Error::Tokenization(format!("failed to build tokenizer: {e}")))?;

    Ok(Tokenizer::from(built))
}

fn find_token(tokenizer: &Tokenizer, candidates: &[&str]) -> Option<u32> {
    candidates.iter().find_map(|t| tokenizer.token_to_id(t))
}
