//! Word-level caption tokenizer.
//!
//! Wraps a `tokenizers` WordLevel model with the captioning vocabulary
//! conventions: index 0 is the padding/mask sentinel `""` (never a real
//! word), `[START]` and `[END]` delimit every encoded caption, and text is
//! lowercased and stripped of punctuation before lookup. The inverse
//! lookup is a hard error for out-of-range ids so a bad index can never
//! silently corrupt a caption.

use std::path::Path;

use tokenizers::models::wordlevel::WordLevel;
use tokenizers::normalizers::replace::{Replace, ReplacePattern};
use tokenizers::normalizers::{Lowercase, Sequence as NormalizerSequence};
use tokenizers::pre_tokenizers::whitespace::Whitespace;
use tokenizers::Tokenizer;

use crate::error::{CaptionError, Result};

pub const PAD_TOKEN: &str = "";
pub const START_TOKEN: &str = "[START]";
pub const END_TOKEN: &str = "[END]";

pub struct CaptionTokenizer {
    inner: Tokenizer,
    start_id: u32,
    end_id: u32,
}

impl CaptionTokenizer {
    /// Load a previously serialized tokenizer (tokenizer.json format).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let inner =
            Tokenizer::from_file(path).map_err(|e| anyhow::anyhow!("tokenizer load: {e}"))?;
        Ok(Self::wrap(inner)?)
    }

    /// Build a tokenizer from a word list. Reserved entries are assigned
    /// first: `""` = 0, `[START]` = 1, `[END]` = 2; the given words follow
    /// in iteration order.
    pub fn from_vocab<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = ahash::AHashMap::new();
        vocab.insert(PAD_TOKEN.to_string(), 0u32);
        vocab.insert(START_TOKEN.to_string(), 1);
        vocab.insert(END_TOKEN.to_string(), 2);
        for word in words {
            let next = vocab.len() as u32;
            vocab.entry(word.as_ref().to_string()).or_insert(next);
        }

        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token(PAD_TOKEN.into())
            .build()
            .map_err(|e| CaptionError::Tokenizer(format!("vocab build: {e}")))?;

        let strip_punctuation = Replace::new(ReplacePattern::Regex(r"[^\w\s]".into()), "")
            .map_err(|e| CaptionError::Tokenizer(format!("normalizer build: {e}")))?;
        let normalizer =
            NormalizerSequence::new(vec![Lowercase.into(), strip_punctuation.into()]);

        let mut inner = Tokenizer::new(model);
        inner.with_normalizer(Some(normalizer));
        inner.with_pre_tokenizer(Some(Whitespace {}));
        Self::wrap(inner)
    }

    fn wrap(inner: Tokenizer) -> Result<Self> {
        if inner.token_to_id(PAD_TOKEN) != Some(0) {
            return Err(CaptionError::Tokenizer(
                "padding token must map to index 0".into(),
            ));
        }
        let start_id = inner
            .token_to_id(START_TOKEN)
            .ok_or_else(|| CaptionError::Tokenizer(format!("vocabulary lacks {START_TOKEN}")))?;
        let end_id = inner
            .token_to_id(END_TOKEN)
            .ok_or_else(|| CaptionError::Tokenizer(format!("vocabulary lacks {END_TOKEN}")))?;
        Ok(Self {
            inner,
            start_id,
            end_id,
        })
    }

    pub fn start_id(&self) -> u32 {
        self.start_id
    }

    pub fn end_id(&self) -> u32 {
        self.end_id
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Normalize and tokenize caption text, wrapped in START/END markers.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| CaptionError::Tokenizer(format!("encode: {e}")))?;
        let mut ids = Vec::with_capacity(encoding.get_ids().len() + 2);
        ids.push(self.start_id);
        ids.extend_from_slice(encoding.get_ids());
        ids.push(self.end_id);
        Ok(ids)
    }

    /// Inverse vocabulary lookup for a single token id.
    pub fn word(&self, id: u32) -> Result<String> {
        self.inner
            .id_to_token(id)
            .ok_or(CaptionError::UnknownToken { id })
    }

    /// Assemble a generated index sequence into the final caption string:
    /// the leading START and a trailing END (when one was produced) are
    /// stripped, everything else is looked up and space-joined. A token
    /// that was genuinely generated stays in the caption even when the
    /// step limit cut generation short.
    pub fn decode_caption(&self, token_ids: &[u32]) -> Result<String> {
        let mut ids = token_ids;
        if ids.first() == Some(&self.start_id) {
            ids = &ids[1..];
        }
        if ids.last() == Some(&self.end_id) {
            ids = &ids[..ids.len() - 1];
        }
        let words = ids
            .iter()
            .map(|&id| self.word(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(words.join(" "))
    }
}
