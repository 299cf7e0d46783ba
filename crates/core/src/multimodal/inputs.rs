//! Tagged input variants for the captioner boundary.
//!
//! Rather than dispatching on tensor shape or dtype ("3 channels means a
//! raw image", "string means untokenized text"), the caller states what it
//! is handing over, and the variants are resolved exactly once before the
//! forward pass sees normalized tensors.

use candle_core::Tensor;

/// Image-side input to the captioner.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Raw preprocessed image tensor `[1, 224, 224, 3]`; routed through
    /// the feature extractor.
    Raw(Tensor),
    /// Already-extracted backbone features: either the spatial grid
    /// `[1, h, w, depth]` or the flattened `[1, h*w, depth]` sequence.
    Features(Tensor),
}

/// Text-side input to the captioner forward pass.
#[derive(Debug, Clone)]
pub enum TextInput {
    /// Raw caption text; routed through the tokenizer (START/END markers
    /// added).
    Raw(String),
    /// Already-tokenized indices, markers included.
    Tokens(Vec<u32>),
}

impl TextInput {
    pub fn raw(s: impl Into<String>) -> Self {
        Self::Raw(s.into())
    }
}
