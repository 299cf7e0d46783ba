use thiserror::Error;

/// Errors surfaced by the captioning model.
///
/// Shape and configuration mismatches are programming errors: they are
/// raised at construction or on the first forward pass and are not
/// recoverable. Step-limit exhaustion during generation is deliberately
/// absent here; it is a defined terminal state, not a failure.
#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("shape mismatch ({context}): expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("sequence length {len} exceeds position embedding capacity {max}")]
    SequenceLengthExceeded { len: usize, max: usize },

    #[error("token id {id} outside vocabulary range")]
    UnknownToken { id: u32 },

    #[error("tokenizer: {0}")]
    Tokenizer(String),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, CaptionError>;
