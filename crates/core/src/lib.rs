//! Image-captioning transformer decoder.
//!
//! A stack of decoder layers attends causally over the caption generated
//! so far and cross-attends over image features from a convolutional
//! backbone, producing captions token by token with greedy decoding. The
//! backbone and the persisted vocabulary are external collaborators; the
//! crate consumes a feature tensor and a tokenizer capability and exposes
//! [`model::Captioner::caption`] as the generation entrypoint.

pub mod config;
pub mod error;
pub mod generation;
pub mod layers;
pub mod model;
pub mod multimodal;
pub mod tokenizer;

pub use config::CaptionerConfig;
pub use error::{CaptionError, Result};
pub use generation::{DecoderForward, FinishReason, GenerationOutput, MAX_STEPS};
pub use model::{Caption, Captioner};
pub use multimodal::{FeatureExtractor, ImageInput, TextInput};
pub use tokenizer::CaptionTokenizer;
