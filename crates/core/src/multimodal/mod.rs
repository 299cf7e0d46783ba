//! Multimodal boundary: how images and text enter the captioner.
//!
//! The captioner core only ever sees normalized tensors; these types
//! resolve raw-vs-preprocessed inputs once at the edge and define the
//! backbone seam.

mod features;
mod inputs;

pub use features::{flatten_features, FeatureExtractor, IMAGE_SIZE};
pub use inputs::{ImageInput, TextInput};
