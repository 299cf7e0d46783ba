//! Image-feature handling: the backbone seam and grid flattening.

use candle_core::{Result, Tensor};

/// Input images are preprocessed to this square size before extraction.
pub const IMAGE_SIZE: usize = 224;

/// The convolutional backbone, seen by the captioner as a pure function
/// from a raw image tensor `[1, 224, 224, 3]` to a spatial feature grid
/// `[1, h, w, depth]`. Called at most once per generation; the resulting
/// features are constant for the whole decode.
pub trait FeatureExtractor: Send {
    fn extract(&self, image: &Tensor) -> Result<Tensor>;

    /// Channel depth of the produced grid; checked against the model
    /// config at construction.
    fn feature_depth(&self) -> usize;
}

/// Flatten a spatial feature grid `[batch, h, w, depth]` into the
/// `[batch, h*w, depth]` sequence cross-attention consumes. A 3D tensor
/// is taken to be already flattened and passed through.
pub fn flatten_features(features: &Tensor) -> Result<Tensor> {
    match features.dims() {
        [b, h, w, depth] => features.reshape((*b, h * w, *depth)),
        [_, _, _] => Ok(features.clone()),
        dims => Err(candle_core::Error::Msg(format!(
            "expected feature grid [b, h, w, depth] or sequence [b, m, depth], got {dims:?}"
        ))),
    }
}
