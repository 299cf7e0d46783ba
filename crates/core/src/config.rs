use serde::Deserialize;

/// Hyperparameters for the captioning decoder stack.
///
/// `hidden_size` is the shared depth D: token embeddings, position
/// embeddings, and every attention/feed-forward block operate at this
/// width. `feature_depth` is the channel depth of the image-feature grid
/// produced by the backbone and may differ from D; cross-attention
/// projects it down.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptionerConfig {
    pub hidden_size: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub feature_depth: usize,
    pub vocab_size: usize,
    /// Capacity of the position-embedding table and the generation step
    /// limit. Sequences longer than this are rejected, never wrapped.
    pub max_length: usize,
    /// Applied in the feed-forward blocks during training only.
    pub dropout_rate: f32,
}

impl Default for CaptionerConfig {
    fn default() -> Self {
        Self {
            hidden_size: 256,
            num_layers: 2,
            num_heads: 2,
            feature_depth: 960,
            vocab_size: 5000,
            max_length: 50,
            dropout_rate: 0.5,
        }
    }
}
