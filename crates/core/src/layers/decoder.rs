use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::attention::{AttentionPolicy, MultiHeadAttention};
use super::feed_forward::FeedForward;

/// One transformer decoder block: causal self-attention over the token
/// sequence, cross-attention over the image-feature sequence, then the
/// feed-forward transform. Each sub-block carries its own residual and
/// normalization.
pub struct DecoderLayer {
    self_attention: MultiHeadAttention,
    cross_attention: MultiHeadAttention,
    feed_forward: FeedForward,
}

impl DecoderLayer {
    pub fn new(
        hidden_size: usize,
        feature_depth: usize,
        num_heads: usize,
        dropout_rate: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let self_attention =
            MultiHeadAttention::new(hidden_size, hidden_size, num_heads, vb.pp("self_attn"))?;
        let cross_attention =
            MultiHeadAttention::new(hidden_size, feature_depth, num_heads, vb.pp("cross_attn"))?;
        let feed_forward = FeedForward::new(hidden_size, dropout_rate, vb.pp("ff"))?;
        Ok(Self {
            self_attention,
            cross_attention,
            feed_forward,
        })
    }

    /// Transform the decoder sequence `xs` against the (flattened) image
    /// features. Returns the transformed sequence together with the
    /// cross-attention weights of this call, for diagnostics.
    pub fn forward(&self, features: &Tensor, xs: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let (xs, _) = self.self_attention.forward(xs, None, AttentionPolicy::Causal)?;
        let (xs, cross_weights) =
            self.cross_attention
                .forward(&xs, Some(features), AttentionPolicy::Unrestricted)?;
        let xs = self.feed_forward.forward(&xs, train)?;
        Ok((xs, cross_weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn random_layer(hidden: usize, feature_depth: usize, heads: usize) -> DecoderLayer {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        DecoderLayer::new(hidden, feature_depth, heads, 0.1, vb)
            .expect("decoder layer creation should work")
    }

    #[test]
    fn preserves_sequence_shape() {
        let device = Device::Cpu;
        let layer = random_layer(32, 24, 2);
        let features = Tensor::randn(0.0f32, 1.0, (1, 9, 24), &device).expect("features");
        let xs = Tensor::randn(0.0f32, 1.0, (1, 5, 32), &device).expect("sequence");

        let (out, weights) = layer
            .forward(&features, &xs, false)
            .expect("forward should succeed");
        assert_eq!(out.dims(), &[1, 5, 32]);
        // Cross-attention weights span all feature positions.
        assert_eq!(weights.dims(), &[1, 2, 5, 9]);
    }

    #[test]
    fn cross_weights_are_probability_rows() {
        let device = Device::Cpu;
        let layer = random_layer(32, 24, 2);
        let features = Tensor::randn(0.0f32, 1.0, (1, 4, 24), &device).expect("features");
        let xs = Tensor::randn(0.0f32, 1.0, (1, 3, 32), &device).expect("sequence");

        let (_, weights) = layer
            .forward(&features, &xs, false)
            .expect("forward should succeed");
        let sums: Vec<f32> = weights
            .sum(3)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1())
            .expect("row sums");
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn same_image_context_is_reusable() {
        // The layer must not mutate the feature tensor; running twice with
        // the same features gives identical output.
        let device = Device::Cpu;
        let layer = random_layer(16, 16, 2);
        let features = Tensor::randn(0.0f32, 1.0, (1, 6, 16), &device).expect("features");
        let xs = Tensor::randn(0.0f32, 1.0, (1, 2, 16), &device).expect("sequence");

        let (out_a, _) = layer.forward(&features, &xs, false).expect("first forward");
        let (out_b, _) = layer.forward(&features, &xs, false).expect("second forward");

        let a: Vec<f32> = out_a
            .flatten_all()
            .and_then(|t| t.to_vec1())
            .expect("first output");
        let b: Vec<f32> = out_b
            .flatten_all()
            .and_then(|t| t.to_vec1())
            .expect("second output");
        assert_eq!(a, b);
    }
}
