use candle_core::{Module, Result, Tensor};
use candle_nn::{layer_norm, linear, Dropout, LayerNorm, Linear, VarBuilder};

const LAYER_NORM_EPS: f64 = 1e-5;

/// Position-wise feed-forward block: expand D -> 2D with ReLU, project
/// back to D, dropout (training only), residual add, LayerNorm.
pub struct FeedForward {
    expand: Linear,
    project: Linear,
    dropout: Dropout,
    norm: LayerNorm,
}

impl FeedForward {
    pub fn new(hidden_size: usize, dropout_rate: f32, vb: VarBuilder) -> Result<Self> {
        let expand = linear(hidden_size, 2 * hidden_size, vb.pp("expand"))?;
        let project = linear(2 * hidden_size, hidden_size, vb.pp("project"))?;
        let dropout = Dropout::new(dropout_rate);
        let norm = layer_norm(hidden_size, LAYER_NORM_EPS, vb.pp("norm"))?;
        Ok(Self {
            expand,
            project,
            dropout,
            norm,
        })
    }

    /// Deterministic when `train` is false: dropout is disabled at
    /// inference.
    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = self.expand.forward(xs)?.relu()?;
        let hidden = self.project.forward(&hidden)?;
        let hidden = self.dropout.forward(&hidden, train)?;
        self.norm.forward(&(xs + hidden)?)
    }
}
