//! Parametrized multi-head attention for the caption decoder.
//!
//! One block covers both attention variants the decoder needs:
//!
//! - **Causal self-attention**: K/V come from the input sequence itself and
//!   a causal mask keeps each position from seeing later positions.
//! - **Cross-attention**: K/V come from the image-feature sequence and every
//!   feature position is visible (the whole image is always in view).
//!
//! The block owns the residual add and LayerNorm, and returns the attention
//! weights alongside the output so callers can keep them for visualization.
//! There is no mutable diagnostic state.

use candle_core::{Module, Result, Tensor};
use candle_nn::{layer_norm, linear_no_bias, LayerNorm, Linear, VarBuilder};

use super::mask::causal_mask;

const LAYER_NORM_EPS: f64 = 1e-5;

/// Masking policy applied to the attention scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionPolicy {
    /// Query i attends only to keys j <= i. The mask is derived internally
    /// from the sequence length, never supplied by the caller.
    Causal,
    /// Every query attends over all key positions.
    Unrestricted,
}

/// Multi-head attention with residual connection and post-norm.
///
/// `kv_size` is the width of the key/value source sequence; for
/// self-attention it equals `hidden_size`, for cross-attention it is the
/// image-feature depth.
pub struct MultiHeadAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl MultiHeadAttention {
    pub fn new(
        hidden_size: usize,
        kv_size: usize,
        num_heads: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        if hidden_size % num_heads != 0 {
            return Err(candle_core::Error::Msg(format!(
                "hidden_size ({hidden_size}) must be divisible by num_heads ({num_heads})"
            )));
        }
        let head_dim = hidden_size / num_heads;
        let scale = 1.0 / (head_dim as f64).sqrt();

        let q_proj = linear_no_bias(hidden_size, hidden_size, vb.pp("q_proj"))?;
        let k_proj = linear_no_bias(kv_size, hidden_size, vb.pp("k_proj"))?;
        let v_proj = linear_no_bias(kv_size, hidden_size, vb.pp("v_proj"))?;
        let o_proj = linear_no_bias(hidden_size, hidden_size, vb.pp("o_proj"))?;
        let norm = layer_norm(hidden_size, LAYER_NORM_EPS, vb.pp("norm"))?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            norm,
            num_heads,
            head_dim,
            scale,
        })
    }

    /// Attention forward pass.
    ///
    /// Queries always come from `x`. With `context: None`, K/V also come
    /// from `x` (self-attention); with `Some(y)`, K/V come from `y`
    /// (cross-attention). Returns `(output, attention_weights)` where the
    /// output is `LayerNorm(x + attention)` of shape `[batch, q_len,
    /// hidden_size]` and the weights are the softmax rows of shape
    /// `[batch, num_heads, q_len, kv_len]`.
    pub fn forward(
        &self,
        x: &Tensor,
        context: Option<&Tensor>,
        policy: AttentionPolicy,
    ) -> Result<(Tensor, Tensor)> {
        let (batch_size, q_len, _) = x.dims3()?;

        let q = self.q_proj.forward(x)?;
        let q = self.reshape_for_attention(q, batch_size, q_len)?;

        let kv_source = context.unwrap_or(x);
        let kv_len = kv_source.dim(1)?;
        let k = self.k_proj.forward(kv_source)?;
        let v = self.v_proj.forward(kv_source)?;
        let k = self.reshape_for_attention(k, batch_size, kv_len)?;
        let v = self.reshape_for_attention(v, batch_size, kv_len)?;

        // Scaled dot-product attention: softmax(Q * K^T / sqrt(d)) * V
        let scores = (q.matmul(&k.transpose(2, 3)?)? * self.scale)?;
        let scores = match policy {
            AttentionPolicy::Causal => {
                let mask = causal_mask(q_len, scores.dtype(), scores.device())?;
                scores.broadcast_add(&mask)?
            }
            AttentionPolicy::Unrestricted => scores,
        };

        let attn_weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let attn_output = attn_weights.matmul(&v)?;

        // [batch, heads, q_len, head_dim] -> [batch, q_len, hidden_size]
        let attn_output = attn_output.transpose(1, 2)?.contiguous()?.reshape((
            batch_size,
            q_len,
            self.num_heads * self.head_dim,
        ))?;
        let attn_output = self.o_proj.forward(&attn_output)?;

        let output = self.norm.forward(&(x + attn_output)?)?;
        Ok((output, attn_weights))
    }

    /// `[batch, seq_len, hidden_size]` -> `[batch, num_heads, seq_len, head_dim]`
    fn reshape_for_attention(
        &self,
        tensor: Tensor,
        batch_size: usize,
        seq_len: usize,
    ) -> Result<Tensor> {
        tensor
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}
