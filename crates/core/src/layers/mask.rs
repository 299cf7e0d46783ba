use candle_core::{DType, Device, Result, Tensor};

/// Generate a causal attention mask for the decoder's self-attention.
/// Returns shape [1, 1, seq_len, seq_len]: 0.0 where query i may attend
/// to key j (j <= i), -inf elsewhere.
pub fn causal_mask(seq_len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j > i { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    let mask = Tensor::from_vec(mask, (1, 1, seq_len, seq_len), device)?;
    mask.to_dtype(dtype)
}
