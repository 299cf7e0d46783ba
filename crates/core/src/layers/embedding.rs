//! Token + position embedding for the decoder input sequence.

use candle_core::{Module, Result, Tensor};
use candle_nn::{embedding, Embedding, VarBuilder};

/// Fuses token-identity and position embeddings into one representation.
///
/// Token index 0 is the padding/mask sentinel: its lookup is forced to the
/// zero vector, so only the position embedding survives at padded slots.
/// Position indices are derived from the current sequence length on every
/// call, which is what lets the generation loop regrow the sequence one
/// token at a time.
pub struct SeqEmbedding {
    token_embedding: Embedding,
    pos_embedding: Embedding,
    max_length: usize,
}

impl SeqEmbedding {
    pub fn new(
        vocab_size: usize,
        max_length: usize,
        hidden_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let token_embedding = embedding(vocab_size, hidden_size, vb.pp("token_embedding"))?;
        let pos_embedding = embedding(max_length, hidden_size, vb.pp("pos_embedding"))?;
        Ok(Self {
            token_embedding,
            pos_embedding,
            max_length,
        })
    }

    /// Embed a `[batch, seq_len]` u32 token tensor as `[batch, seq_len,
    /// hidden_size]`. Fails when `seq_len` exceeds the position table.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (_batch_size, seq_len) = token_ids.dims2()?;
        if seq_len > self.max_length {
            return Err(candle_core::Error::Msg(format!(
                "sequence length {seq_len} exceeds position embedding capacity {}",
                self.max_length
            )));
        }

        let tokens = self.token_embedding.forward(token_ids)?;
        // Zero out the sentinel id 0 (mask_zero convention).
        let mask = token_ids.ne(0u32)?.to_dtype(tokens.dtype())?.unsqueeze(2)?;
        let tokens = tokens.broadcast_mul(&mask)?;

        let positions = Tensor::arange(0u32, seq_len as u32, token_ids.device())?.unsqueeze(0)?;
        let positions = self.pos_embedding.forward(&positions)?;

        tokens.broadcast_add(&positions)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, IndexOp};
    use candle_nn::VarMap;

    fn random_embedding(vocab: usize, max_len: usize, hidden: usize) -> SeqEmbedding {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        SeqEmbedding::new(vocab, max_len, hidden, vb).expect("embedding creation should work")
    }

    fn ids(values: &[u32]) -> Tensor {
        Tensor::new(values, &Device::Cpu)
            .and_then(|t| t.unsqueeze(0))
            .expect("id tensor creation should work")
    }

    #[test]
    fn output_shape() {
        let emb = random_embedding(10, 8, 16);
        let out = emb.forward(&ids(&[1, 3, 4])).expect("forward should succeed");
        assert_eq!(out.dims(), &[1, 3, 16]);
    }

    #[test]
    fn pad_token_contributes_nothing() {
        // Sequences differing only at a padded slot produce identical
        // output there: the token lookup is masked to zero, leaving only
        // the (shared) position embedding.
        let emb = random_embedding(10, 8, 16);
        let out_a = emb.forward(&ids(&[3, 0])).expect("forward a");
        let out_b = emb.forward(&ids(&[7, 0])).expect("forward b");

        let row_a: Vec<f32> = out_a.i((0, 1)).and_then(|t| t.to_vec1()).expect("row a");
        let row_b: Vec<f32> = out_b.i((0, 1)).and_then(|t| t.to_vec1()).expect("row b");
        assert_eq!(row_a, row_b);
    }

    #[test]
    fn position_embedding_distinguishes_repeated_tokens() {
        let emb = random_embedding(10, 8, 16);
        let out = emb.forward(&ids(&[5, 5])).expect("forward should succeed");

        let row0: Vec<f32> = out.i((0, 0)).and_then(|t| t.to_vec1()).expect("row 0");
        let row1: Vec<f32> = out.i((0, 1)).and_then(|t| t.to_vec1()).expect("row 1");
        assert_ne!(row0, row1, "same token at different positions must differ");
    }

    #[test]
    fn prefix_embedding_stable_as_sequence_grows() {
        // Incremental decoding appends tokens; embeddings of the existing
        // prefix must not move.
        let emb = random_embedding(10, 8, 16);
        let short = emb.forward(&ids(&[1, 3])).expect("short forward");
        let long = emb.forward(&ids(&[1, 3, 4])).expect("long forward");

        for pos in 0..2 {
            let a: Vec<f32> = short.i((0, pos)).and_then(|t| t.to_vec1()).expect("short row");
            let b: Vec<f32> = long.i((0, pos)).and_then(|t| t.to_vec1()).expect("long row");
            assert_eq!(a, b);
        }
    }

    #[test]
    fn rejects_sequence_beyond_capacity() {
        let emb = random_embedding(10, 3, 16);
        let result = emb.forward(&ids(&[1, 2, 3, 4]));
        assert!(result.is_err());
    }
}
