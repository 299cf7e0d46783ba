//! Greedy autoregressive caption generation.
//!
//! The loop is strictly sequential: each forward pass must complete before
//! the next token can be chosen, because the chosen token becomes part of
//! the next pass's input. Every step recomputes the full forward pass over
//! the growing sequence rather than caching key/value state; at a step
//! limit of 50 and batch size 1 the O(max_length^2) cost is a deliberate
//! simplicity trade. Any future cache must preserve identical greedy
//! output.

use candle_core::{IndexOp, Tensor};

use crate::error::Result;

/// Fixed upper bound on generated tokens per caption.
pub const MAX_STEPS: usize = 50;

/// The forward-pass seam the generation loop drives. The captioner's
/// decoder stack implements this; tests substitute scripted models.
pub trait DecoderForward {
    /// Per-position vocabulary logits `[1, len(token_ids), vocab_size]`
    /// for the given flattened image features and token prefix.
    fn forward_tokens(&self, features: &Tensor, token_ids: &[u32]) -> Result<Tensor>;
}

/// How a generation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model emitted the end-of-sequence token.
    EndToken,
    /// The step limit was exhausted first. Not an error: the partial
    /// caption is still returned, and the condition is observable here
    /// and in the log.
    MaxSteps,
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Start token, generated tokens, and the end token when one was
    /// produced. At most `1 + max_steps` entries.
    pub token_ids: Vec<u32>,
    pub finish_reason: FinishReason,
}

/// Greedy decode: starting from the start token, repeatedly run the
/// forward pass over the whole current sequence, take the logits at the
/// last position, pick the arg-max token, and append it; stop early on the
/// end token or after `max_steps` appends.
pub fn greedy_decode(
    model: &impl DecoderForward,
    features: &Tensor,
    start_id: u32,
    end_id: u32,
    max_steps: usize,
) -> Result<GenerationOutput> {
    let mut token_ids = vec![start_id];
    let mut finish_reason = FinishReason::MaxSteps;

    for _ in 0..max_steps {
        let logits = model.forward_tokens(features, &token_ids)?;
        let (_, seq_len, _) = logits.dims3()?;
        let last = logits.i((0, seq_len - 1))?.to_vec1::<f32>()?;
        let next = argmax(&last);

        token_ids.push(next);
        if next == end_id {
            finish_reason = FinishReason::EndToken;
            break;
        }
    }

    if finish_reason == FinishReason::MaxSteps {
        tracing::warn!(
            steps = max_steps,
            "generation hit the step limit without an end token"
        );
    }
    Ok(GenerationOutput {
        token_ids,
        finish_reason,
    })
}

/// First maximal logit wins on ties: later equal values never replace
/// the current winner.
fn argmax(values: &[f32]) -> u32 {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    const VOCAB: usize = 8;
    const END: u32 = 2;

    /// Emits a fixed token sequence, then pad (0) forever.
    struct ScriptedDecoder {
        script: Vec<u32>,
        device: Device,
    }

    impl ScriptedDecoder {
        fn new(script: Vec<u32>) -> Self {
            Self {
                script,
                device: Device::Cpu,
            }
        }
    }

    impl DecoderForward for ScriptedDecoder {
        fn forward_tokens(&self, _features: &Tensor, token_ids: &[u32]) -> Result<Tensor> {
            let step = token_ids.len() - 1;
            let next = self.script.get(step).copied().unwrap_or(0);
            let seq_len = token_ids.len();
            let mut logits = vec![-100.0f32; seq_len * VOCAB];
            logits[(seq_len - 1) * VOCAB + next as usize] = 100.0;
            Ok(Tensor::from_vec(logits, (1, seq_len, VOCAB), &self.device)?)
        }
    }

    fn dummy_features() -> Tensor {
        Tensor::zeros((1, 4, 8), DType::F32, &Device::Cpu).expect("features creation")
    }

    #[test]
    fn stops_on_end_token() {
        let model = ScriptedDecoder::new(vec![3, 4, 5, END]);
        let out = greedy_decode(&model, &dummy_features(), 1, END, MAX_STEPS)
            .expect("decode should succeed");
        assert_eq!(out.token_ids, vec![1, 3, 4, 5, END]);
        assert_eq!(out.finish_reason, FinishReason::EndToken);
    }

    #[test]
    fn exhausts_step_limit_without_end_token() {
        let model = ScriptedDecoder::new(vec![3; 100]);
        let out = greedy_decode(&model, &dummy_features(), 1, END, MAX_STEPS)
            .expect("decode should succeed");
        assert_eq!(out.token_ids.len(), 1 + MAX_STEPS);
        assert_eq!(out.finish_reason, FinishReason::MaxSteps);
        assert!(out.token_ids[1..].iter().all(|&t| t == 3));
    }

    #[test]
    fn end_token_on_first_step() {
        let model = ScriptedDecoder::new(vec![END]);
        let out = greedy_decode(&model, &dummy_features(), 1, END, MAX_STEPS)
            .expect("decode should succeed");
        assert_eq!(out.token_ids, vec![1, END]);
        assert_eq!(out.finish_reason, FinishReason::EndToken);
    }

    #[test]
    fn zero_steps_returns_start_only() {
        let model = ScriptedDecoder::new(vec![3]);
        let out =
            greedy_decode(&model, &dummy_features(), 1, END, 0).expect("decode should succeed");
        assert_eq!(out.token_ids, vec![1]);
        assert_eq!(out.finish_reason, FinishReason::MaxSteps);
    }

    // ─── argmax ──────────────────────────────────────────────────────────

    #[test]
    fn argmax_picks_highest() {
        assert_eq!(argmax(&[1.0, 5.0, 3.0, 2.0]), 1);
    }

    #[test]
    fn argmax_first_wins_on_tie() {
        assert_eq!(argmax(&[0.0, 7.0, 7.0]), 1);
    }

    /// Returns the same tied maximal logit at two vocabulary indices.
    struct TiedDecoder {
        device: Device,
    }

    impl DecoderForward for TiedDecoder {
        fn forward_tokens(&self, _features: &Tensor, token_ids: &[u32]) -> Result<Tensor> {
            let seq_len = token_ids.len();
            let mut logits = vec![-100.0f32; seq_len * VOCAB];
            logits[(seq_len - 1) * VOCAB + 3] = 100.0;
            logits[(seq_len - 1) * VOCAB + 5] = 100.0;
            Ok(Tensor::from_vec(logits, (1, seq_len, VOCAB), &self.device)?)
        }
    }

    #[test]
    fn tied_logits_select_lowest_index() {
        let model = TiedDecoder { device: Device::Cpu };
        let out = greedy_decode(&model, &dummy_features(), 1, END, 3)
            .expect("decode should succeed");
        assert_eq!(out.token_ids[1..], [3, 3, 3]);
    }
}
