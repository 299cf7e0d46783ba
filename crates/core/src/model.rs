//! The captioner: decoder stack plus the generation entrypoint.

use candle_core::{Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::config::CaptionerConfig;
use crate::error::{CaptionError, Result};
use crate::generation::{self, DecoderForward, FinishReason, MAX_STEPS};
use crate::layers::{DecoderLayer, SeqEmbedding};
use crate::multimodal::{flatten_features, FeatureExtractor, ImageInput, TextInput, IMAGE_SIZE};
use crate::tokenizer::CaptionTokenizer;

/// A finished generation run.
#[derive(Debug, Clone)]
pub struct Caption {
    /// Space-joined words, START/END markers stripped.
    pub text: String,
    /// The raw index sequence including the start token and, when one was
    /// produced, the end token.
    pub token_ids: Vec<u32>,
    /// `MaxSteps` marks the known silent-truncation edge case: the step
    /// limit ran out before an end token appeared.
    pub finish_reason: FinishReason,
}

/// Transformer decoder over image features.
///
/// Owns all model parameters; they are immutable during generation.
/// Concurrent generation calls against one instance are safe because no
/// forward state is stored on the model: diagnostics are returned, never
/// written to fields.
pub struct Captioner {
    config: CaptionerConfig,
    tokenizer: CaptionTokenizer,
    feature_extractor: Box<dyn FeatureExtractor>,
    seq_embedding: SeqEmbedding,
    layers: Vec<DecoderLayer>,
    output_layer: Linear,
    device: Device,
}

impl Captioner {
    /// Assemble the decoder stack. The output projection (depth-D hidden
    /// vectors to vocabulary logits) is supplied by the caller; its shape
    /// is checked here along with the rest of the configuration, so a
    /// misconfigured model fails at construction, not mid-generation.
    pub fn new(
        config: CaptionerConfig,
        tokenizer: CaptionTokenizer,
        feature_extractor: Box<dyn FeatureExtractor>,
        output_layer: Linear,
        vb: VarBuilder,
    ) -> Result<Self> {
        if config.hidden_size % config.num_heads != 0 {
            return Err(CaptionError::ShapeMismatch {
                context: "hidden_size % num_heads",
                expected: 0,
                got: config.hidden_size % config.num_heads,
            });
        }
        if tokenizer.vocab_size() != config.vocab_size {
            return Err(CaptionError::ShapeMismatch {
                context: "tokenizer vocabulary size",
                expected: config.vocab_size,
                got: tokenizer.vocab_size(),
            });
        }
        if feature_extractor.feature_depth() != config.feature_depth {
            return Err(CaptionError::ShapeMismatch {
                context: "feature extractor depth",
                expected: config.feature_depth,
                got: feature_extractor.feature_depth(),
            });
        }
        let (out_rows, out_cols) = output_layer.weight().dims2()?;
        if out_rows != config.vocab_size {
            return Err(CaptionError::ShapeMismatch {
                context: "output layer vocabulary width",
                expected: config.vocab_size,
                got: out_rows,
            });
        }
        if out_cols != config.hidden_size {
            return Err(CaptionError::ShapeMismatch {
                context: "output layer input depth",
                expected: config.hidden_size,
                got: out_cols,
            });
        }

        let seq_embedding = SeqEmbedding::new(
            config.vocab_size,
            config.max_length,
            config.hidden_size,
            vb.pp("seq_embedding"),
        )?;
        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            layers.push(DecoderLayer::new(
                config.hidden_size,
                config.feature_depth,
                config.num_heads,
                config.dropout_rate,
                vb.pp(format!("layers.{i}")),
            )?);
        }

        let device = vb.device().clone();
        Ok(Self {
            config,
            tokenizer,
            feature_extractor,
            seq_embedding,
            layers,
            output_layer,
            device,
        })
    }

    pub fn config(&self) -> &CaptionerConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &CaptionTokenizer {
        &self.tokenizer
    }

    /// Resolve the image input to the flattened feature sequence
    /// `[1, m, feature_depth]`, running the backbone when given raw
    /// pixels. The depth check makes a mismatched backbone fail on the
    /// first forward pass.
    fn resolve_features(&self, image: &ImageInput) -> Result<Tensor> {
        let grid = match image {
            ImageInput::Raw(pixels) => {
                let (_batch, height, width, channels) = pixels.dims4()?;
                if height != IMAGE_SIZE || width != IMAGE_SIZE {
                    return Err(CaptionError::ShapeMismatch {
                        context: "raw image size",
                        expected: IMAGE_SIZE,
                        got: if height != IMAGE_SIZE { height } else { width },
                    });
                }
                if channels != 3 {
                    return Err(CaptionError::ShapeMismatch {
                        context: "raw image channels",
                        expected: 3,
                        got: channels,
                    });
                }
                self.feature_extractor.extract(pixels)?
            }
            ImageInput::Features(features) => features.clone(),
        };
        let features = flatten_features(&grid)?;
        let depth = features.dim(2)?;
        if depth != self.config.feature_depth {
            return Err(CaptionError::ShapeMismatch {
                context: "image feature depth",
                expected: self.config.feature_depth,
                got: depth,
            });
        }
        Ok(features)
    }

    fn resolve_tokens(&self, text: &TextInput) -> Result<Vec<u32>> {
        match text {
            TextInput::Raw(text) => self.tokenizer.encode(text),
            TextInput::Tokens(ids) => Ok(ids.clone()),
        }
    }

    /// Run the decoder stack over a resolved (features, tokens) pair.
    /// The same flattened image context is fed to every layer unmutated.
    fn decode_pass(&self, features: &Tensor, token_ids: &[u32]) -> Result<(Tensor, Vec<Tensor>)> {
        if token_ids.len() > self.config.max_length {
            return Err(CaptionError::SequenceLengthExceeded {
                len: token_ids.len(),
                max: self.config.max_length,
            });
        }
        let ids = Tensor::new(token_ids, &self.device)?.unsqueeze(0)?;
        let mut xs = self.seq_embedding.forward(&ids)?;

        let mut cross_attention = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (next, weights) = layer.forward(features, &xs, false)?;
            xs = next;
            cross_attention.push(weights);
        }

        let logits = self.output_layer.forward(&xs)?;
        Ok((logits, cross_attention))
    }

    /// Forward pass: per-position vocabulary logits of shape
    /// `[1, seq_len, vocab_size]`.
    pub fn forward(&self, image: &ImageInput, text: &TextInput) -> Result<Tensor> {
        let (logits, _) = self.forward_with_attention(image, text)?;
        Ok(logits)
    }

    /// Forward pass that also returns each layer's cross-attention
    /// weights (`[1, num_heads, seq_len, m]` per layer), for
    /// visualization.
    pub fn forward_with_attention(
        &self,
        image: &ImageInput,
        text: &TextInput,
    ) -> Result<(Tensor, Vec<Tensor>)> {
        let features = self.resolve_features(image)?;
        let token_ids = self.resolve_tokens(text)?;
        self.decode_pass(&features, &token_ids)
    }

    /// Generation entrypoint: one raw image tensor in, one caption out.
    /// Features are extracted once and stay constant for the whole
    /// greedy decode.
    pub fn caption(&self, image: &Tensor) -> Result<Caption> {
        self.caption_input(&ImageInput::Raw(image.clone()))
    }

    /// As [`caption`](Self::caption), but accepting pre-extracted
    /// features as well.
    pub fn caption_input(&self, image: &ImageInput) -> Result<Caption> {
        let features = self.resolve_features(image)?;
        let output = generation::greedy_decode(
            self,
            &features,
            self.tokenizer.start_id(),
            self.tokenizer.end_id(),
            MAX_STEPS.min(self.config.max_length),
        )?;
        let text = self.tokenizer.decode_caption(&output.token_ids)?;
        tracing::debug!(
            tokens = output.token_ids.len(),
            finished = ?output.finish_reason,
            "caption generated"
        );
        Ok(Caption {
            text,
            token_ids: output.token_ids,
            finish_reason: output.finish_reason,
        })
    }
}

impl DecoderForward for Captioner {
    fn forward_tokens(&self, features: &Tensor, token_ids: &[u32]) -> Result<Tensor> {
        let (logits, _) = self.decode_pass(features, token_ids)?;
        Ok(logits)
    }
}
