pub mod attention;
pub mod decoder;
pub mod embedding;
pub mod feed_forward;
pub mod mask;

pub use attention::{AttentionPolicy, MultiHeadAttention};
pub use decoder::DecoderLayer;
pub use embedding::SeqEmbedding;
pub use feed_forward::FeedForward;
pub use mask::causal_mask;
