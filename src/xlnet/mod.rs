//! # XLNet (Yang et al.)
//!
//! Implementation of the XLNet encoder ([XLNet: Generalized Autoregressive Pretraining for Language Understanding](https://arxiv.org/abs/1906.08237)):
//! two-stream relative attention with segment-aware scores and a recurrent memory.
//! The base model is implemented in the `XLNetModel` struct. Task-specific heads
//! consume its final hidden state.
//!
//! Memories are explicit values: pass the `next_cache` returned by a forward pass to the next one
//! as `old_layer_states`.

mod attention;
mod config;
mod encoder;
mod masks;
mod memory;
mod positional;
mod xlnet_model;

pub use attention::{rel_shift_bnij, RelativeAttentionOutput, XLNetRelativeAttention};
pub use config::{AttentionType, XLNetConfig, XLNetPreset};
pub use encoder::{XLNetFeedForward, XLNetLayer};
pub use masks::{attention_masks, causal_mask, expand_head_mask, segment_matrix, AttentionMasks};
pub use memory::{LayerState, MemoryCache};
pub use positional::RelativePositionalEncoding;
pub use xlnet_model::{XLNetForwardOptions, XLNetModel, XLNetModelOutput};
