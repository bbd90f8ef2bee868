//! Capability surface of the inference backend.
//!
//! The session never touches model weights or tensors directly; it drives
//! a [`Backend`] through these traits. The llama.cpp implementation lives in
//! [`crate::llama`] (feature `llama-cpp`); tests use scripted in-memory
//! backends.

use std::path::Path;
use std::sync::Arc;

use crate::batch::Batch;
use crate::error::Result;

/// Vocabulary token id.
pub type Token = i32;

/// Process-level runtime plus model/context factory.
///
/// `init` and `shutdown` are paired 1:1 around each load/unload cycle.
pub trait Backend: Send + Sync {
    type Model: Vocab + Send + Sync;
    type Context: Context + Send;

    fn init(&self) -> Result<()>;

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model>;

    /// The context keeps `model` alive; it must be dropped before the model.
    fn new_context(&self, model: Arc<Self::Model>, params: &ContextParams)
    -> Result<Self::Context>;

    fn shutdown(&self);
}

/// Tokenizer side of a loaded model.
pub trait Vocab {
    /// Tokenize `text` into `out`.
    ///
    /// Returns the number of tokens written, or the negated required
    /// capacity when `out` is too small.
    fn tokenize_into(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
        out: &mut [Token],
    ) -> i32;

    /// Write the bytes of `token` into `out`.
    ///
    /// Same sizing convention as [`Vocab::tokenize_into`]. Zero is a valid
    /// (empty) piece.
    fn token_to_piece_into(&self, token: Token, out: &mut [u8]) -> i32;

    /// End-of-sequence / end-of-turn test.
    fn is_end_of_generation(&self, token: Token) -> bool;

    fn n_vocab(&self) -> usize;
}

/// Inference context holding the sequence cache.
pub trait Context {
    /// Maximum number of positions in the sequence cache.
    fn n_ctx(&self) -> u32;

    /// Maximum number of slots per decode call.
    fn n_batch(&self) -> u32;

    /// Advance the sequence cache by the slots in `batch`.
    fn decode(&mut self, batch: &Batch) -> Result<()>;

    /// Next-token logits of the newest output slot of the last decode.
    fn logits(&self) -> Option<&[f32]>;

    /// Drop cached positions `[p0, p1)` of `seq_id`; negative values mean
    /// "all sequences" / "unbounded".
    fn clear_sequence(&mut self, seq_id: i32, p0: i32, p1: i32) -> bool;
}

//  Parameters

/// Parameters for [`Backend::load_model`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelParams {
    /// Memory-map the weights instead of reading them into RAM.
    pub use_mmap: bool,
    /// Lock model memory (prevent swapping).
    pub use_mlock: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            use_mmap: true,
            use_mlock: false,
        }
    }
}

/// Parameters for [`Backend::new_context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParams {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: i32,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 1024,
            n_batch: 64,
            n_threads: 4,
        }
    }
}
