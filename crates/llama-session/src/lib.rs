//! Single-session, on-device text generation over llama.cpp.
//!
//! A [`Session`] loads one GGUF model, runs one prompt at a time through a
//! prefill / sample / decode loop, streams text fragments to a
//! [`TokenSink`] and can be cancelled from any thread. The inference engine
//! sits behind the [`Backend`] traits; enable the `llama-cpp` feature for
//! the real one.

pub mod backend;
pub mod batch;
pub mod cache;
pub mod cancel;
pub mod chat;
pub mod error;
pub mod generate;
pub mod host;
#[cfg(feature = "llama-cpp")]
pub mod llama;
pub mod sampler;
pub mod session;
pub mod sink;
pub mod stop;
pub mod token;

pub use backend::{Backend, Context, ContextParams, ModelParams, Token, Vocab};
pub use batch::Batch;
pub use cache::SequenceCache;
pub use cancel::StopHandle;
pub use chat::{ChatFormat, ChatMessage, Role};
pub use error::{Result, SessionError};
pub use generate::{FinishReason, Generation, Phase};
pub use host::{ERROR_PREFIX, OfflineLlm};
#[cfg(feature = "llama-cpp")]
pub use llama::LlamaBackend;
pub use sampler::{SamplerChain, SamplingConfig};
pub use session::{LoadOptions, Session};
pub use sink::{ChannelSink, NullSink, SinkClosed, TokenSink};
pub use token::{token_to_piece, tokenize};
