//! The generation loop: prefill, sample, stream, stop.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, warn};

use crate::backend::{Context, Vocab};
use crate::batch::{self, Batch};
use crate::cache::SequenceCache;
use crate::cancel::StopHandle;
use crate::error::{Result, SessionError};
use crate::sampler::SamplingConfig;
use crate::sink::TokenSink;
use crate::stop::{Accumulator, Append};
use crate::token::{token_to_piece, tokenize};

/// Where a session is in its request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Prefilling,
    Decoding,
    Stopped,
    Completed,
    Failed,
}

#[derive(Debug)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Phase::Idle as u8))
    }

    pub(crate) fn set(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn get(&self) -> Phase {
        match self.0.load(Ordering::Acquire) {
            1 => Phase::Prefilling,
            2 => Phase::Decoding,
            3 => Phase::Stopped,
            4 => Phase::Completed,
            5 => Phase::Failed,
            _ => Phase::Idle,
        }
    }
}

/// Why the decode loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// The model produced an end-of-generation token.
    EndOfSequence,
    /// `max_tokens` reached or the context is full.
    Length,
    /// A stop marker appeared in the output.
    StopMarker(&'static str),
    /// Stopped through a [`StopHandle`].
    Cancelled,
    /// A decode step failed; the text so far is kept.
    DecodeFailed(String),
}

impl FinishReason {
    /// Terminal phase this reason maps to.
    pub fn phase(&self) -> Phase {
        match self {
            Self::EndOfSequence | Self::Length => Phase::Completed,
            Self::StopMarker(_) | Self::Cancelled => Phase::Stopped,
            Self::DecodeFailed(_) => Phase::Failed,
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndOfSequence => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::StopMarker(m) => write!(f, "stop_marker:{m}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DecodeFailed(e) => write!(f, "decode_failed:{e}"),
        }
    }
}

/// Result of one generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Output truncated at the earliest sanitization marker.
    pub text: String,
    pub finish_reason: FinishReason,
    pub prompt_tokens: u32,
    /// Sampled tokens, including a final end-of-generation token.
    pub completion_tokens: u32,
}

/// Everything one request needs from the loaded state.
pub(crate) struct Request<'a, M: ?Sized, C: ?Sized> {
    pub model: &'a M,
    pub ctx: &'a mut C,
    pub cache: &'a mut SequenceCache,
    pub parse_special: bool,
    pub stop: &'a StopHandle,
    pub phase: &'a PhaseCell,
}

fn deliver(sink: &mut dyn TokenSink, text: &str) {
    if let Err(e) = sink.on_token(text) {
        warn!(error = %e, "Dropped generated fragment");
    }
}

/// Run one request end to end on the calling thread.
///
/// The cache is reset first; the caller resends the whole conversation as
/// `prompt`. Tokenize and prefill failures are errors. A failure during
/// decoding ends the loop and returns the partial text.
pub(crate) fn run<M, C>(
    req: Request<'_, M, C>,
    prompt: &str,
    config: &SamplingConfig,
    sink: &mut dyn TokenSink,
) -> Result<Generation>
where
    M: Vocab + ?Sized,
    C: Context + ?Sized,
{
    let Request {
        model,
        ctx,
        cache,
        parse_special,
        stop,
        phase,
    } = req;

    stop.clear();
    cache.reset(ctx);

    let tokens = tokenize(model, prompt, true, parse_special)?;
    if tokens.is_empty() {
        return Err(SessionError::TokenizeFailed(
            "prompt produced no tokens".into(),
        ));
    }
    let prompt_tokens = tokens.len() as u32;
    debug!(prompt_tokens, "Prompt tokenized");

    //  Prompt processing
    phase.set(Phase::Prefilling);
    let mut batch = Batch::new(ctx.n_batch() as usize);
    batch::prefill(ctx, cache, &mut batch, &tokens)?;

    //  Token generation loop
    phase.set(Phase::Decoding);
    let mut sampler = config.to_chain();
    let mut acc = Accumulator::new();
    let mut completion_tokens = 0u32;

    let finish_reason = loop {
        if completion_tokens >= config.max_tokens {
            break FinishReason::Length;
        }
        if stop.is_stopped() {
            debug!("Generation cancelled");
            break FinishReason::Cancelled;
        }

        let Some(token) = ctx.logits().and_then(|logits| sampler.sample(logits)) else {
            break FinishReason::DecodeFailed("backend returned no logits".into());
        };
        sampler.accept(token);
        completion_tokens += 1;

        if model.is_end_of_generation(token) {
            break FinishReason::EndOfSequence;
        }

        let piece = token_to_piece(model, token);
        match acc.push(&piece) {
            Append::Stop(marker) => break FinishReason::StopMarker(marker),
            Append::Continue(Some(text)) => deliver(sink, &text),
            Append::Continue(None) => {}
        }

        // Context-size guard
        if cache.is_full() {
            break FinishReason::Length;
        }

        if let Err(e) = batch::decode_next(ctx, cache, &mut batch, token) {
            warn!(error = %e, completion_tokens, "Decode failed mid-generation, keeping partial output");
            break FinishReason::DecodeFailed(e.to_string());
        }
    };
    drop(sampler);

    // Held-back text is flushed only on a natural end. The fragment that
    // hit a stop marker never reaches the sink.
    let text = acc.final_text();
    let flush = matches!(
        finish_reason,
        FinishReason::EndOfSequence | FinishReason::Length | FinishReason::DecodeFailed(_)
    );
    if flush && !stop.is_stopped() {
        let rest = acc.unreleased(&text);
        if !rest.is_empty() {
            deliver(sink, rest);
        }
    }

    phase.set(finish_reason.phase());
    debug!(%finish_reason, prompt_tokens, completion_tokens, "Generation finished");

    Ok(Generation {
        text,
        finish_reason,
        prompt_tokens,
        completion_tokens,
    })
}
