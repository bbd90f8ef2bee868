//! Decode batches and chunked prompt prefill.

use tracing::debug;

use crate::backend::{Context, Token};
use crate::cache::SequenceCache;
use crate::error::{Result, SessionError};

/// Sequence id of the single logical conversation.
pub const SEQ_ID: i32 = 0;

/// One decode slot. Every slot belongs to exactly one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub token: Token,
    pub pos: i32,
    pub seq_id: i32,
    /// Request a next-token distribution for this position.
    pub logits: bool,
}

/// Bounded buffer of tokens to feed into the decoder.
#[derive(Debug, Clone)]
pub struct Batch {
    slots: Vec<Slot>,
    capacity: usize,
}

impl Batch {
    /// Allocate a batch with room for `capacity` tokens (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn n_tokens(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Remove all tokens.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Push a token into the batch.
    pub fn add(&mut self, token: Token, pos: i32, seq_id: i32, logits: bool) {
        assert!(
            self.slots.len() < self.capacity,
            "Batch capacity ({}) exceeded",
            self.capacity
        );
        self.slots.push(Slot {
            token,
            pos,
            seq_id,
            logits,
        });
    }
}

/// Decode `tokens` into the sequence cache, `batch.capacity()` at a time.
///
/// Chunks are decoded strictly in order. Only the last token of the whole
/// prompt requests logits. Any failed chunk aborts the prefill.
pub fn prefill<C: Context + ?Sized>(
    ctx: &mut C,
    cache: &mut SequenceCache,
    batch: &mut Batch,
    tokens: &[Token],
) -> Result<()> {
    if tokens.len() > cache.remaining() {
        return Err(SessionError::DecodeFailed(format!(
            "prompt of {} tokens exceeds the remaining context of {}",
            tokens.len(),
            cache.remaining()
        )));
    }

    let width = batch.capacity();
    let last = tokens.len().saturating_sub(1);
    for (n, chunk) in tokens.chunks(width).enumerate() {
        let base = n * width;
        batch.clear();
        for (i, &tok) in chunk.iter().enumerate() {
            batch.add(tok, cache.n_past() + i as i32, SEQ_ID, base + i == last);
        }

        ctx.decode(batch)?;
        cache.advance(chunk.len());
        debug!(chunk = n, n_past = cache.n_past(), "Prefill chunk decoded");
    }
    Ok(())
}

/// Decode a single freshly sampled token at the next cache position.
pub fn decode_next<C: Context + ?Sized>(
    ctx: &mut C,
    cache: &mut SequenceCache,
    batch: &mut Batch,
    token: Token,
) -> Result<()> {
    batch.clear();
    batch.add(token, cache.n_past(), SEQ_ID, true);
    ctx.decode(batch)?;
    cache.advance(1);
    Ok(())
}
