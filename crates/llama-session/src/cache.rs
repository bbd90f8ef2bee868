//! Bookkeeping for the backend's sequence cache.

use tracing::{debug, warn};

use crate::backend::Context;

/// Number of positions committed to the sequence cache of the current
/// request.
#[derive(Debug, Clone)]
pub struct SequenceCache {
    n_past: i32,
    n_ctx: u32,
}

impl SequenceCache {
    pub fn new(n_ctx: u32) -> Self {
        Self { n_past: 0, n_ctx }
    }

    /// Drop every cached position of every sequence and restart at zero.
    pub fn reset<C: Context + ?Sized>(&mut self, ctx: &mut C) {
        if !ctx.clear_sequence(-1, -1, -1) {
            warn!("Backend refused to clear the sequence cache");
        }
        debug!(dropped = self.n_past, "Sequence cache reset");
        self.n_past = 0;
    }

    /// Next free position.
    pub fn n_past(&self) -> i32 {
        self.n_past
    }

    pub fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    pub fn remaining(&self) -> usize {
        (self.n_ctx as usize).saturating_sub(self.n_past as usize)
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn advance(&mut self, n: usize) {
        self.n_past += n as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::error::Result;

    struct Clearable {
        cleared: Vec<(i32, i32, i32)>,
    }

    impl Context for Clearable {
        fn n_ctx(&self) -> u32 {
            16
        }
        fn n_batch(&self) -> u32 {
            4
        }
        fn decode(&mut self, _batch: &Batch) -> Result<()> {
            Ok(())
        }
        fn logits(&self) -> Option<&[f32]> {
            None
        }
        fn clear_sequence(&mut self, seq_id: i32, p0: i32, p1: i32) -> bool {
            self.cleared.push((seq_id, p0, p1));
            true
        }
    }

    #[test]
    fn reset_clears_everything_and_rewinds() {
        let mut ctx = Clearable {
            cleared: Vec::new(),
        };
        let mut cache = SequenceCache::new(16);
        cache.advance(10);
        assert_eq!(cache.remaining(), 6);

        cache.reset(&mut ctx);

        assert_eq!(cache.n_past(), 0);
        assert_eq!(cache.remaining(), 16);
        assert_eq!(ctx.cleared, vec![(-1, -1, -1)]);
    }

    #[test]
    fn full_when_every_position_is_used() {
        let mut cache = SequenceCache::new(3);
        cache.advance(3);
        assert!(cache.is_full());
    }
}
