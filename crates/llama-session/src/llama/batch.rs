use crate::batch::Batch;

/// `llama_batch` allocation reused for every decode call of a context.
pub(super) struct RawBatch {
    inner: llama_sys::llama_batch,
    capacity: usize,
}

impl RawBatch {
    pub(super) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let inner = unsafe { llama_sys::llama_batch_init(capacity as i32, 0, 1) };
        Self { inner, capacity }
    }

    /// Copy `batch` into the C buffers and return the struct by value.
    ///
    /// Panics if `batch` holds more slots than this allocation.
    pub(super) fn fill(&mut self, batch: &Batch) -> llama_sys::llama_batch {
        assert!(
            batch.n_tokens() <= self.capacity,
            "llama_batch capacity ({}) exceeded",
            self.capacity
        );

        for (i, slot) in batch.slots().iter().enumerate() {
            unsafe {
                *self.inner.token.add(i) = slot.token;
                *self.inner.pos.add(i) = slot.pos;
                *self.inner.n_seq_id.add(i) = 1;
                *(*self.inner.seq_id.add(i)) = slot.seq_id;
                *self.inner.logits.add(i) = i8::from(slot.logits);
            }
        }
        self.inner.n_tokens = batch.n_tokens() as i32;
        self.inner
    }
}

impl Drop for RawBatch {
    fn drop(&mut self) {
        unsafe { llama_sys::llama_batch_free(self.inner) }
    }
}
