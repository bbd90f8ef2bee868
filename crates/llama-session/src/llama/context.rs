use std::sync::Arc;

use tracing::debug;

use super::batch::RawBatch;
use super::model::LlamaModel;
use crate::backend::{Context, ContextParams, Vocab};
use crate::batch::Batch;
use crate::error::{Result, SessionError};

/// Owns a `llama_context` pointer and its parent model reference.
pub struct LlamaContext {
    ptr: *mut llama_sys::llama_context,
    raw_batch: RawBatch,
    n_vocab: usize,
    /// Keep the model alive for the lifetime of the context.
    model: Arc<LlamaModel>,
}

// Safety: all use of the context is &mut self, serialised by the session
// mutex.
unsafe impl Send for LlamaContext {}

impl LlamaContext {
    pub fn new(model: Arc<LlamaModel>, params: &ContextParams) -> Result<Self> {
        let mut raw = unsafe { llama_sys::llama_context_default_params() };
        raw.n_ctx = params.n_ctx;
        raw.n_batch = params.n_batch;
        raw.n_ubatch = params.n_batch;
        raw.n_threads = params.n_threads;
        raw.n_threads_batch = params.n_threads;

        let ptr = unsafe { llama_sys::llama_init_from_model(model.as_ptr(), raw) };
        if ptr.is_null() {
            return Err(SessionError::LoadFailed {
                path: model.desc(),
                reason: "llama_init_from_model returned null".into(),
            });
        }

        let n_batch = unsafe { llama_sys::llama_n_batch(ptr) } as usize;
        debug!(n_ctx = params.n_ctx, n_batch, "llama context created");
        Ok(Self {
            ptr,
            raw_batch: RawBatch::new(n_batch),
            n_vocab: model.n_vocab(),
            model,
        })
    }

    pub fn model(&self) -> &LlamaModel {
        &self.model
    }
}

impl Context for LlamaContext {
    fn n_ctx(&self) -> u32 {
        unsafe { llama_sys::llama_n_ctx(self.ptr) }
    }

    fn n_batch(&self) -> u32 {
        unsafe { llama_sys::llama_n_batch(self.ptr) }
    }

    fn decode(&mut self, batch: &Batch) -> Result<()> {
        let raw = self.raw_batch.fill(batch);
        let rc = unsafe { llama_sys::llama_decode(self.ptr, raw) };
        if rc != 0 {
            return Err(SessionError::DecodeFailed(format!("llama_decode returned {rc}")));
        }
        Ok(())
    }

    fn logits(&self) -> Option<&[f32]> {
        unsafe {
            let p = llama_sys::llama_get_logits_ith(self.ptr, -1);
            if p.is_null() {
                None
            } else {
                Some(std::slice::from_raw_parts(p, self.n_vocab))
            }
        }
    }

    fn clear_sequence(&mut self, seq_id: i32, p0: i32, p1: i32) -> bool {
        unsafe {
            let mem = llama_sys::llama_get_memory(self.ptr);
            if mem.is_null() {
                return false;
            }
            llama_sys::llama_memory_seq_rm(mem, seq_id, p0, p1)
        }
    }
}

impl Drop for LlamaContext {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            debug!("Freeing llama context");
            unsafe { llama_sys::llama_free(self.ptr) }
        }
    }
}
