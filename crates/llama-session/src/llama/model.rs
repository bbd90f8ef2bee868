use std::ffi::{CString, c_char};
use std::path::Path;

use tracing::{debug, info};

use crate::backend::{ModelParams, Token, Vocab};
use crate::error::{Result, SessionError};

/// Owns a `llama_model` pointer and frees it on drop.
pub struct LlamaModel {
    ptr: *mut llama_sys::llama_model,
    vocab: *const llama_sys::llama_vocab,
}

// Safety: llama_model and its vocab are read-only after creation.
unsafe impl Send for LlamaModel {}
unsafe impl Sync for LlamaModel {}

impl LlamaModel {
    pub fn load_from_file(path: &Path, params: &ModelParams) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| SessionError::load(path, "invalid UTF-8 in path"))?;
        let c_path =
            CString::new(path_str).map_err(|_| SessionError::load(path, "path contains a NUL byte"))?;

        let mut raw = unsafe { llama_sys::llama_model_default_params() };
        raw.n_gpu_layers = 0;
        raw.use_mmap = params.use_mmap;
        raw.use_mlock = params.use_mlock;

        info!(path = %path.display(), mmap = params.use_mmap, "Loading model");
        let ptr = unsafe { llama_sys::llama_model_load_from_file(c_path.as_ptr(), raw) };
        if ptr.is_null() {
            return Err(SessionError::load(path, "llama_model_load_from_file returned null"));
        }

        let vocab = unsafe { llama_sys::llama_model_get_vocab(ptr) };
        Ok(Self { ptr, vocab })
    }

    pub(crate) fn as_ptr(&self) -> *mut llama_sys::llama_model {
        self.ptr
    }

    pub fn desc(&self) -> String {
        let mut buf = vec![0u8; 256];
        let len = unsafe {
            llama_sys::llama_model_desc(self.ptr, buf.as_mut_ptr() as *mut c_char, buf.len())
        };
        if len > 0 {
            buf.truncate((len as usize).min(buf.len()));
            String::from_utf8_lossy(&buf).into_owned()
        } else {
            String::new()
        }
    }

    pub fn n_ctx_train(&self) -> i32 {
        unsafe { llama_sys::llama_model_n_ctx_train(self.ptr) }
    }
}

impl Vocab for LlamaModel {
    fn tokenize_into(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
        out: &mut [Token],
    ) -> i32 {
        unsafe {
            llama_sys::llama_tokenize(
                self.vocab,
                text.as_ptr() as *const c_char,
                text.len() as i32,
                out.as_mut_ptr(),
                out.len() as i32,
                add_special,
                parse_special,
            )
        }
    }

    fn token_to_piece_into(&self, token: Token, out: &mut [u8]) -> i32 {
        unsafe {
            llama_sys::llama_token_to_piece(
                self.vocab,
                token,
                out.as_mut_ptr() as *mut c_char,
                out.len() as i32,
                0,     // lstrip
                false, // render special tokens
            )
        }
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        unsafe { llama_sys::llama_vocab_is_eog(self.vocab, token) }
    }

    fn n_vocab(&self) -> usize {
        unsafe { llama_sys::llama_vocab_n_tokens(self.vocab) }.max(0) as usize
    }
}

impl Drop for LlamaModel {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            debug!("Freeing llama model");
            unsafe { llama_sys::llama_model_free(self.ptr) }
        }
    }
}
