//! llama.cpp implementation of the [`Backend`] traits.
//!
//! Unsafe FFI stays in this module; everything above it works on
//! [`Batch`](crate::batch::Batch), [`Token`](crate::backend::Token) and
//! plain slices.

mod batch;
mod context;
mod model;

use std::ffi::CStr;
use std::path::Path;
use std::sync::{Arc, Once};

use tracing::{debug, info};

use crate::backend::{Backend, ContextParams, ModelParams};
use crate::error::Result;

pub use context::LlamaContext;
pub use model::LlamaModel;

static LOG_CALLBACK: Once = Once::new();

/// The llama.cpp runtime, CPU only.
///
/// `init` / `shutdown` call `llama_backend_init` / `llama_backend_free`
/// once per load/unload cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct LlamaBackend;

impl LlamaBackend {
    pub fn new() -> Self {
        Self
    }

    /// Human-readable build and CPU feature string.
    pub fn system_info() -> String {
        unsafe {
            CStr::from_ptr(llama_sys::llama_print_system_info())
                .to_string_lossy()
                .into_owned()
        }
    }
}

impl Backend for LlamaBackend {
    type Model = LlamaModel;
    type Context = LlamaContext;

    fn init(&self) -> Result<()> {
        LOG_CALLBACK.call_once(install_log_callback);
        unsafe { llama_sys::llama_backend_init() };
        info!("llama.cpp backend initialized");
        Ok(())
    }

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<LlamaModel> {
        LlamaModel::load_from_file(path, params)
    }

    fn new_context(&self, model: Arc<LlamaModel>, params: &ContextParams) -> Result<LlamaContext> {
        LlamaContext::new(model, params)
    }

    fn shutdown(&self) {
        unsafe { llama_sys::llama_backend_free() };
        debug!("llama.cpp backend freed");
    }
}

/// Route llama.cpp / ggml logging into `tracing` under target `llama.cpp`.
fn install_log_callback() {
    unsafe extern "C" fn cb(
        level: llama_sys::ggml_log_level,
        text: *const std::ffi::c_char,
        _user_data: *mut std::ffi::c_void,
    ) {
        if text.is_null() {
            return;
        }
        let msg = unsafe { CStr::from_ptr(text) }.to_string_lossy();
        let msg = msg.trim();
        if msg.is_empty() {
            return;
        }
        // ggml_log_level: DEBUG=1, INFO=2, WARN=3, ERROR=4
        match level {
            4 => tracing::error!(target: "llama.cpp", "{msg}"),
            3 => tracing::warn!(target: "llama.cpp", "{msg}"),
            2 => tracing::debug!(target: "llama.cpp", "{msg}"),
            _ => tracing::trace!(target: "llama.cpp", "{msg}"),
        }
    }

    unsafe { llama_sys::llama_log_set(Some(cb), std::ptr::null_mut()) };
}
