//! The process-wide generation session.
//!
//! A [`Session`] owns at most one loaded model with its inference context
//! and serialises load / generate / unload behind a mutex. Cancellation
//! goes through a [`StopHandle`] and never takes that lock.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{Backend, Context, ContextParams, ModelParams};
use crate::cache::SequenceCache;
use crate::cancel::StopHandle;
use crate::error::{Result, SessionError};
use crate::generate::{self, Generation, Phase, PhaseCell, Request};
use crate::sampler::SamplingConfig;
use crate::sink::TokenSink;

//  LoadOptions

/// Host-facing load options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOptions {
    /// Maximum positions in the sequence cache.
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    /// Maximum tokens per decode call.
    #[serde(default = "default_batch_width")]
    pub batch_width: u32,
    #[serde(default = "default_thread_count")]
    pub thread_count: i32,
    #[serde(default = "default_true")]
    pub use_memory_map: bool,
    #[serde(default)]
    pub use_memory_lock: bool,
    /// Turn special-token text such as `<|eot_id|>` in prompts into the
    /// corresponding special tokens.
    #[serde(default)]
    pub parse_special: bool,
}

fn default_context_length() -> u32 {
    1024
}
fn default_batch_width() -> u32 {
    64
}
fn default_thread_count() -> i32 {
    4
}
fn default_true() -> bool {
    true
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            context_length: default_context_length(),
            batch_width: default_batch_width(),
            thread_count: default_thread_count(),
            use_memory_map: true,
            use_memory_lock: false,
            parse_special: false,
        }
    }
}

impl LoadOptions {
    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            use_mmap: self.use_memory_map,
            use_mlock: self.use_memory_lock,
        }
    }

    pub fn context_params(&self) -> ContextParams {
        ContextParams {
            n_ctx: self.context_length,
            n_batch: self.batch_width.max(1),
            n_threads: self.thread_count,
        }
    }
}

//  Session

struct Loaded<B: Backend> {
    // Declaration order is drop order: the context goes before the model.
    ctx: B::Context,
    model: Arc<B::Model>,
    cache: SequenceCache,
    path: PathBuf,
    parse_special: bool,
}

/// Exactly one loaded model, reused across requests.
pub struct Session<B: Backend> {
    backend: B,
    loaded: Mutex<Option<Loaded<B>>>,
    stop: StopHandle,
    phase: PhaseCell,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            loaded: Mutex::new(None),
            stop: StopHandle::new(),
            phase: PhaseCell::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn lock(&self) -> MutexGuard<'_, Option<Loaded<B>>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    //  Loading / Unloading

    /// Load a model and create its context.
    ///
    /// A no-op when a model is already loaded. Blocks while a generation is
    /// in flight.
    pub fn load(&self, path: &Path, options: &LoadOptions) -> Result<()> {
        let mut loaded = self.lock();
        if let Some(current) = loaded.as_ref() {
            info!(path = %current.path.display(), "Model is already loaded");
            return Ok(());
        }

        if !path.is_file() {
            return Err(SessionError::load(path, "file not found"));
        }

        self.backend.init()?;
        let model = match self.backend.load_model(path, &options.model_params()) {
            Ok(model) => Arc::new(model),
            Err(e) => {
                self.backend.shutdown();
                return Err(e);
            }
        };

        let ctx_params = options.context_params();
        let ctx = match self.backend.new_context(model.clone(), &ctx_params) {
            Ok(ctx) => ctx,
            Err(e) => {
                drop(model);
                self.backend.shutdown();
                return Err(e);
            }
        };

        debug!(
            n_ctx = ctx.n_ctx(),
            n_batch = ctx.n_batch(),
            threads = ctx_params.n_threads,
            "Context created"
        );
        *loaded = Some(Loaded {
            cache: SequenceCache::new(ctx.n_ctx()),
            ctx,
            model,
            path: path.to_path_buf(),
            parse_special: options.parse_special,
        });
        info!(path = %path.display(), "Model loaded and ready");
        Ok(())
    }

    /// Release the context, the model and the backend runtime, in that
    /// order. Safe to call when nothing is loaded.
    pub fn unload(&self) {
        let mut loaded = self.lock();
        if let Some(current) = loaded.take() {
            let path = current.path.clone();
            drop(current);
            self.backend.shutdown();
            info!(path = %path.display(), "Model unloaded");
        }
    }

    /// Blocks while a generation is in flight.
    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    /// Path of the loaded model. Blocks while a generation is in flight.
    pub fn model_path(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|l| l.path.clone())
    }

    //  Generation

    /// Generate a completion for `prompt`, streaming fragments to `sink`.
    ///
    /// Fails with [`SessionError::Busy`] if another generation holds the
    /// session and with [`SessionError::NotLoaded`] before any load.
    pub fn generate(
        &self,
        prompt: &str,
        config: &SamplingConfig,
        sink: &mut dyn TokenSink,
    ) -> Result<Generation> {
        let mut guard = match self.loaded.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(SessionError::Busy),
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };
        let Some(loaded) = guard.as_mut() else {
            return Err(SessionError::NotLoaded);
        };

        let request = Request {
            model: loaded.model.as_ref(),
            ctx: &mut loaded.ctx,
            cache: &mut loaded.cache,
            parse_special: loaded.parse_special,
            stop: &self.stop,
            phase: &self.phase,
        };
        let result = generate::run(request, prompt, config, sink);

        if let Err(e) = &result {
            self.phase.set(Phase::Failed);
            warn!(error = %e, "Generation failed");
        }
        self.phase.set(Phase::Idle);
        result
    }

    //  Cancellation

    /// Ask the in-flight generation to stop after its current step.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Handle for stopping generations from other threads.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        self.unload();
    }
}
