//! String-typed facade for host bindings.
//!
//! Mirrors what a mobile or scripting bridge sees: a boolean for loads, a
//! plain string for generations (failures become `"Error: ..."`) and a
//! single registered `onToken` callback. Nothing here panics across the
//! boundary.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::error;

use crate::backend::Backend;
use crate::sampler::SamplingConfig;
use crate::session::{LoadOptions, Session};
use crate::sink::{SinkClosed, TokenSink};

/// Prefix of every failure returned by [`OfflineLlm::generate`].
pub const ERROR_PREFIX: &str = "Error: ";

type Callback = Box<dyn FnMut(&str) + Send>;

/// The registered `onToken` callback. `version` changes on every set or
/// clear so a delivery in flight can tell it was replaced.
#[derive(Default)]
struct Listener {
    callback: Option<Callback>,
    version: u64,
}

impl Listener {
    fn replace(&mut self, callback: Option<Callback>) {
        self.callback = callback;
        self.version = self.version.wrapping_add(1);
    }
}

pub struct OfflineLlm<B: Backend> {
    session: Session<B>,
    on_token: Mutex<Listener>,
}

/// Forwards fragments to whatever callback is registered at delivery time.
///
/// The callback runs without the lock held, so it may call
/// [`OfflineLlm::set_on_token`] or [`OfflineLlm::clear_on_token`].
struct CallbackSink<'a>(&'a Mutex<Listener>);

impl CallbackSink<'_> {
    fn lock(&self) -> MutexGuard<'_, Listener> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenSink for CallbackSink<'_> {
    fn on_token(&mut self, fragment: &str) -> Result<(), SinkClosed> {
        let (mut callback, version) = {
            let mut listener = self.lock();
            (listener.callback.take(), listener.version)
        };
        let Some(f) = callback.as_mut() else {
            return Ok(());
        };
        f(fragment);

        let mut listener = self.lock();
        if listener.version == version {
            listener.callback = callback;
        }
        Ok(())
    }
}

impl<B: Backend> OfflineLlm<B> {
    pub fn new(backend: B) -> Self {
        Self {
            session: Session::new(backend),
            on_token: Mutex::new(Listener::default()),
        }
    }

    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    /// Register the `onToken` listener, replacing any previous one.
    pub fn set_on_token<F>(&self, callback: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.listener().replace(Some(Box::new(callback)));
    }

    pub fn clear_on_token(&self) {
        self.listener().replace(None);
    }

    fn listener(&self) -> MutexGuard<'_, Listener> {
        self.on_token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a model; `None` uses [`LoadOptions::default`]. Accepts plain
    /// paths and `file://` URIs.
    pub fn load_model(&self, path: &str, options: Option<LoadOptions>) -> bool {
        let options = options.unwrap_or_default();
        let path = path.strip_prefix("file://").unwrap_or(path);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.session.load(Path::new(path), &options)
        }));
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Model load failed");
                false
            }
            Err(_) => {
                error!(path, "Model load panicked");
                false
            }
        }
    }

    pub fn unload_model(&self) {
        self.session.unload();
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_loaded()
    }

    /// Generate a completion, returning the final text or an error string.
    ///
    /// Repetition penalty, seed and the rest of [`SamplingConfig`] keep
    /// their defaults.
    pub fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        top_k: i32,
        top_p: f32,
        max_tokens: u32,
    ) -> String {
        let config = SamplingConfig {
            temperature,
            top_k,
            top_p,
            max_tokens,
            ..SamplingConfig::default()
        };
        self.generate_with(prompt, &config)
    }

    pub fn generate_with(&self, prompt: &str, config: &SamplingConfig) -> String {
        let mut sink = CallbackSink(&self.on_token);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.session.generate(prompt, config, &mut sink)
        }));
        match outcome {
            Ok(Ok(generation)) => generation.text,
            Ok(Err(e)) => format!("{ERROR_PREFIX}{e}"),
            Err(_) => {
                error!("Generation panicked");
                format!("{ERROR_PREFIX}internal failure")
            }
        }
    }

    /// Takes effect at the next token boundary. Never blocks.
    pub fn stop_generation(&self) {
        self.session.stop();
    }
}
