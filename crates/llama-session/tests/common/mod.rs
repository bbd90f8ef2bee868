//! Scripted in-memory backend shared by the integration tests.
//!
//! Prompt bytes tokenize to `BYTE_BASE + byte`. Output token `i + 1` is
//! `pieces[i]`. After the n-th decode that requests logits (counted since
//! the last cache clear) the logits are one-hot on `script[n - 1]`, or on
//! [`EOS`] once the script runs out.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use llama_session::batch::Slot;
use llama_session::{Backend, Batch, Context, ContextParams, ModelParams, Result, SessionError, Token, Vocab};

pub const EOS: Token = 0;
pub const BOS: Token = 999;
pub const BYTE_BASE: Token = 1000;
const N_VOCAB: usize = 1256;

/// Path of an existing file to hand to `load`.
pub fn model_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"))
}

#[derive(Debug, Default)]
pub struct Log {
    pub inits: usize,
    pub shutdowns: usize,
    pub resets: usize,
    /// Every batch passed to `decode`, including failed ones.
    pub decoded: Vec<Vec<Slot>>,
    pub events: Vec<&'static str>,
}

impl Log {
    /// Positions of the `i`-th decoded batch.
    pub fn positions_of_batch(&self, i: usize) -> Vec<i32> {
        self.decoded[i].iter().map(|s| s.pos).collect()
    }
}

#[derive(Clone)]
pub struct ScriptedBackend {
    pub log: Arc<Mutex<Log>>,
    pieces: Arc<Vec<Vec<u8>>>,
    script: Vec<Token>,
    tokens_per_byte: usize,
    fail_decode_at: Option<usize>,
    fail_load: bool,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    /// Emits `pieces` in order, then EOS.
    pub fn speaking(pieces: &[&str]) -> Self {
        Self::speaking_bytes(pieces.iter().map(|p| p.as_bytes().to_vec()).collect())
    }

    pub fn speaking_bytes(pieces: Vec<Vec<u8>>) -> Self {
        let script = (1..=pieces.len() as Token).collect();
        Self {
            log: Arc::default(),
            pieces: Arc::new(pieces),
            script,
            tokens_per_byte: 1,
            fail_decode_at: None,
            fail_load: false,
            delay: None,
        }
    }

    /// Each prompt byte becomes `n` tokens.
    pub fn with_tokens_per_byte(mut self, n: usize) -> Self {
        self.tokens_per_byte = n;
        self
    }

    /// The `n`-th decode call (1-based, counted per context) fails.
    pub fn with_decode_failure(mut self, n: usize) -> Self {
        self.fail_decode_at = Some(n);
        self
    }

    pub fn with_load_failure(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Sleep this long in every decode call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, Log> {
        self.log.lock().unwrap()
    }
}

impl Backend for ScriptedBackend {
    type Model = ScriptedModel;
    type Context = ScriptedContext;

    fn init(&self) -> Result<()> {
        let mut log = self.log();
        log.inits += 1;
        log.events.push("init");
        Ok(())
    }

    fn load_model(&self, path: &Path, _params: &ModelParams) -> Result<ScriptedModel> {
        if self.fail_load {
            return Err(SessionError::LoadFailed {
                path: path.display().to_string(),
                reason: "not a GGUF file".into(),
            });
        }
        Ok(ScriptedModel {
            pieces: self.pieces.clone(),
            tokens_per_byte: self.tokens_per_byte,
            log: self.log.clone(),
        })
    }

    fn new_context(&self, model: Arc<ScriptedModel>, params: &ContextParams) -> Result<ScriptedContext> {
        Ok(ScriptedContext {
            _model: model,
            script: self.script.clone(),
            n_ctx: params.n_ctx,
            n_batch: params.n_batch,
            outputs: 0,
            decode_calls: 0,
            logits: Vec::new(),
            fail_decode_at: self.fail_decode_at,
            delay: self.delay,
            log: self.log.clone(),
        })
    }

    fn shutdown(&self) {
        let mut log = self.log();
        log.shutdowns += 1;
        log.events.push("shutdown");
    }
}

pub struct ScriptedModel {
    pieces: Arc<Vec<Vec<u8>>>,
    tokens_per_byte: usize,
    log: Arc<Mutex<Log>>,
}

impl Vocab for ScriptedModel {
    fn tokenize_into(&self, text: &str, add_special: bool, _parse_special: bool, out: &mut [Token]) -> i32 {
        let mut tokens = Vec::new();
        if add_special {
            tokens.push(BOS);
        }
        for b in text.bytes() {
            for _ in 0..self.tokens_per_byte {
                tokens.push(BYTE_BASE + b as Token);
            }
        }
        if tokens.len() > out.len() {
            return -(tokens.len() as i32);
        }
        out[..tokens.len()].copy_from_slice(&tokens);
        tokens.len() as i32
    }

    fn token_to_piece_into(&self, token: Token, out: &mut [u8]) -> i32 {
        let Some(piece) = usize::try_from(token - 1).ok().and_then(|i| self.pieces.get(i)) else {
            return 0;
        };
        if piece.len() > out.len() {
            return -(piece.len() as i32);
        }
        out[..piece.len()].copy_from_slice(piece);
        piece.len() as i32
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        token == EOS
    }

    fn n_vocab(&self) -> usize {
        N_VOCAB
    }
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.log.lock().unwrap().events.push("model dropped");
    }
}

pub struct ScriptedContext {
    _model: Arc<ScriptedModel>,
    script: Vec<Token>,
    n_ctx: u32,
    n_batch: u32,
    outputs: usize,
    decode_calls: usize,
    logits: Vec<f32>,
    fail_decode_at: Option<usize>,
    delay: Option<Duration>,
    log: Arc<Mutex<Log>>,
}

impl Context for ScriptedContext {
    fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    fn n_batch(&self) -> u32 {
        self.n_batch
    }

    fn decode(&mut self, batch: &Batch) -> Result<()> {
        self.decode_calls += 1;
        self.log.lock().unwrap().decoded.push(batch.slots().to_vec());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_decode_at == Some(self.decode_calls) {
            return Err(SessionError::DecodeFailed("injected failure".into()));
        }

        if batch.slots().iter().any(|s| s.logits) {
            self.outputs += 1;
            let next = self.script.get(self.outputs - 1).copied().unwrap_or(EOS);
            self.logits = vec![f32::NEG_INFINITY; N_VOCAB];
            self.logits[next as usize] = 10.0;
        }
        Ok(())
    }

    fn logits(&self) -> Option<&[f32]> {
        if self.logits.is_empty() {
            None
        } else {
            Some(&self.logits)
        }
    }

    fn clear_sequence(&mut self, _seq_id: i32, _p0: i32, _p1: i32) -> bool {
        self.outputs = 0;
        self.logits.clear();
        self.log.lock().unwrap().resets += 1;
        true
    }
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.log.lock().unwrap().events.push("context dropped");
    }
}
