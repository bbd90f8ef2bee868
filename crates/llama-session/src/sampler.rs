//! Sampler chain construction and token sampling.
//!
//! A chain is an ordered list of transforms over the candidate list built
//! from the backend's logits, ending in a draw. Chains carry state (the
//! penalty window and the RNG stream), so one is built per request and
//! dropped with it.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::backend::Token;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    id: Token,
    logit: f32,
    p: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Penalties {
        last_n: usize,
        repeat: f32,
        freq: f32,
        presence: f32,
    },
    Temp(f32),
    TopK(usize),
    TopP { p: f32, min_keep: usize },
    Dist,
    Greedy,
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Self::Penalties { .. } => "penalties",
            Self::Temp(_) => "temp",
            Self::TopK(_) => "top_k",
            Self::TopP { .. } => "top_p",
            Self::Dist => "dist",
            Self::Greedy => "greedy",
        }
    }
}

/// Ordered chain of sampling transforms.
#[derive(Debug)]
pub struct SamplerChain {
    stages: Vec<Stage>,
    rng: StdRng,
    /// Accepted tokens, newest last, bounded by the penalty window.
    history: VecDeque<Token>,
    history_cap: usize,
    cands: Vec<Candidate>,
}

impl SamplerChain {
    /// Create an empty chain. `seed` drives the final weighted draw.
    pub fn new(seed: u32) -> Self {
        Self {
            stages: Vec::new(),
            rng: StdRng::seed_from_u64(u64::from(seed)),
            history: VecDeque::new(),
            history_cap: 0,
            cands: Vec::new(),
        }
    }

    //  Sampler primitives

    pub fn add_penalties(&mut self, last_n: i32, repeat: f32, freq: f32, presence: f32) {
        let last_n = last_n.max(0) as usize;
        self.history_cap = self.history_cap.max(last_n);
        self.stages.push(Stage::Penalties {
            last_n,
            repeat,
            freq,
            presence,
        });
    }

    pub fn add_temp(&mut self, t: f32) {
        self.stages.push(Stage::Temp(t));
    }

    pub fn add_top_k(&mut self, k: i32) {
        self.stages.push(Stage::TopK(k.max(1) as usize));
    }

    pub fn add_top_p(&mut self, p: f32, min_keep: usize) {
        self.stages.push(Stage::TopP {
            p,
            min_keep: min_keep.max(1),
        });
    }

    pub fn add_dist(&mut self) {
        self.stages.push(Stage::Dist);
    }

    pub fn add_greedy(&mut self) {
        self.stages.push(Stage::Greedy);
    }

    /// Stage names in application order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    //  Sampling

    /// Pick the next token from `logits`. Returns `None` only for an empty
    /// distribution.
    ///
    /// Must be followed by [`SamplerChain::accept`] with the returned token.
    pub fn sample(&mut self, logits: &[f32]) -> Option<Token> {
        if logits.is_empty() {
            return None;
        }

        let mut cands = std::mem::take(&mut self.cands);
        cands.clear();
        cands.extend(logits.iter().enumerate().map(|(i, &logit)| Candidate {
            id: i as Token,
            logit,
            p: 0.0,
        }));

        // Whether `cands` is already in descending logit order.
        let mut sorted = false;
        let mut picked = None;
        for i in 0..self.stages.len() {
            let stage = self.stages[i];
            match stage {
                Stage::Penalties {
                    last_n,
                    repeat,
                    freq,
                    presence,
                } => {
                    self.apply_penalties(&mut cands, last_n, repeat, freq, presence);
                    sorted = false;
                }
                Stage::Temp(t) => apply_temp(&mut cands, t),
                Stage::TopK(k) => sorted |= apply_top_k(&mut cands, k),
                Stage::TopP { p, min_keep } => sorted |= apply_top_p(&mut cands, p, min_keep, sorted),
                Stage::Dist => {
                    picked = Some(self.draw(&mut cands, sorted));
                    break;
                }
                Stage::Greedy => {
                    picked = Some(argmax(&cands));
                    break;
                }
            }
        }

        // A chain without a terminal stage behaves greedily.
        let token = picked.unwrap_or_else(|| argmax(&cands));
        self.cands = cands;
        Some(token)
    }

    /// Record `token` as chosen so stateful stages see it.
    pub fn accept(&mut self, token: Token) {
        if self.history_cap == 0 {
            return;
        }
        if self.history.len() == self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(token);
    }

    fn apply_penalties(
        &self,
        cands: &mut [Candidate],
        last_n: usize,
        repeat: f32,
        freq: f32,
        presence: f32,
    ) {
        if last_n == 0 || self.history.is_empty() {
            return;
        }
        let skip = self.history.len().saturating_sub(last_n);
        let window: Vec<Token> = self.history.iter().skip(skip).copied().collect();

        for c in cands.iter_mut() {
            let count = window.iter().filter(|&&t| t == c.id).count();
            if count == 0 {
                continue;
            }
            if c.logit > 0.0 {
                c.logit /= repeat;
            } else {
                c.logit *= repeat;
            }
            c.logit -= count as f32 * freq + presence;
        }
    }

    fn draw(&mut self, cands: &mut [Candidate], sorted: bool) -> Token {
        softmax(cands, sorted);
        let cands: &[Candidate] = cands;
        let r: f32 = self.rng.random();
        let mut cum = 0.0;
        for c in cands.iter() {
            cum += c.p;
            if r < cum {
                return c.id;
            }
        }
        // Rounding left `cum` just below 1.0: fall back to the last
        // candidate with any mass.
        cands
            .iter()
            .rev()
            .find(|c| c.p > 0.0)
            .map_or_else(|| argmax(cands), |c| c.id)
    }
}

//  Transforms

fn apply_temp(cands: &mut [Candidate], t: f32) {
    for c in cands.iter_mut() {
        c.logit /= t;
    }
}

fn sort_desc(cands: &mut [Candidate]) {
    cands.sort_unstable_by(|a, b| b.logit.total_cmp(&a.logit));
}

/// Keep the `k` highest logits. Returns `true` when it left the
/// candidates sorted descending.
fn apply_top_k(cands: &mut Vec<Candidate>, k: usize) -> bool {
    if k == 0 || k >= cands.len() {
        return false;
    }
    // Partition first so only the survivors get sorted.
    cands.select_nth_unstable_by(k - 1, |a, b| b.logit.total_cmp(&a.logit));
    cands.truncate(k);
    sort_desc(cands);
    true
}

/// Keep the smallest prefix whose cumulative probability reaches `p`.
/// Returns `true` when it left the candidates sorted descending.
fn apply_top_p(cands: &mut Vec<Candidate>, p: f32, min_keep: usize, sorted: bool) -> bool {
    if p >= 1.0 {
        return false;
    }
    softmax(cands, sorted);
    let mut cum = 0.0;
    let mut keep = cands.len();
    for (i, c) in cands.iter().enumerate() {
        cum += c.p;
        if cum >= p && i + 1 >= min_keep {
            keep = i + 1;
            break;
        }
    }
    cands.truncate(keep);
    true
}

/// Sort descending unless `sorted`, then fill in normalized probabilities.
fn softmax(cands: &mut [Candidate], sorted: bool) {
    if !sorted {
        sort_desc(cands);
    }
    let Some(max) = cands.first().map(|c| c.logit) else {
        return;
    };
    if !max.is_finite() {
        let uniform = 1.0 / cands.len() as f32;
        cands.iter_mut().for_each(|c| c.p = uniform);
        return;
    }
    let mut sum = 0.0;
    for c in cands.iter_mut() {
        c.p = (c.logit - max).exp();
        sum += c.p;
    }
    for c in cands.iter_mut() {
        c.p /= sum;
    }
}

fn argmax(cands: &[Candidate]) -> Token {
    cands
        .iter()
        .max_by(|a, b| a.logit.total_cmp(&b.logit))
        .map(|c| c.id)
        .unwrap_or(0)
}

//  SamplingConfig

/// Per-request sampling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Number of recent tokens the repetition penalty looks at.
    #[serde(default = "default_penalty_last_n")]
    pub penalty_last_n: i32,
    /// 1.0 disables the penalty.
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    /// `<= 0` switches to greedy decoding.
    #[serde(default = "default_temp")]
    pub temperature: f32,
    /// `<= 0` disables top-k.
    #[serde(default = "default_top_k")]
    pub top_k: i32,
    /// `>= 1` disables top-p.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_seed")]
    pub seed: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_penalty_last_n() -> i32 {
    64
}
fn default_repeat_penalty() -> f32 {
    1.1
}
fn default_temp() -> f32 {
    0.8
}
fn default_top_k() -> i32 {
    40
}
fn default_top_p() -> f32 {
    0.95
}
fn default_seed() -> u32 {
    1234
}
fn default_max_tokens() -> u32 {
    256
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            penalty_last_n: default_penalty_last_n(),
            repeat_penalty: default_repeat_penalty(),
            temperature: default_temp(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            seed: default_seed(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl SamplingConfig {
    /// Build a ready-to-use [`SamplerChain`]:
    /// penalties → temperature → top-k → top-p → draw.
    pub fn to_chain(&self) -> SamplerChain {
        let mut chain = SamplerChain::new(self.seed);

        if self.repeat_penalty != 1.0 && self.penalty_last_n != 0 {
            chain.add_penalties(self.penalty_last_n, self.repeat_penalty, 0.0, 0.0);
        }

        if self.temperature > 0.0 {
            chain.add_temp(self.temperature);
            if self.top_k > 0 {
                chain.add_top_k(self.top_k);
            }
            if self.top_p < 1.0 {
                chain.add_top_p(self.top_p, 1);
            }
            chain.add_dist();
        } else {
            chain.add_greedy();
        }

        chain
    }
}
