//! Variable-order Markov chain over discrete event tokens.
//!
//! `put_event` records which token followed the current history window
//! (every suffix of it, orders 1..=k) and then slides the window.
//! `get_event` samples a successor weighted by observed counts, backing off
//! from the longest known context to shorter ones, and finally to a fallback
//! token when nothing matches. The transition table only grows until
//! [`MarkovChain::clear`].
//!
//! History keys are the window's tokens joined with [`KEY_DELIMITER`], so
//! equal histories always land in the same bucket. Tokens containing the
//! delimiter would alias multi-token keys and are refused.

use std::collections::{BTreeMap, HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const KEY_DELIMITER: char = '-';

/// Returned when no context has been observed. Means "play nothing".
pub const REST_TOKEN: &str = "rest";

/// Successor counts for one history key. Ordered so sampling with a seeded
/// RNG is reproducible.
pub type Transitions = BTreeMap<String, u64>;

pub struct MarkovChain {
    order: usize,
    table: HashMap<String, Transitions>,
    history: VecDeque<String>,
    fallback: String,
    rng: StdRng,
    /// Reused buffer for building lookup keys.
    key: String,
}

impl MarkovChain {
    /// First-order chain seeded from OS entropy.
    pub fn new() -> Self {
        Self::with_order(1)
    }

    pub fn with_order(order: usize) -> Self {
        Self::build(order, StdRng::from_entropy())
    }

    /// Reproducible sampling, for tests and offline tools.
    pub fn with_seed(order: usize, seed: u64) -> Self {
        Self::build(order, StdRng::seed_from_u64(seed))
    }

    fn build(order: usize, rng: StdRng) -> Self {
        let order = order.max(1);
        Self {
            order,
            table: HashMap::new(),
            history: VecDeque::with_capacity(order),
            fallback: REST_TOKEN.to_string(),
            rng,
            key: String::new(),
        }
    }

    pub fn with_fallback(mut self, token: impl Into<String>) -> Self {
        self.fallback = token.into();
        self
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Record `token` as following the current history, then append it to
    /// the history window. Tokens containing [`KEY_DELIMITER`] are ignored.
    pub fn put_event(&mut self, token: &str) {
        if !is_valid_token(token) {
            return;
        }
        let len = self.history.len();
        for n in 1..=len {
            fill_key(&mut self.key, self.history.range(len - n..));
            let successors = self.table.entry(self.key.clone()).or_default();
            *successors.entry(token.to_string()).or_insert(0) += 1;
        }
        self.push_history(token.to_string());
    }

    /// Sample the next token for the current history. With
    /// `consume_history`, the sampled token joins the history window, so
    /// repeated calls walk the chain; otherwise history is untouched.
    pub fn get_event(&mut self, consume_history: bool) -> String {
        let token = self.sample();
        if consume_history && token != self.fallback {
            self.push_history(token.clone());
        }
        token
    }

    /// Push `token` onto the history window without recording a
    /// transition. Used to start a walk from a chosen state.
    pub fn prime(&mut self, token: &str) {
        if is_valid_token(token) {
            self.push_history(token.to_string());
        }
    }

    fn sample(&mut self) -> String {
        let len = self.history.len();
        for n in (1..=len).rev() {
            fill_key(&mut self.key, self.history.range(len - n..));
            if let Some(successors) = self.table.get(self.key.as_str()) {
                if let Some(token) = weighted_pick(successors, &mut self.rng) {
                    return token.to_string();
                }
            }
        }
        self.fallback.clone()
    }

    fn push_history(&mut self, token: String) {
        if self.history.len() == self.order {
            self.history.pop_front();
        }
        self.history.push_back(token);
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    /// Key for the current history window.
    pub fn current_key(&self) -> String {
        history_key(self.history())
    }

    /// Forget the history window; keep what was learned.
    pub fn reset_history(&mut self) {
        self.history.clear();
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        tracing::debug!(states = self.table.len(), "clearing markov chain");
        self.table.clear();
        self.history.clear();
    }

    /// Number of distinct history keys observed.
    pub fn state_count(&self) -> usize {
        self.table.len()
    }

    pub fn transitions(&self, key: &str) -> Option<&Transitions> {
        self.table.get(key)
    }
}

impl Default for MarkovChain {
    fn default() -> Self {
        Self::new()
    }
}

fn is_valid_token(token: &str) -> bool {
    if token.contains(KEY_DELIMITER) {
        tracing::warn!(token, "ignoring markov token containing the key delimiter");
        return false;
    }
    true
}

/// Canonical key for a sequence of tokens.
pub fn history_key<'a>(tokens: impl IntoIterator<Item = &'a str>) -> String {
    let mut key = String::new();
    fill_key(&mut key, tokens);
    key
}

/// Inverse of [`history_key`].
pub fn split_history_key(key: &str) -> Vec<&str> {
    if key.is_empty() {
        return Vec::new();
    }
    key.split(KEY_DELIMITER).collect()
}

fn fill_key<S: AsRef<str>>(key: &mut String, tokens: impl IntoIterator<Item = S>) {
    key.clear();
    for (i, t) in tokens.into_iter().enumerate() {
        if i > 0 {
            key.push(KEY_DELIMITER);
        }
        key.push_str(t.as_ref());
    }
}

/// Pick a key with probability proportional to its count.
fn weighted_pick<'a>(successors: &'a Transitions, rng: &mut StdRng) -> Option<&'a str> {
    let total: u64 = successors.values().sum();
    if total == 0 {
        return None;
    }
    let mut pick = rng.gen_range(0..total);
    for (token, &count) in successors {
        if pick < count {
            return Some(token);
        }
        pick -= count;
    }
    None
}
