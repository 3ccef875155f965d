//! Per-block driver for the LSTM effect.
//!
//! For every channel, samples are processed in order 0..N-1, each read once
//! and overwritten in place with the model output. The control value and
//! engine state are read once per block from [`SharedControls`], so the
//! control path can write them from any thread without locking.
//!
//! Nothing in `process_block` allocates, locks or fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use atomic_float::AtomicF32;

use crate::error::Result;
use crate::model::InferenceModel;
use crate::swap::{ModelReceiver, ModelSender, ModelSlot, model_swap};
use crate::weights::WeightBlob;

/// Host-supplied stream parameters, known before streaming starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    pub sample_rate: f32,
    pub max_block_size: usize,
    pub channels: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            max_block_size: 512,
            channels: 2,
        }
    }
}

/// The narrow lifecycle a host adapter drives.
pub trait AudioEffect {
    /// Size buffers and clear state. Called off the audio thread.
    fn prepare(&mut self, config: &StreamConfig);
    /// Process one block in place. Buffers may be any length, including 0.
    fn process_block(&mut self, channels: &mut [&mut [f32]]);
    /// Clear recurrent state. Only between blocks.
    fn reset(&mut self);
}

// ── Shared controls ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Bypassed = 0,
    Active = 1,
}

impl EngineState {
    fn from_u8(v: u8) -> Self {
        if v == Self::Bypassed as u8 {
            Self::Bypassed
        } else {
            Self::Active
        }
    }
}

/// Scalars written by the control path and read once per block by the
/// audio path. Single writer, single reader; a stale read lasts at most one
/// block.
#[derive(Debug)]
pub struct SharedControls {
    control: AtomicF32,
    state: AtomicU8,
    /// When bypassed, run the alternate model (if installed) instead of
    /// passing audio through.
    alternate_on_bypass: AtomicBool,
}

impl Default for SharedControls {
    fn default() -> Self {
        Self {
            control: AtomicF32::new(0.5),
            state: AtomicU8::new(EngineState::Active as u8),
            alternate_on_bypass: AtomicBool::new(false),
        }
    }
}

impl SharedControls {
    pub fn control(&self) -> f32 {
        self.control.load(Ordering::Relaxed)
    }

    /// Clamped to [0, 1].
    pub fn set_control(&self, value: f32) {
        let v = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        self.control.store(v, Ordering::Relaxed);
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn set_bypassed(&self, bypassed: bool) {
        self.set_state(if bypassed {
            EngineState::Bypassed
        } else {
            EngineState::Active
        });
    }

    pub fn alternate_on_bypass(&self) -> bool {
        self.alternate_on_bypass.load(Ordering::Relaxed)
    }

    pub fn set_alternate_on_bypass(&self, enabled: bool) {
        self.alternate_on_bypass.store(enabled, Ordering::Relaxed);
    }
}

// ── Model bank ──────────────────────────────────────────────────────────────

/// One model per channel, all sharing the same weights.
#[derive(Clone)]
pub struct ModelBank {
    template: InferenceModel,
    models: Vec<InferenceModel>,
}

impl ModelBank {
    /// Allocates `channels` fresh models. Not for the audio thread.
    pub fn new(template: InferenceModel, channels: usize) -> Self {
        let mut bank = Self {
            template,
            models: Vec::new(),
        };
        bank.resize(channels);
        bank
    }

    pub fn from_weights(blob: Arc<WeightBlob>, channels: usize) -> Result<Self> {
        Ok(Self::new(InferenceModel::new(blob)?, channels))
    }

    pub fn resize(&mut self, channels: usize) {
        let mut template = self.template.clone();
        template.reset();
        self.models = vec![template; channels];
    }

    pub fn channels(&self) -> usize {
        self.models.len()
    }

    pub fn weights(&self) -> &Arc<WeightBlob> {
        self.template.weights()
    }

    pub fn reset(&mut self) {
        for m in &mut self.models {
            m.reset();
        }
    }

    /// Channels beyond the bank's size are left untouched.
    #[inline]
    pub fn process(&mut self, channels: &mut [&mut [f32]], control: f32) {
        for (model, buf) in self.models.iter_mut().zip(channels.iter_mut()) {
            for s in buf.iter_mut() {
                *s = model.step(*s, control);
            }
        }
    }
}

// ── Transport ───────────────────────────────────────────────────────────────

/// Detects non-contiguous play-head jumps from the host's sample position.
///
/// A stopped host keeps reporting the same position every block. That is a
/// parked play-head, not a seek.
#[derive(Debug, Default, Clone, Copy)]
struct Transport {
    start: Option<i64>,
    expected: Option<i64>,
}

impl Transport {
    /// Returns true when `position` is neither where the previous block
    /// ended nor where it started.
    fn observe(&mut self, position: Option<i64>, len: usize) -> bool {
        match position {
            Some(pos) => {
                let parked = self.start == Some(pos);
                let jumped = !parked && self.expected.is_some_and(|e| e != pos);
                self.start = Some(pos);
                self.expected = Some(pos.saturating_add(len as i64));
                jumped
            }
            None => {
                self.start = None;
                self.expected = None;
                false
            }
        }
    }
}

// ── Processor ───────────────────────────────────────────────────────────────

pub struct StreamProcessor {
    // Boxed so swaps exchange pointers instead of moving banks in and out
    // of heap slots on the audio thread.
    primary: Box<ModelBank>,
    alternate: Option<Box<ModelBank>>,
    controls: Arc<SharedControls>,
    config: StreamConfig,
    /// Shared with swap senders so they build banks of the right width.
    channels: Arc<AtomicUsize>,
    swaps: Option<ModelReceiver>,
    transport: Transport,
    last_state: EngineState,
    last_ran_alternate: bool,
}

impl StreamProcessor {
    /// Validates that the weights can be driven from an audio stream.
    pub fn new(blob: Arc<WeightBlob>) -> Result<Self> {
        let config = StreamConfig::default();
        let primary = Box::new(ModelBank::from_weights(blob, config.channels)?);
        Ok(Self {
            primary,
            alternate: None,
            controls: Arc::new(SharedControls::default()),
            channels: Arc::new(AtomicUsize::new(config.channels)),
            config,
            swaps: None,
            transport: Transport::default(),
            last_state: EngineState::Active,
            last_ran_alternate: false,
        })
    }

    /// Install the model engaged while bypassed (see
    /// [`SharedControls::set_alternate_on_bypass`]). Setup only.
    pub fn set_alternate(&mut self, blob: Arc<WeightBlob>) -> Result<()> {
        self.alternate = Some(Box::new(ModelBank::from_weights(
            blob,
            self.config.channels,
        )?));
        Ok(())
    }

    pub fn controls(&self) -> Arc<SharedControls> {
        Arc::clone(&self.controls)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn primary(&self) -> &ModelBank {
        &self.primary
    }

    pub fn alternate(&self) -> Option<&ModelBank> {
        self.alternate.as_deref()
    }

    /// Control-thread handle for replacing models while streaming. A new
    /// handle disconnects the previous one.
    pub fn swap_handle(&mut self) -> ModelSender {
        let (tx, rx) = model_swap(Arc::clone(&self.channels));
        self.swaps = Some(rx);
        tx
    }

    /// Process a block, first resetting state if the host play-head jumped.
    pub fn process_block_at(&mut self, channels: &mut [&mut [f32]], position: Option<i64>) {
        let len = channels.first().map_or(0, |c| c.len());
        if self.transport.observe(position, len) {
            self.reset_state();
        }
        self.process(channels);
    }

    fn install_pending(&mut self) {
        let Some(swaps) = self.swaps.as_mut() else {
            return;
        };
        let Some(request) = swaps.try_take() else {
            return;
        };

        let mut bank = request.bank;
        if bank.channels() != self.config.channels {
            // Built against a stale layout.
            swaps.retire(bank);
            return;
        }
        bank.reset();

        let old = match request.slot {
            ModelSlot::Primary => Some(std::mem::replace(&mut self.primary, bank)),
            ModelSlot::Alternate => self.alternate.replace(bank),
        };
        if let Some(old) = old {
            swaps.retire(old);
        }
    }

    fn process(&mut self, channels: &mut [&mut [f32]]) {
        self.install_pending();

        let control = self.controls.control();
        let state = self.controls.state();
        let use_alternate = state == EngineState::Bypassed
            && self.controls.alternate_on_bypass()
            && self.alternate.is_some();

        // The path being re-engaged starts from clean state.
        if state != self.last_state || use_alternate != self.last_ran_alternate {
            match (state, use_alternate) {
                (EngineState::Active, _) => self.primary.reset(),
                (EngineState::Bypassed, true) => {
                    if let Some(alt) = self.alternate.as_mut() {
                        alt.reset();
                    }
                }
                (EngineState::Bypassed, false) => {}
            }
            self.last_state = state;
            self.last_ran_alternate = use_alternate;
        }

        match state {
            EngineState::Active => self.primary.process(channels, control),
            EngineState::Bypassed => {
                if use_alternate {
                    if let Some(alt) = self.alternate.as_mut() {
                        alt.process(channels, control);
                    }
                }
            }
        }
    }

    fn reset_state(&mut self) {
        self.primary.reset();
        if let Some(alt) = self.alternate.as_mut() {
            alt.reset();
        }
    }
}

impl AudioEffect for StreamProcessor {
    fn prepare(&mut self, config: &StreamConfig) {
        self.config = *config;
        self.channels.store(config.channels, Ordering::Release);
        self.primary.resize(config.channels);
        if let Some(alt) = self.alternate.as_mut() {
            alt.resize(config.channels);
        }
        self.transport = Transport::default();
        tracing::debug!(
            sample_rate = config.sample_rate,
            max_block = config.max_block_size,
            channels = config.channels,
            "prepared stream processor"
        );
    }

    fn process_block(&mut self, channels: &mut [&mut [f32]]) {
        self.process(channels);
    }

    fn reset(&mut self) {
        self.reset_state();
        self.transport = Transport::default();
    }
}
