//! NeuralFX DSP library: streaming LSTM inference and a Markov-chain note
//! generator.
//!
//! Pure DSP and model code with no audio framework dependencies. Host
//! adapters live in the plugin crates.

pub mod error;

// Model weights and the per-sample network
pub mod dense;
pub mod lstm;
pub mod model;
pub mod weights;

// Block processing and model hand-off
pub mod stream;
pub mod swap;

// MIDI generator
pub mod markov;
pub mod markov_midi;
pub mod scheduler;

#[cfg(test)]
mod fixtures;

pub use error::{Error, MalformedModelError, Result, TopologyMismatchError};
pub use model::{InferenceModel, InputLayout};
pub use stream::{
    AudioEffect, EngineState, ModelBank, SharedControls, StreamConfig, StreamProcessor,
};
pub use swap::{ModelSender, ModelSlot};
pub use weights::{Activation, LoaderConfig, Topology, WeightBlob};
