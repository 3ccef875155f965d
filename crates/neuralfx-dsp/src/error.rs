//! Error types for model loading.
//!
//! Only setup paths return these. Once a model is built, `step`/`forward`
//! and block processing are infallible.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The weight document is unusable: unparsable, missing a key, or carrying a
/// tensor whose shape disagrees with the topology.
#[derive(Debug, Error)]
pub enum MalformedModelError {
    #[error("missing weight key `{key}`")]
    MissingKey { key: String },

    #[error("tensor `{key}` has shape {found:?}, expected {expected:?}")]
    Shape {
        key: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("tensor `{key}` contains a non-numeric value")]
    NotNumeric { key: String },

    #[error("tensor `{key}` is ragged (rows of unequal length)")]
    Ragged { key: String },

    #[error("weight document is not a JSON object")]
    NotAnObject,

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The weights are well-formed but describe a different network shape than
/// the one the caller configured.
#[derive(Debug, Error)]
#[error("topology mismatch: {what} is {found} in the weights, configured {expected}")]
pub struct TopologyMismatchError {
    pub what: &'static str,
    pub expected: usize,
    pub found: usize,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Malformed(#[from] MalformedModelError),

    #[error(transparent)]
    TopologyMismatch(#[from] TopologyMismatchError),

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("a model swap is already pending")]
    SwapBusy,

    #[error("stream processor dropped; model swap has no receiver")]
    SwapDisconnected,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(MalformedModelError::Json(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Malformed(MalformedModelError::Io(e))
    }
}
