//! Weight store: parses a PyTorch-style JSON state dict into typed per-layer
//! parameter blocks and validates every shape against the topology.
//!
//! Key naming contract with the training export (prefixes come from
//! [`LoaderConfig`], defaults shown):
//!
//! | key | shape |
//! |---|---|
//! | `lstm.weight_ih_l{k}` | `[4H, in_k]` (`in_0 = I`, `in_k = H` for k > 0) |
//! | `lstm.weight_hh_l{k}` | `[4H, H]` |
//! | `lstm.bias_ih_l{k}` + `lstm.bias_hh_l{k}` | `[4H]` each, summed at load |
//! | `lstm.bias_l{k}` (alternative, pre-summed) | `[H, 4]`, `[4, H]` or `[4H]` |
//! | `dense.weight` | `[O, H]` |
//! | `dense.bias` | `[O]` |
//!
//! Gate rows are ordered input, forget, cell-candidate, output (PyTorch's
//! `i, f, g, o`). Tensors are nested arrays, row-major.
//!
//! Loading is whole-document: nothing is exposed until every tensor has been
//! validated. Never call any of this from the audio thread.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, MalformedModelError, Result, TopologyMismatchError};

/// Number of LSTM gates; the recurrent weight matrices stack them row-wise.
pub const NUM_GATES: usize = 4;

/// Runtime network shape. Validated once at load; everything downstream
/// pre-sizes its buffers from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    pub layer_count: usize,
}

impl Topology {
    pub fn new(input_size: usize, hidden_size: usize, output_size: usize) -> Self {
        Self {
            input_size,
            hidden_size,
            output_size,
            layer_count: 1,
        }
    }

    pub fn with_layers(mut self, layer_count: usize) -> Self {
        self.layer_count = layer_count;
        self
    }

    /// Rows of the stacked gate matrices (4 * hidden).
    pub fn gate_size(&self) -> usize {
        NUM_GATES * self.hidden_size
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0
            || self.hidden_size == 0
            || self.output_size == 0
            || self.layer_count == 0
        {
            return Err(Error::InvalidTopology(format!(
                "all dimensions must be non-zero: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Derive the topology implied by a weight document.
    ///
    /// hidden = rows(weight_ih_l0) / 4, input = cols(weight_ih_l0),
    /// output = rows(dense.weight), layers = count of consecutive
    /// `weight_ih_l{k}` keys.
    pub fn infer(doc: &Value, config: &LoaderConfig) -> Result<Self> {
        let obj = as_object(doc)?;

        let key = config.weight_ih_key(0);
        let w_ih = tensor(obj, &key)?;
        let [rows, input_size] = matrix_dims(&key, &w_ih)?;
        if rows == 0 || rows % NUM_GATES != 0 {
            return Err(MalformedModelError::Shape {
                key,
                expected: vec![NUM_GATES, input_size],
                found: w_ih.shape,
            }
            .into());
        }
        let hidden_size = rows / NUM_GATES;

        let mut layer_count = 1;
        while obj.contains_key(&config.weight_ih_key(layer_count)) {
            layer_count += 1;
        }

        let key = config.dense_weight_key();
        let dense = tensor(obj, &key)?;
        let [output_size, _] = matrix_dims(&key, &dense)?;

        let topology = Self {
            input_size,
            hidden_size,
            output_size,
            layer_count,
        };
        topology.validate()?;
        tracing::debug!(?topology, "inferred topology from weight document");
        Ok(topology)
    }
}

/// Output nonlinearity of the dense layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Identity,
    Tanh,
    Sigmoid,
    Relu,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Identity => x,
            Self::Tanh => x.tanh(),
            Self::Sigmoid => sigmoid(x),
            Self::Relu => x.max(0.0),
        }
    }
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Key naming used by the loader. Must agree with the training export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub lstm_prefix: String,
    pub dense_prefix: String,
    pub dense_activation: Activation,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            lstm_prefix: "lstm.".into(),
            dense_prefix: "dense.".into(),
            dense_activation: Activation::Identity,
        }
    }
}

impl LoaderConfig {
    pub fn weight_ih_key(&self, layer: usize) -> String {
        format!("{}weight_ih_l{layer}", self.lstm_prefix)
    }

    pub fn weight_hh_key(&self, layer: usize) -> String {
        format!("{}weight_hh_l{layer}", self.lstm_prefix)
    }

    pub fn bias_ih_key(&self, layer: usize) -> String {
        format!("{}bias_ih_l{layer}", self.lstm_prefix)
    }

    pub fn bias_hh_key(&self, layer: usize) -> String {
        format!("{}bias_hh_l{layer}", self.lstm_prefix)
    }

    pub fn combined_bias_key(&self, layer: usize) -> String {
        format!("{}bias_l{layer}", self.lstm_prefix)
    }

    pub fn dense_weight_key(&self) -> String {
        format!("{}weight", self.dense_prefix)
    }

    pub fn dense_bias_key(&self) -> String {
        format!("{}bias", self.dense_prefix)
    }
}

/// Parameters of one LSTM layer. Matrices are flattened row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct LstmWeights {
    pub input_size: usize,
    pub hidden_size: usize,
    /// `[4H, input_size]`
    pub w_ih: Vec<f32>,
    /// `[4H, H]`
    pub w_hh: Vec<f32>,
    /// `[4H]`, input and hidden biases already summed.
    pub bias: Vec<f32>,
}

/// Parameters of the output projection.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseWeights {
    pub input_size: usize,
    pub output_size: usize,
    /// `[O, input_size]`
    pub weight: Vec<f32>,
    /// `[O]`
    pub bias: Vec<f32>,
    pub activation: Activation,
}

/// Immutable, validated weights for a whole network. Shared read-only
/// (behind `Arc`) by every per-channel model built from the same file.
#[derive(Debug, Clone)]
pub struct WeightBlob {
    topology: Topology,
    layers: Vec<Arc<LstmWeights>>,
    dense: Arc<DenseWeights>,
}

impl WeightBlob {
    /// Build from an already-parsed document, validating against `topology`.
    pub fn load(doc: &Value, topology: &Topology, config: &LoaderConfig) -> Result<Self> {
        topology.validate()?;
        let obj = as_object(doc)?;
        let gates = topology.gate_size();
        let h = topology.hidden_size;

        let mut layers = Vec::with_capacity(topology.layer_count);
        for layer in 0..topology.layer_count {
            let input_size = if layer == 0 { topology.input_size } else { h };

            let key = config.weight_ih_key(layer);
            let w_ih = tensor(obj, &key)?;
            if layer == 0 {
                check_input_arity(&w_ih, gates, topology.input_size)?;
            }
            let w_ih = expect_shape(&key, w_ih, &[gates, input_size])?;

            let key = config.weight_hh_key(layer);
            let w_hh = expect_shape(&key, tensor(obj, &key)?, &[gates, h])?;

            let bias = load_lstm_bias(obj, config, layer, h)?;

            layers.push(Arc::new(LstmWeights {
                input_size,
                hidden_size: h,
                w_ih,
                w_hh,
                bias,
            }));
        }

        let key = config.dense_weight_key();
        let weight = expect_shape(&key, tensor(obj, &key)?, &[topology.output_size, h])?;
        let key = config.dense_bias_key();
        let bias = expect_shape(&key, tensor(obj, &key)?, &[topology.output_size])?;

        let dense = Arc::new(DenseWeights {
            input_size: h,
            output_size: topology.output_size,
            weight,
            bias,
            activation: config.dense_activation,
        });

        tracing::info!(
            input = topology.input_size,
            hidden = topology.hidden_size,
            output = topology.output_size,
            layers = topology.layer_count,
            "loaded LSTM weights"
        );

        Ok(Self {
            topology: *topology,
            layers,
            dense,
        })
    }

    /// Infer the topology from the document, then load.
    pub fn load_inferred(doc: &Value, config: &LoaderConfig) -> Result<Self> {
        let topology = Topology::infer(doc, config)?;
        Self::load(doc, &topology, config)
    }

    pub fn parse(json: &str, topology: &Topology, config: &LoaderConfig) -> Result<Self> {
        let doc: Value = serde_json::from_str(json)?;
        Self::load(&doc, topology, config)
    }

    pub fn parse_inferred(json: &str, config: &LoaderConfig) -> Result<Self> {
        let doc: Value = serde_json::from_str(json)?;
        Self::load_inferred(&doc, config)
    }

    pub fn open(
        path: impl AsRef<Path>,
        topology: &Topology,
        config: &LoaderConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "reading weight file");
        let json = std::fs::read_to_string(path)?;
        Self::parse(&json, topology, config)
    }

    pub fn open_inferred(path: impl AsRef<Path>, config: &LoaderConfig) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "reading weight file");
        let json = std::fs::read_to_string(path)?;
        Self::parse_inferred(&json, config)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn layers(&self) -> &[Arc<LstmWeights>] {
        &self.layers
    }

    pub fn dense(&self) -> &Arc<DenseWeights> {
        &self.dense
    }

    /// Total number of scalar parameters.
    pub fn parameter_count(&self) -> usize {
        let lstm: usize = self
            .layers
            .iter()
            .map(|l| l.w_ih.len() + l.w_hh.len() + l.bias.len())
            .sum();
        lstm + self.dense.weight.len() + self.dense.bias.len()
    }
}

// ── Tensor extraction ───────────────────────────────────────────────────────

struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

fn as_object(doc: &Value) -> std::result::Result<&Map<String, Value>, MalformedModelError> {
    doc.as_object().ok_or(MalformedModelError::NotAnObject)
}

fn tensor(
    obj: &Map<String, Value>,
    key: &str,
) -> std::result::Result<Tensor, MalformedModelError> {
    let value = obj.get(key).ok_or_else(|| MalformedModelError::MissingKey {
        key: key.to_string(),
    })?;
    let mut data = Vec::new();
    let shape = flatten(key, value, &mut data)?;
    Ok(Tensor { shape, data })
}

/// Flatten a nested array row-major, returning its shape.
fn flatten(
    key: &str,
    value: &Value,
    out: &mut Vec<f32>,
) -> std::result::Result<Vec<usize>, MalformedModelError> {
    match value {
        Value::Number(n) => {
            let x = n.as_f64().ok_or_else(|| MalformedModelError::NotNumeric {
                key: key.to_string(),
            })?;
            out.push(x as f32);
            Ok(Vec::new())
        }
        Value::Array(items) => {
            let mut inner: Option<Vec<usize>> = None;
            for item in items {
                let shape = flatten(key, item, out)?;
                match &inner {
                    Some(expected) if *expected != shape => {
                        return Err(MalformedModelError::Ragged {
                            key: key.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => inner = Some(shape),
                }
            }
            let mut shape = vec![items.len()];
            shape.extend(inner.unwrap_or_default());
            Ok(shape)
        }
        _ => Err(MalformedModelError::NotNumeric {
            key: key.to_string(),
        }),
    }
}

fn matrix_dims(key: &str, t: &Tensor) -> std::result::Result<[usize; 2], MalformedModelError> {
    match t.shape.as_slice() {
        &[rows, cols] => Ok([rows, cols]),
        _ => Err(MalformedModelError::Shape {
            key: key.to_string(),
            expected: vec![0, 0],
            found: t.shape.clone(),
        }),
    }
}

fn expect_shape(
    key: &str,
    t: Tensor,
    expected: &[usize],
) -> std::result::Result<Vec<f32>, MalformedModelError> {
    if t.shape != expected {
        return Err(MalformedModelError::Shape {
            key: key.to_string(),
            expected: expected.to_vec(),
            found: t.shape,
        });
    }
    Ok(t.data)
}

/// A correctly-sized gate matrix with the wrong column count is a
/// configuration error (model trained with a different input vector), not a
/// corrupt file.
fn check_input_arity(t: &Tensor, gates: usize, input_size: usize) -> Result<()> {
    if let &[rows, cols] = t.shape.as_slice() {
        if rows == gates && cols != input_size {
            return Err(TopologyMismatchError {
                what: "input size",
                expected: input_size,
                found: cols,
            }
            .into());
        }
    }
    Ok(())
}

fn load_lstm_bias(
    obj: &Map<String, Value>,
    config: &LoaderConfig,
    layer: usize,
    hidden: usize,
) -> std::result::Result<Vec<f32>, MalformedModelError> {
    let gates = NUM_GATES * hidden;
    let ih_key = config.bias_ih_key(layer);
    let hh_key = config.bias_hh_key(layer);
    let combined_key = config.combined_bias_key(layer);

    if !obj.contains_key(&ih_key) && !obj.contains_key(&hh_key) && obj.contains_key(&combined_key)
    {
        let t = tensor(obj, &combined_key)?;
        let shape = t.shape.clone();
        return match shape.as_slice() {
            // One row per hidden unit, one column per gate. A square 4x4
            // tensor is read this way too.
            &[rows, NUM_GATES] if rows == hidden => Ok(gate_major(&t.data, hidden)),
            &[NUM_GATES, _] => expect_shape(&combined_key, t, &[NUM_GATES, hidden]),
            &[_, _] => expect_shape(&combined_key, t, &[hidden, NUM_GATES]),
            _ => expect_shape(&combined_key, t, &[gates]),
        };
    }

    let mut bias = expect_shape(&ih_key, tensor(obj, &ih_key)?, &[gates])?;
    let b_hh = expect_shape(&hh_key, tensor(obj, &hh_key)?, &[gates])?;
    for (b, extra) in bias.iter_mut().zip(&b_hh) {
        *b += extra;
    }
    Ok(bias)
}

/// `[hidden][gate]` row-major to the cell's `[gate][hidden]` layout.
fn gate_major(unit_major: &[f32], hidden: usize) -> Vec<f32> {
    let mut bias = vec![0.0; NUM_GATES * hidden];
    for (j, row) in unit_major.chunks_exact(NUM_GATES).enumerate() {
        for (g, &b) in row.iter().enumerate() {
            bias[g * hidden + j] = b;
        }
    }
    bias
}
