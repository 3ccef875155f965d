//! Weight documents for tests.

use serde_json::{Map, Value};

use crate::weights::Topology;

fn matrix(rows: usize, cols: usize, v: f32) -> Value {
    Value::Array((0..rows).map(|_| vec_of(cols, v)).collect())
}

fn vec_of(n: usize, v: f32) -> Value {
    Value::Array((0..n).map(|_| Value::from(v as f64)).collect())
}

/// PyTorch-style state dict with every weight `w` and every bias `b`
/// (both `bias_ih` and `bias_hh` carry `b`, so the combined bias is `2b`).
pub fn uniform_doc(topology: Topology, w: f32, b: f32) -> Value {
    let gates = topology.gate_size();
    let h = topology.hidden_size;
    let mut obj = Map::new();
    for layer in 0..topology.layer_count {
        let input = if layer == 0 { topology.input_size } else { h };
        obj.insert(format!("lstm.weight_ih_l{layer}"), matrix(gates, input, w));
        obj.insert(format!("lstm.weight_hh_l{layer}"), matrix(gates, h, w));
        obj.insert(format!("lstm.bias_ih_l{layer}"), vec_of(gates, b));
        obj.insert(format!("lstm.bias_hh_l{layer}"), vec_of(gates, b));
    }
    obj.insert("dense.weight".into(), matrix(topology.output_size, h, w));
    obj.insert("dense.bias".into(), vec_of(topology.output_size, b));
    Value::Object(obj)
}

/// The bundled drive model, also shipped by the effect plugin.
pub const AMP_DRIVE_JSON: &str = include_str!("../../../models/amp-drive.json");
