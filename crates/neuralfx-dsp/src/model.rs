//! Streaming inference model: N stacked LSTM layers followed by a dense
//! projection, evaluated one sample at a time.
//!
//! One `InferenceModel` per audio channel. Weights are shared (`Arc`);
//! recurrent state and scratch buffers are owned, so channels evolve
//! independently and `step` never allocates.

use std::sync::Arc;

use crate::dense::DenseLayer;
use crate::error::{Result, TopologyMismatchError};
use crate::lstm::RecurrentCell;
use crate::weights::{Topology, WeightBlob};

/// How a per-step input vector is assembled from the audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// `[sample]`
    Signal,
    /// `[sample, control]`
    SignalAndControl,
}

impl InputLayout {
    /// Layout for a topology, or a mismatch error if the model expects an
    /// input vector the stream cannot supply.
    pub fn for_topology(topology: &Topology) -> Result<Self> {
        match topology.input_size {
            1 => Ok(Self::Signal),
            2 => Ok(Self::SignalAndControl),
            found => Err(TopologyMismatchError {
                what: "input size (stream supplies 1 or 2)",
                expected: 2,
                found,
            }
            .into()),
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Self::Signal => 1,
            Self::SignalAndControl => 2,
        }
    }
}

#[derive(Clone)]
pub struct InferenceModel {
    blob: Arc<WeightBlob>,
    layout: InputLayout,
    cells: Vec<RecurrentCell>,
    dense: DenseLayer,
    output: Vec<f32>,
}

impl InferenceModel {
    /// Build a model with zeroed state. Fails if the input arity of the
    /// weights cannot be fed from an audio stream.
    pub fn new(blob: Arc<WeightBlob>) -> Result<Self> {
        let layout = InputLayout::for_topology(blob.topology())?;
        let cells = blob
            .layers()
            .iter()
            .map(|w| RecurrentCell::new(Arc::clone(w)))
            .collect();
        let dense = DenseLayer::new(Arc::clone(blob.dense()));
        let output = vec![0.0; blob.topology().output_size];
        Ok(Self {
            blob,
            layout,
            cells,
            dense,
            output,
        })
    }

    pub fn topology(&self) -> &Topology {
        self.blob.topology()
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn weights(&self) -> &Arc<WeightBlob> {
        &self.blob
    }

    /// Run one time step on a raw input vector of `topology().input_size`.
    #[inline]
    pub fn forward(&mut self, input: &[f32]) -> &[f32] {
        let mut x: &[f32] = input;
        for cell in self.cells.iter_mut() {
            cell.step(x);
            let cell: &RecurrentCell = cell;
            x = cell.hidden();
        }
        self.dense.forward(x, &mut self.output);
        &self.output
    }

    /// Run one step on an audio sample, appending the control value when
    /// the model was trained with one. Returns the first output.
    #[inline]
    pub fn step(&mut self, sample: f32, control: f32) -> f32 {
        let input = [sample, control];
        let n = self.layout.arity();
        self.forward(&input[..n])[0]
    }

    /// Zero the recurrent state of every layer.
    pub fn reset(&mut self) {
        for cell in &mut self.cells {
            cell.reset();
        }
    }

    /// Offline pass over a whole buffer from a fresh state. Allocates; for
    /// tooling and tests, not the audio thread.
    pub fn render(&mut self, input: &[f32], control: f32) -> Vec<f32> {
        self.reset();
        input.iter().map(|&x| self.step(x, control)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{AMP_DRIVE_JSON, uniform_doc};
    use crate::weights::LoaderConfig;
    use approx::assert_abs_diff_eq;

    fn model(topology: Topology, w: f32, b: f32) -> InferenceModel {
        let doc = uniform_doc(topology, w, b);
        let blob = WeightBlob::load(&doc, &topology, &LoaderConfig::default()).unwrap();
        InferenceModel::new(Arc::new(blob)).unwrap()
    }

    #[test]
    fn test_zero_weights_zero_output() {
        let mut m = model(Topology::new(2, 8, 1), 0.0, 0.0);
        for x in [0.3, -1.0, 5.0] {
            assert_eq!(m.step(x, 0.5), 0.0);
        }
    }

    #[test]
    fn test_hand_computed_trace() {
        // One hidden unit, all weights 1, biases 0:
        //   z = x + h, c' = σ(z)c + σ(z)tanh(z), h' = σ(z)tanh(c'), y = h'
        let mut m = model(Topology::new(1, 1, 1), 1.0, 0.0);
        let inputs = [1.0, 0.5, -0.5, 0.0, 0.25];
        let expected = [0.369606353, 0.500046868, 0.208171260, 0.189466364, 0.265945251];
        for (x, want) in inputs.iter().zip(expected) {
            let y = m.step(*x, 0.0);
            assert_abs_diff_eq!(y, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_reset_then_step_is_deterministic() {
        let mut m = model(Topology::new(2, 4, 1), 0.3, -0.1);
        m.reset();
        let a = m.step(0.42, 0.7);
        for _ in 0..50 {
            m.step(0.9, 0.1);
        }
        m.reset();
        let b = m.step(0.42, 0.7);
        assert_eq!(a.to_bits(), b.to_bits(), "reset must restore exact state");
    }

    #[test]
    fn test_state_carries_between_steps() {
        let mut m = model(Topology::new(1, 2, 1), 0.5, 0.0);
        let first = m.step(0.8, 0.0);
        let second = m.step(0.8, 0.0);
        assert_ne!(first, second, "recurrent state should change the output");
    }

    #[test]
    fn test_control_ignored_for_signal_only_models() {
        let mut a = model(Topology::new(1, 3, 1), 0.4, 0.0);
        let mut b = model(Topology::new(1, 3, 1), 0.4, 0.0);
        assert_eq!(a.layout(), InputLayout::Signal);
        assert_eq!(a.step(0.5, 0.0), b.step(0.5, 1.0));
    }

    #[test]
    fn test_control_changes_output() {
        let mut m = model(Topology::new(2, 3, 1), 0.4, 0.0);
        let lo = m.step(0.5, 0.0);
        m.reset();
        let hi = m.step(0.5, 1.0);
        assert_ne!(lo, hi);
    }

    #[test]
    fn test_stacked_layers() {
        let topo = Topology::new(2, 3, 1).with_layers(2);
        let mut stacked = model(topo, 0.4, 0.0);
        let mut single = model(Topology::new(2, 3, 1), 0.4, 0.0);
        let y2 = stacked.step(0.5, 0.5);
        let y1 = single.step(0.5, 0.5);
        assert!(y2.is_finite());
        assert_ne!(y1, y2, "second layer should transform the first");
    }

    #[test]
    fn test_wide_input_rejected() {
        let topo = Topology::new(3, 2, 1);
        let blob = WeightBlob::load(&uniform_doc(topo, 0.1, 0.0), &topo, &LoaderConfig::default())
            .unwrap();
        assert!(InferenceModel::new(Arc::new(blob)).is_err());
    }

    #[test]
    fn test_render_resets_first() {
        let mut m = model(Topology::new(2, 4, 1), 0.3, 0.05);
        let input: Vec<f32> = (0..64).map(|i| (i as f32 * 0.1).sin()).collect();
        let a = m.render(&input, 0.5);
        let b = m.render(&input, 0.5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_amp_drive_model() {
        let blob = WeightBlob::parse_inferred(AMP_DRIVE_JSON, &LoaderConfig::default()).unwrap();
        assert_eq!(*blob.topology(), Topology::new(2, 2, 1));
        let mut m = InferenceModel::new(Arc::new(blob)).unwrap();

        // Silence in, silence out.
        assert_eq!(m.step(0.0, 0.5), 0.0);

        // Odd-symmetric from a fresh state.
        m.reset();
        let pos = m.step(0.5, 0.5);
        m.reset();
        let neg = m.step(-0.5, 0.5);
        assert_abs_diff_eq!(pos, -neg, epsilon = 1e-6);

        // More control, more small-signal gain.
        m.reset();
        let clean = m.step(0.1, 0.0);
        m.reset();
        let driven = m.step(0.1, 1.0);
        assert!(driven > clean * 2.0, "drive {driven} vs clean {clean}");

        // Bounded for large input.
        m.reset();
        for _ in 0..100 {
            assert!(m.step(10.0, 1.0).abs() < 1.8);
        }
    }
}
