//! Gated recurrent layer (LSTM), evaluated one time step at a time.
//!
//! Per step, with state (h, c) and input x:
//!   z  = W_ih·x + W_hh·h + b          (4H, gates i | f | g | o)
//!   c' = σ(z_f) ⊙ c + σ(z_i) ⊙ tanh(z_g)
//!   h' = σ(z_o) ⊙ tanh(c')
//!
//! Runs on the audio thread once per sample: no allocation, no locking.
//! All buffers are sized at construction from the validated weights.

use std::sync::Arc;

use crate::weights::{LstmWeights, sigmoid};

#[derive(Clone)]
pub struct RecurrentCell {
    weights: Arc<LstmWeights>,
    hidden: Vec<f32>,
    cell: Vec<f32>,
    /// Gate pre-activations, 4H.
    gates: Vec<f32>,
}

impl RecurrentCell {
    pub fn new(weights: Arc<LstmWeights>) -> Self {
        let h = weights.hidden_size;
        Self {
            hidden: vec![0.0; h],
            cell: vec![0.0; h],
            gates: vec![0.0; 4 * h],
            weights,
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.weights.hidden_size
    }

    /// Advance one time step. `input` must be `input_size()` long; the
    /// returned slice is the new hidden state.
    #[inline]
    pub fn step(&mut self, input: &[f32]) -> &[f32] {
        debug_assert_eq!(input.len(), self.weights.input_size);

        let w = &*self.weights;
        let n_in = w.input_size;
        let h = w.hidden_size;

        for (r, z) in self.gates.iter_mut().enumerate() {
            let w_ih = &w.w_ih[r * n_in..(r + 1) * n_in];
            let w_hh = &w.w_hh[r * h..(r + 1) * h];
            let mut sum = w.bias[r];
            for (wi, xi) in w_ih.iter().zip(input) {
                sum += wi * xi;
            }
            for (wh, hj) in w_hh.iter().zip(&self.hidden) {
                sum += wh * hj;
            }
            *z = sum;
        }

        let (z_i, rest) = self.gates.split_at(h);
        let (z_f, rest) = rest.split_at(h);
        let (z_g, z_o) = rest.split_at(h);

        for j in 0..h {
            let input_gate = sigmoid(z_i[j]);
            let forget_gate = sigmoid(z_f[j]);
            let candidate = z_g[j].tanh();
            let output_gate = sigmoid(z_o[j]);

            let c = forget_gate * self.cell[j] + input_gate * candidate;
            self.cell[j] = c;
            self.hidden[j] = output_gate * c.tanh();
        }

        &self.hidden
    }

    pub fn hidden(&self) -> &[f32] {
        &self.hidden
    }

    pub fn cell(&self) -> &[f32] {
        &self.cell
    }

    pub fn reset(&mut self) {
        self.hidden.fill(0.0);
        self.cell.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_weights(input: usize, hidden: usize, w: f32, b: f32) -> Arc<LstmWeights> {
        Arc::new(LstmWeights {
            input_size: input,
            hidden_size: hidden,
            w_ih: vec![w; 4 * hidden * input],
            w_hh: vec![w; 4 * hidden * hidden],
            bias: vec![b; 4 * hidden],
        })
    }

    #[test]
    fn test_zero_weights_give_zero_hidden() {
        let mut cell = RecurrentCell::new(uniform_weights(2, 6, 0.0, 0.0));
        for x in [[1.0, 0.5], [-3.0, 0.0], [100.0, -100.0]] {
            let h = cell.step(&x);
            assert!(h.iter().all(|&v| v == 0.0), "hidden should stay zero: {h:?}");
        }
        assert!(cell.cell().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_single_unit_matches_scalar_formula() {
        let mut cell = RecurrentCell::new(uniform_weights(1, 1, 1.0, 0.0));
        let (mut h, mut c) = (0.0f64, 0.0f64);
        let s = |x: f64| 1.0 / (1.0 + (-x).exp());
        for x in [1.0f64, 0.5, -0.5, 0.0] {
            let z = x + h;
            c = s(z) * c + s(z) * z.tanh();
            h = s(z) * c.tanh();
            let got = cell.step(&[x as f32])[0];
            assert!((got as f64 - h).abs() < 1e-6, "step({x}): {got} vs {h}");
        }
    }

    #[test]
    fn test_gate_order() {
        // Only the candidate rows carry input weight; saturate input and
        // output gates open and the forget gate shut via biases.
        let mut w = LstmWeights {
            input_size: 1,
            hidden_size: 1,
            w_ih: vec![0.0, 0.0, 1.0, 0.0],
            w_hh: vec![0.0; 4],
            bias: vec![20.0, -20.0, 0.0, 20.0],
        };
        let mut cell = RecurrentCell::new(Arc::new(w.clone()));
        let h = cell.step(&[0.5])[0];
        let expected = (0.5f32).tanh().tanh();
        assert!((h - expected).abs() < 1e-5, "{h} vs {expected}");

        // Shut the input gate instead: nothing gets written into the cell.
        w.bias = vec![-20.0, -20.0, 0.0, 20.0];
        let mut cell = RecurrentCell::new(Arc::new(w));
        let h = cell.step(&[0.5])[0];
        assert!(h.abs() < 1e-5, "closed input gate should block: {h}");
    }

    #[test]
    fn test_forget_gate_holds_memory() {
        // Forget gate fully open, input gate open only for non-zero input.
        let w = LstmWeights {
            input_size: 1,
            hidden_size: 1,
            w_ih: vec![40.0, 0.0, 1.0, 0.0],
            w_hh: vec![0.0; 4],
            bias: vec![-20.0, 20.0, 0.0, 20.0],
        };
        let mut cell = RecurrentCell::new(Arc::new(w));
        cell.step(&[1.0]);
        let stored = cell.cell()[0];
        for _ in 0..100 {
            cell.step(&[0.0]);
        }
        assert!((cell.cell()[0] - stored).abs() < 1e-4, "cell should persist");
    }

    #[test]
    fn test_reset_zeroes_state() {
        let mut cell = RecurrentCell::new(uniform_weights(1, 3, 0.7, 0.1));
        let first = cell.step(&[0.9]).to_vec();
        cell.step(&[0.2]);
        cell.reset();
        assert!(cell.hidden().iter().chain(cell.cell()).all(|&v| v == 0.0));
        assert_eq!(cell.step(&[0.9]), first.as_slice());
    }

    #[test]
    fn test_hidden_bounded() {
        let mut cell = RecurrentCell::new(uniform_weights(1, 4, 3.0, 1.0));
        for i in 0..1000 {
            let x = if i % 2 == 0 { 50.0 } else { -50.0 };
            for &h in cell.step(&[x]) {
                assert!(h.abs() <= 1.0 && h.is_finite(), "hidden out of range: {h}");
            }
        }
    }
}
