//! Affine output projection: y = act(W·x + b). Stateless and allocation-free.

use std::sync::Arc;

use crate::weights::DenseWeights;

#[derive(Clone)]
pub struct DenseLayer {
    weights: Arc<DenseWeights>,
}

impl DenseLayer {
    pub fn new(weights: Arc<DenseWeights>) -> Self {
        Self { weights }
    }

    pub fn input_size(&self) -> usize {
        self.weights.input_size
    }

    pub fn output_size(&self) -> usize {
        self.weights.output_size
    }

    /// `input` is `input_size()` long, `output` is `output_size()` long.
    #[inline]
    pub fn forward(&self, input: &[f32], output: &mut [f32]) {
        let w = &*self.weights;
        let n = w.input_size;
        for (o, y) in output.iter_mut().enumerate() {
            let row = &w.weight[o * n..(o + 1) * n];
            let mut sum = w.bias[o];
            for (wi, xi) in row.iter().zip(input) {
                sum += wi * xi;
            }
            *y = w.activation.apply(sum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::Activation;

    fn layer(weight: Vec<f32>, bias: Vec<f32>, activation: Activation) -> DenseLayer {
        let output_size = bias.len();
        DenseLayer::new(Arc::new(DenseWeights {
            input_size: weight.len() / output_size,
            output_size,
            weight,
            bias,
            activation,
        }))
    }

    #[test]
    fn test_affine() {
        let dense = layer(
            vec![1.0, 2.0, 3.0, -1.0, 0.5, 0.0],
            vec![0.5, -1.0],
            Activation::Identity,
        );
        let mut out = [0.0; 2];
        dense.forward(&[1.0, 1.0, 2.0], &mut out);
        assert_eq!(out, [1.0 + 2.0 + 6.0 + 0.5, -1.0 + 0.5 - 1.0]);
    }

    #[test]
    fn test_activation_applied() {
        let dense = layer(vec![1.0], vec![0.0], Activation::Tanh);
        let mut out = [0.0; 1];
        dense.forward(&[10.0], &mut out);
        assert!((out[0] - 10.0f32.tanh()).abs() < 1e-7);

        let relu = layer(vec![1.0], vec![0.0], Activation::Relu);
        relu.forward(&[-2.0], &mut out);
        assert_eq!(out[0], 0.0);
    }
}
