//! Activations used by the gated coupling networks

use burn::prelude::*;
use burn::tensor::activation::relu;

/// ELU activation: `x` for positive inputs, `exp(x) - 1` otherwise
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    relu(x.clone()) + x.clamp_max(0.0).exp().sub_scalar(1.0)
}

/// Concatenated ELU: `cat([elu(x), elu(-x)], dim = 1)`
///
/// Doubles the size of dimension 1. Unlike a plain ELU, one of the two halves
/// always has a unit gradient, so both positive and negative inputs keep a
/// strong gradient signal.
pub fn concat_elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    Tensor::cat(vec![elu(x.clone()), elu(x.neg())], 1)
}

/// Numerically stable softplus: `ln(1 + exp(x))`
pub fn softplus<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    relu(x.clone()) + x.abs().neg().exp().log1p()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_concat_elu_doubles_channels() {
        let device = Default::default();
        let x: Tensor<TestBackend, 4> = Tensor::ones([2, 3, 4, 4], &device);
        assert_eq!(concat_elu(x).dims(), [2, 6, 4, 4]);

        let flat: Tensor<TestBackend, 2> = Tensor::ones([2, 10], &device);
        assert_eq!(concat_elu(flat).dims(), [2, 20]);
    }

    #[test]
    fn test_elu_values() {
        let device = Default::default();
        let x: Tensor<TestBackend, 1> = Tensor::from_floats([-1.0, 0.0, 2.0], &device);
        let y: Vec<f32> = elu(x).into_data().to_vec().unwrap();

        assert!((y[0] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert!(y[1].abs() < 1e-6);
        assert!((y[2] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_softplus_is_stable() {
        let device = Default::default();
        let x: Tensor<TestBackend, 1> = Tensor::from_floats([-100.0, 0.0, 100.0], &device);
        let y: Vec<f32> = softplus(x).into_data().to_vec().unwrap();

        assert!(y[0].abs() < 1e-6);
        assert!((y[1] - 2.0f32.ln()).abs() < 1e-6);
        assert!((y[2] - 100.0).abs() < 1e-4);
    }
}
