//! Reductions and densities shared by the flow layers

use burn::prelude::*;
use burn::tensor::Distribution;

/// `0.5 * ln(2π)`, the normalizer of the standard normal log-density
pub const HALF_LN_2PI: f64 = 0.918_938_533_204_672_7;

/// Sums every dimension except the leading batch dimension
///
/// Input: `[batch, ...]`, output: `[batch]`
pub fn sum_except_batch<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, 1> {
    let dims = x.dims();
    let batch = dims[0];
    let rest: usize = dims[1..].iter().product();
    x.reshape([batch, rest]).sum_dim(1).reshape([batch])
}

/// Elementwise log-density of the standard normal distribution
pub fn standard_normal_log_prob<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.powf_scalar(2.0).mul_scalar(-0.5).sub_scalar(HALF_LN_2PI)
}

/// Draws standard normal samples with the given shape
pub fn standard_normal<B: Backend, const D: usize>(
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::random(shape, Distribution::Normal(0.0, 1.0), device)
}

/// Numerically stable `ln(Σ exp(x))` along `dim`, keeping the dimension
pub fn log_sum_exp<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let max = x.clone().max_dim(dim).detach();
    (x - max.clone()).exp().sum_dim(dim).log() + max
}

/// Returns true when no element is NaN or infinite
///
/// Copies the tensor to the host, so keep it out of hot loops.
pub fn all_finite<B: Backend, const D: usize>(x: Tensor<B, D>) -> bool {
    x.into_data().iter::<f64>().all(|v| v.is_finite())
}
