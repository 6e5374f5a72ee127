//! Multi-scale layers: squeezing space into channels and factoring out latents

use burn::prelude::*;

use burn_flows_core::numerics::{standard_normal, standard_normal_log_prob, sum_except_batch};

use crate::error::{FlowError, FlowResult};
use crate::transform::{FlowOutput, FlowTransform};

/// Trades spatial resolution for channels
///
/// Every 2x2 spatial patch becomes four channels:
/// `[B, C, H, W] -> [B, 4C, H/2, W/2]`. A pure permutation, so the
/// log-determinant is zero.
#[derive(Module, Clone, Debug, Default)]
pub struct SqueezeFlow;

impl<B: Backend> FlowTransform<B> for SqueezeFlow {
    fn name(&self) -> &'static str {
        "SqueezeFlow"
    }

    fn forward(&self, x: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        let [b, c, h, w] = x.dims();
        if h % 2 != 0 || w % 2 != 0 {
            return Err(FlowError::shape("SqueezeFlow", &[c, h + h % 2, w + w % 2], &[c, h, w]));
        }

        let z = x
            .reshape([b, c, h / 2, 2, w / 2, 2])
            .permute([0, 1, 3, 5, 2, 4])
            .reshape([b, 4 * c, h / 2, w / 2]);

        Ok((z, logdet))
    }

    fn inverse(&self, z: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        let [b, c, h, w] = z.dims();
        if c % 4 != 0 {
            return Err(FlowError::shape("SqueezeFlow", &[c.next_multiple_of(4), h, w], &[c, h, w]));
        }

        let x = z
            .reshape([b, c / 4, 2, 2, h, w])
            .permute([0, 1, 4, 2, 5, 3])
            .reshape([b, c / 4, 2 * h, 2 * w]);

        Ok((x, logdet))
    }

    fn output_shape(&self, input: [usize; 3]) -> FlowResult<[usize; 3]> {
        let [c, h, w] = input;
        if h % 2 != 0 || w % 2 != 0 {
            return Err(FlowError::shape("SqueezeFlow", &[c, h + h % 2, w + w % 2], &input));
        }
        Ok([4 * c, h / 2, w / 2])
    }
}

/// Factors out half of the channels as final latents
///
/// The forward pass keeps the first `C/2` channels and scores the other half
/// directly under the standard normal prior, adding its log-density to the
/// log-determinant. The inverse draws the missing half from the prior.
#[derive(Module, Clone, Debug, Default)]
pub struct SplitFlow;

impl SplitFlow {
    /// Inverse pass with the factored-out half supplied by the caller
    ///
    /// `z_split` must have the same shape as `z`.
    pub fn inverse_with<B: Backend>(
        &self,
        z: Tensor<B, 4>,
        logdet: Tensor<B, 1>,
        z_split: Tensor<B, 4>,
    ) -> FlowResult<FlowOutput<B>> {
        if z.dims() != z_split.dims() {
            return Err(FlowError::shape("SplitFlow", &z.dims(), &z_split.dims()));
        }

        let log_prob = sum_except_batch(standard_normal_log_prob(z_split.clone()));
        Ok((Tensor::cat(vec![z, z_split], 1), logdet - log_prob))
    }
}

impl<B: Backend> FlowTransform<B> for SplitFlow {
    fn name(&self) -> &'static str {
        "SplitFlow"
    }

    fn forward(&self, x: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        let [_, c, h, w] = x.dims();
        if c % 2 != 0 {
            return Err(FlowError::shape("SplitFlow", &[c + 1, h, w], &[c, h, w]));
        }

        let z = x.clone().narrow(1, 0, c / 2);
        let z_split = x.narrow(1, c / 2, c / 2);
        let log_prob = sum_except_batch(standard_normal_log_prob(z_split));

        Ok((z, logdet + log_prob))
    }

    fn inverse(&self, z: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        let z_split = standard_normal(z.dims(), &z.device());
        self.inverse_with(z, logdet, z_split)
    }

    fn output_shape(&self, input: [usize; 3]) -> FlowResult<[usize; 3]> {
        let [c, h, w] = input;
        if c % 2 != 0 {
            return Err(FlowError::shape("SplitFlow", &[c + 1, h, w], &input));
        }
        Ok([c / 2, h, w])
    }
}
