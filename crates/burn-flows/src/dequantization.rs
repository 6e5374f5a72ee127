//! Dequantization layers
//!
//! Pixels are discrete, so a continuous density on them is degenerate. These
//! layers add noise in `[0, 1)` to every pixel value, rescale to `(0, 1)` and
//! move to logit space, where the rest of the flow operates. The inverse maps
//! logits back to pixel values and floors them, so it is lossy.
//!
//! - [`Dequantization`] adds uniform noise
//! - [`VariationalDequantization`] shapes the noise with a small conditional
//!   flow, learning where inside each pixel bin the probability mass sits

use burn::prelude::*;
use burn::tensor::Distribution;
use burn::tensor::activation::sigmoid;

use burn_flows_core::activation::softplus;
use burn_flows_core::numerics::sum_except_batch;

use crate::coupling::CouplingLayer;
use crate::error::FlowResult;
use crate::transform::{Direction, FlowOutput, FlowTransform};

/// Number of discrete pixel values
pub const QUANTS: usize = 256;

/// Margin keeping logit inputs away from 0 and 1
pub const ALPHA: f64 = 1e-5;

fn features<B: Backend>(x: &Tensor<B, 4>) -> f64 {
    let [_, c, h, w] = x.dims();
    (c * h * w) as f64
}

/// Uniform dequantization
#[derive(Module, Clone, Debug)]
pub struct Dequantization {
    /// Logit margin
    pub alpha: f64,
    /// Number of discrete values per pixel
    pub quants: usize,
}

impl Default for Dequantization {
    fn default() -> Self {
        Self::new(ALPHA, QUANTS)
    }
}

impl Dequantization {
    pub fn new(alpha: f64, quants: usize) -> Self {
        Self { alpha, quants }
    }

    fn ln_quants(&self) -> f64 {
        (self.quants as f64).ln()
    }

    /// Maps values in `[0, 1]` to logits
    ///
    /// `z = logit(z (1 - α) + α / 2)`, with the matching log-determinant added
    pub fn to_logits<B: Backend>(&self, z: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowOutput<B> {
        let d = features(&z);
        let z = z
            .mul_scalar(1.0 - self.alpha)
            .add_scalar(self.alpha * 0.5);
        let one_minus = z.clone().neg().add_scalar(1.0);

        let ldj = sum_except_batch(z.clone().log().neg() - one_minus.clone().log());
        let logdet = (logdet + ldj).add_scalar((1.0 - self.alpha).ln() * d);

        (z.log() - one_minus.log(), logdet)
    }

    /// Maps logits back to values in `[0, 1]`, undoing [`Self::to_logits`]
    pub fn from_logits<B: Backend>(&self, z: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowOutput<B> {
        let d = features(&z);
        let ldj = sum_except_batch(z.clone().neg() - softplus(z.clone().neg()).mul_scalar(2.0));
        let logdet = (logdet + ldj).sub_scalar((1.0 - self.alpha).ln() * d);

        let z = sigmoid(z)
            .sub_scalar(self.alpha * 0.5)
            .div_scalar(1.0 - self.alpha);

        (z, logdet)
    }

    /// Adds `noise` to the pixel values and rescales into `[0, 1)`
    pub fn dequantize_with<B: Backend>(
        &self,
        x: Tensor<B, 4>,
        logdet: Tensor<B, 1>,
        noise: Tensor<B, 4>,
    ) -> FlowOutput<B> {
        let d = features(&x);
        let z = (x + noise).div_scalar(self.quants as f64);
        (z, logdet.sub_scalar(self.ln_quants() * d))
    }

    /// Rescales `[0, 1)` values to pixel bins and floors them
    fn quantize<B: Backend>(&self, z: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowOutput<B> {
        let d = features(&z);
        let z = z
            .mul_scalar(self.quants as f64)
            .floor()
            .clamp(0.0, (self.quants - 1) as f64);
        (z, logdet.add_scalar(self.ln_quants() * d))
    }
}

impl<B: Backend> FlowTransform<B> for Dequantization {
    fn name(&self) -> &'static str {
        "Dequantization"
    }

    fn forward(&self, x: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        let noise = Tensor::random(x.shape(), Distribution::Default, &x.device());
        let (z, logdet) = self.dequantize_with(x, logdet, noise);
        Ok(self.to_logits(z, logdet))
    }

    fn inverse(&self, z: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        let (z, logdet) = self.from_logits(z, logdet);
        Ok(self.quantize(z, logdet))
    }

    fn output_shape(&self, input: [usize; 3]) -> FlowResult<[usize; 3]> {
        Ok(input)
    }
}

/// Dequantization with learned noise
///
/// The uniform noise is pushed through a flow of coupling layers conditioned
/// on the image (rescaled to `[-1, 1]`). The log-determinant of that flow is
/// accumulated, so the likelihood accounts for the noise density.
///
/// # Forward
///
/// ```text
/// u     ~ U[0, 1)
/// noise = sigmoid(flows(logit(u) | img))
/// z     = logit((x + noise) / 256)
/// ```
#[derive(Module, Debug)]
pub struct VariationalDequantization<B: Backend> {
    /// Coupling layers over the noise, each taking the image as condition
    pub flows: Vec<CouplingLayer<B>>,
    /// Rescaling and logit mapping
    pub base: Dequantization,
}

impl<B: Backend> VariationalDequantization<B> {
    /// Creates the layer from conditional coupling layers
    ///
    /// Each layer must accept a condition with as many channels as the image.
    pub fn new(flows: Vec<CouplingLayer<B>>) -> Self {
        Self {
            flows,
            base: Dequantization::default(),
        }
    }

    /// Dequantizes `x` starting from the given uniform noise
    pub fn dequantize_with(
        &self,
        x: Tensor<B, 4>,
        logdet: Tensor<B, 1>,
        noise: Tensor<B, 4>,
    ) -> FlowResult<FlowOutput<B>> {
        let img = x.clone().div_scalar(255.0).mul_scalar(2.0).sub_scalar(1.0);

        let (mut noise, mut logdet) = self.base.to_logits(noise, logdet);
        for flow in &self.flows {
            (noise, logdet) = flow.transform(noise, logdet, Direction::Forward, Some(img.clone()))?;
        }
        let (noise, logdet) = self.base.from_logits(noise, logdet);

        let (z, logdet) = self.base.dequantize_with(x, logdet, noise);
        Ok(self.base.to_logits(z, logdet))
    }
}

impl<B: Backend> FlowTransform<B> for VariationalDequantization<B> {
    fn name(&self) -> &'static str {
        "VariationalDequantization"
    }

    fn forward(&self, x: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        let noise = Tensor::random(x.shape(), Distribution::Default, &x.device());
        self.dequantize_with(x, logdet, noise)
    }

    fn inverse(&self, z: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        FlowTransform::<B>::inverse(&self.base, z, logdet)
    }

    fn output_shape(&self, input: [usize; 3]) -> FlowResult<[usize; 3]> {
        for flow in &self.flows {
            flow.validate(input, input[0])?;
        }
        Ok(input)
    }
}
