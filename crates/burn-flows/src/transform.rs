//! The invertible transform interface and the closed set of flow layers
//!
//! Every layer maps `(x, logdet)` to `(z, logdet')` and back. The
//! log-determinant accumulator has shape `[batch]`; each layer adds its own
//! contribution in the forward direction and subtracts it in the inverse one.

use burn::prelude::*;
use burn::tensor::BasicOps;

use crate::coupling::CouplingLayer;
use crate::dequantization::{Dequantization, VariationalDequantization};
use crate::error::{FlowError, FlowResult};
use crate::multiscale::{SplitFlow, SqueezeFlow};

/// Features plus the accumulated log-determinant, `([batch, c, h, w], [batch])`
pub type FlowOutput<B> = (Tensor<B, 4>, Tensor<B, 1>);

/// Direction of a flow pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Data to latent (encoding, likelihood)
    Forward,
    /// Latent to data (sampling)
    Inverse,
}

/// An invertible transform with a tractable log-determinant
pub trait FlowTransform<B: Backend> {
    /// Name used in errors and logs
    fn name(&self) -> &'static str;

    /// Data to latent
    fn forward(&self, x: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>>;

    /// Latent to data
    fn inverse(&self, z: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>>;

    /// Per-sample output shape `[c, h, w]` of the forward pass, or a shape
    /// error when the layer cannot accept `input`
    fn output_shape(&self, input: [usize; 3]) -> FlowResult<[usize; 3]>;
}

/// Checks that `x` is `[_, c, h, w]` with `[c, h, w] == expected`
pub(crate) fn check_shape<B: Backend, K: BasicOps<B>>(
    layer: &str,
    x: &Tensor<B, 4, K>,
    expected: [usize; 3],
) -> FlowResult<()> {
    let [_, c, h, w] = x.dims();
    if [c, h, w] == expected {
        Ok(())
    } else {
        Err(FlowError::shape(layer, &expected, &[c, h, w]))
    }
}

/// One step of an [`ImageFlow`](crate::ImageFlow)
#[derive(Module, Debug)]
pub enum FlowLayer<B: Backend> {
    Coupling(CouplingLayer<B>),
    Squeeze(SqueezeFlow),
    Split(SplitFlow),
    Dequantization(Dequantization),
    VariationalDequantization(VariationalDequantization<B>),
}

impl<B: Backend> FlowLayer<B> {
    fn transform(&self) -> &dyn FlowTransform<B> {
        match self {
            FlowLayer::Coupling(layer) => layer,
            FlowLayer::Squeeze(layer) => layer,
            FlowLayer::Split(layer) => layer,
            FlowLayer::Dequantization(layer) => layer,
            FlowLayer::VariationalDequantization(layer) => layer,
        }
    }
}

impl<B: Backend> FlowTransform<B> for FlowLayer<B> {
    fn name(&self) -> &'static str {
        self.transform().name()
    }

    fn forward(&self, x: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        self.transform().forward(x, logdet)
    }

    fn inverse(&self, z: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        self.transform().inverse(z, logdet)
    }

    fn output_shape(&self, input: [usize; 3]) -> FlowResult<[usize; 3]> {
        self.transform().output_shape(input)
    }
}

impl<B: Backend> From<CouplingLayer<B>> for FlowLayer<B> {
    fn from(layer: CouplingLayer<B>) -> Self {
        FlowLayer::Coupling(layer)
    }
}

impl<B: Backend> From<SqueezeFlow> for FlowLayer<B> {
    fn from(layer: SqueezeFlow) -> Self {
        FlowLayer::Squeeze(layer)
    }
}

impl<B: Backend> From<SplitFlow> for FlowLayer<B> {
    fn from(layer: SplitFlow) -> Self {
        FlowLayer::Split(layer)
    }
}

impl<B: Backend> From<Dequantization> for FlowLayer<B> {
    fn from(layer: Dequantization) -> Self {
        FlowLayer::Dequantization(layer)
    }
}

impl<B: Backend> From<VariationalDequantization<B>> for FlowLayer<B> {
    fn from(layer: VariationalDequantization<B>) -> Self {
        FlowLayer::VariationalDequantization(layer)
    }
}
