//! Ready-made flow architectures
//!
//! [`create_flow`] turns a [`FlowConfig`] into an [`ImageFlow`]. Every recipe
//! starts with a dequantization layer followed by coupling layers that
//! alternate their mask so that each feature is transformed in every other
//! layer.
//!
//! | Recipe | Dequantization | Couplings |
//! |--------|----------------|-----------|
//! | `simple` | uniform | 8 checkerboard, conv |
//! | `vardeq` | variational | 8 checkerboard, conv |
//! | `deep` | variational | 15 checkerboard, conv |
//! | `linear` | variational | 8 checkerboard, fully-connected |
//! | `partial_conv` | variational | 8 checkerboard, partial conv |
//! | `multiscale` | variational | 2 checkerboard, squeeze, 2 channel, split, ... |

use burn::prelude::*;

use burn_flows_core::gated::{GatedConvNetConfig, GatedLinearNetConfig};
use burn_flows_core::mask::{channel_mask, checkerboard_mask};

use crate::config::{FlowConfig, FlowRecipe, SampleShapeFactor};
use crate::coupling::CouplingLayer;
use crate::dequantization::{Dequantization, VariationalDequantization};
use crate::error::FlowResult;
use crate::image_flow::ImageFlow;
use crate::multiscale::{SplitFlow, SqueezeFlow};
use crate::transform::FlowLayer;

/// Hidden width of the coupling networks over the image
const HIDDEN: usize = 32;

/// Hidden width of the coupling networks inside variational dequantization
const DEQUANT_HIDDEN: usize = 16;

/// Number of coupling layers inside variational dequantization
const DEQUANT_LAYERS: usize = 4;

/// How a stack of checkerboard couplings parametrizes its networks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetKind {
    Conv,
    PartialConv,
    Linear,
}

/// Builds the flow described by `config`
///
/// # Returns
///
/// The flow and the factor that maps a batch image shape to the latent shape
/// [`ImageFlow::sample`] expects.
///
/// # Errors
///
/// [`FlowError::InvalidConfig`](crate::FlowError::InvalidConfig) for an empty
/// image or a multiscale size not divisible by 4.
pub fn create_flow<B: Backend>(
    config: &FlowConfig,
    device: &B::Device,
) -> FlowResult<(ImageFlow<B>, SampleShapeFactor)> {
    config.validate()?;

    let c = config.channels;
    let size = config.size;

    let layers = match config.model {
        FlowRecipe::Simple => {
            let mut layers = vec![Dequantization::default().into()];
            layers.extend(checkerboard_couplings(c, size, 8, NetKind::Conv, device));
            layers
        }
        FlowRecipe::VarDeq => vardeq_flow(c, size, 8, NetKind::Conv, device),
        FlowRecipe::Deep => vardeq_flow(c, size, 15, NetKind::Conv, device),
        FlowRecipe::Linear => vardeq_flow(c, size, 8, NetKind::Linear, device),
        FlowRecipe::PartialConv => vardeq_flow(c, size, 8, NetKind::PartialConv, device),
        FlowRecipe::Multiscale => multiscale_flow(c, size, config.resolved_squeeze_twice(), device),
    };

    let flow = ImageFlow::new(layers, config.image_shape())?;
    let factor = flow.sample_shape_factor();

    tracing::info!(
        model = %config.model,
        params = flow.num_params(),
        image_shape = ?flow.image_shape(),
        latent_shape = ?flow.latent_shape(),
        %factor,
        "created flow"
    );

    Ok((flow, factor))
}

fn conv_coupling<B: Backend>(
    c: usize,
    mask: Tensor<B, 4>,
    hidden: usize,
    partial_conv: bool,
    condition_channels: usize,
    device: &B::Device,
) -> CouplingLayer<B> {
    let mask_channels = mask.dims()[1];
    let net = GatedConvNetConfig::new(c + mask_channels + condition_channels)
        .with_hidden(hidden)
        .with_out_channels(2 * c)
        .with_partial_conv(partial_conv)
        .init::<B>(device);
    CouplingLayer::new(net, mask, c, device)
}

fn linear_coupling<B: Backend>(
    c: usize,
    size: usize,
    mask: Tensor<B, 4>,
    device: &B::Device,
) -> CouplingLayer<B> {
    let mask_channels = mask.dims()[1];
    let net = GatedLinearNetConfig::new([c + mask_channels, size, size])
        .with_hidden(c * size * size)
        .with_out_channels(2 * c)
        .init::<B>(device);
    CouplingLayer::new(net, mask, c, device)
}

/// `count` checkerboard couplings over `[c, size, size]`, alternating the mask
fn checkerboard_couplings<B: Backend>(
    c: usize,
    size: usize,
    count: usize,
    kind: NetKind,
    device: &B::Device,
) -> Vec<FlowLayer<B>> {
    (0..count)
        .map(|i| {
            let mask = checkerboard_mask(size, size, i % 2 == 1, device);
            let layer = match kind {
                NetKind::Conv => conv_coupling(c, mask, HIDDEN, false, 0, device),
                NetKind::PartialConv => conv_coupling(c, mask, HIDDEN, true, 0, device),
                NetKind::Linear => linear_coupling(c, size, mask, device),
            };
            layer.into()
        })
        .collect()
}

/// `count` channel couplings over `c` channels, alternating the mask
fn channel_couplings<B: Backend>(
    c: usize,
    count: usize,
    hidden: usize,
    device: &B::Device,
) -> Vec<FlowLayer<B>> {
    (0..count)
        .map(|i| {
            let mask = channel_mask(c, i % 2 == 1, device);
            conv_coupling(c, mask, hidden, false, 0, device).into()
        })
        .collect()
}

fn variational_dequantization<B: Backend>(
    c: usize,
    size: usize,
    partial_conv: bool,
    device: &B::Device,
) -> VariationalDequantization<B> {
    let flows = (0..DEQUANT_LAYERS)
        .map(|i| {
            let mask = checkerboard_mask(size, size, i % 2 == 1, device);
            conv_coupling(c, mask, DEQUANT_HIDDEN, partial_conv, c, device)
        })
        .collect();
    VariationalDequantization::new(flows)
}

fn vardeq_flow<B: Backend>(
    c: usize,
    size: usize,
    count: usize,
    kind: NetKind,
    device: &B::Device,
) -> Vec<FlowLayer<B>> {
    let partial_conv = kind == NetKind::PartialConv;
    let mut layers = vec![variational_dequantization(c, size, partial_conv, device).into()];
    layers.extend(checkerboard_couplings(c, size, count, kind, device));
    layers
}

fn multiscale_flow<B: Backend>(
    c: usize,
    size: usize,
    squeeze_twice: bool,
    device: &B::Device,
) -> Vec<FlowLayer<B>> {
    let mut layers = vec![variational_dequantization(c, size, false, device).into()];
    layers.extend(checkerboard_couplings(c, size, 2, NetKind::Conv, device));

    layers.push(SqueezeFlow.into());
    layers.extend(channel_couplings(4 * c, 2, 48, device));
    layers.push(SplitFlow.into());

    if squeeze_twice {
        layers.push(SqueezeFlow.into());
        layers.extend(channel_couplings(8 * c, 4, 64, device));
    } else {
        layers.extend(channel_couplings(2 * c, 4, 64, device));
    }

    layers
}
