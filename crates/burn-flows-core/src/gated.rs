//! Gated residual networks that parametrize coupling layers
//!
//! Both networks share one pattern: an input projection, a stack of gated
//! residual blocks with layer norm in between, a concatenated ELU and a final
//! projection whose weight and bias start at zero. The zero start makes an
//! untrained network output exactly zero, so every coupling layer begins as the
//! identity transform.
//!
//! # Architecture
//!
//! ```text
//! block(x)  = x + val * sigmoid(gate),  [val, gate] = proj(concat_elu(layer(x)))
//! net(x)    = out(concat_elu(norm_N(block_N(... norm_1(block_1(in(x)))))))
//! ```
//!
//! - [`GatedConvNet`] works on `[batch, channels, height, width]` feature maps
//! - [`GatedLinearNet`] flattens the feature map, works on vectors and reshapes back

use burn::nn::{
    Initializer, Linear, LinearConfig, PaddingConfig2d,
    conv::{Conv2d, Conv2dConfig},
};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;

use crate::activation::concat_elu;
use crate::layernorm::{ChannelLayerNorm, LayerNorm};
use crate::partial_conv::PartialConv2d;

/// Splits a tensor into two equal halves along dimension 1
pub fn split_channels<B: Backend, const D: usize>(x: Tensor<B, D>) -> (Tensor<B, D>, Tensor<B, D>) {
    let channels = x.dims()[1];
    let half = channels / 2;
    let first = x.clone().narrow(1, 0, half);
    let second = x.narrow(1, half, channels - half);
    (first, second)
}

fn same_conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    initializer: Option<Initializer>,
    device: &B::Device,
) -> Conv2d<B> {
    let config = Conv2dConfig::new(channels, [kernel, kernel])
        .with_padding(PaddingConfig2d::Explicit(kernel / 2, kernel / 2));
    let config = match initializer {
        Some(init) => config.with_initializer(init),
        None => config,
    };
    config.init(device)
}

/// Two-layer convolutional residual block with an input gate
#[derive(Module, Debug)]
pub struct GatedConv<B: Backend> {
    /// 3x3 conv: channels -> hidden
    pub conv: Conv2d<B>,
    /// 1x1 conv: 2 * hidden -> 2 * channels (value and gate)
    pub proj: Conv2d<B>,
}

impl<B: Backend> GatedConv<B> {
    /// Creates a gated residual block
    pub fn new(channels: usize, hidden: usize, device: &B::Device) -> Self {
        Self {
            conv: same_conv([channels, hidden], 3, None, device),
            proj: same_conv([2 * hidden, 2 * channels], 1, None, device),
        }
    }

    /// Forward pass, shape preserving
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let h = self.conv.forward(x.clone());
        let h = self.proj.forward(concat_elu(h));
        let (val, gate) = split_channels(h);
        x + val * sigmoid(gate)
    }
}

/// Input layer of a [`GatedConvNet`]
#[derive(Module, Debug)]
pub enum InputConv<B: Backend> {
    Plain(Conv2d<B>),
    Partial(PartialConv2d<B>),
}

/// Gated convolutional network configuration
#[derive(Debug, Clone)]
pub struct GatedConvNetConfig {
    /// Number of input channels
    pub c_in: usize,
    /// Hidden width of the residual blocks
    pub c_hidden: usize,
    /// Number of output channels; `None` means `2 * c_in` (scale and translation)
    pub c_out: Option<usize>,
    /// Number of gated residual blocks
    pub num_layers: usize,
    /// Use a partial convolution as the input layer
    pub partial_conv: bool,
    /// Initializer of the output projection (weight and bias)
    pub output_initializer: Initializer,
}

impl GatedConvNetConfig {
    /// Creates a config with the default hidden width (32) and depth (3)
    pub fn new(c_in: usize) -> Self {
        Self {
            c_in,
            c_hidden: 32,
            c_out: None,
            num_layers: 3,
            partial_conv: false,
            output_initializer: Initializer::Zeros,
        }
    }

    pub fn with_hidden(mut self, c_hidden: usize) -> Self {
        self.c_hidden = c_hidden;
        self
    }

    pub fn with_out_channels(mut self, c_out: usize) -> Self {
        self.c_out = Some(c_out);
        self
    }

    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    pub fn with_partial_conv(mut self, partial_conv: bool) -> Self {
        self.partial_conv = partial_conv;
        self
    }

    /// Overrides the zero initialization of the output projection
    pub fn with_output_initializer(mut self, initializer: Initializer) -> Self {
        self.output_initializer = initializer;
        self
    }

    /// Resolved number of output channels
    pub fn out_channels(&self) -> usize {
        self.c_out.unwrap_or(2 * self.c_in)
    }

    /// Initializes the network
    pub fn init<B: Backend>(&self, device: &B::Device) -> GatedConvNet<B> {
        let input = if self.partial_conv {
            InputConv::Partial(PartialConv2d::new([self.c_in, self.c_hidden], [3, 3], device))
        } else {
            InputConv::Plain(same_conv([self.c_in, self.c_hidden], 3, None, device))
        };

        let blocks = (0..self.num_layers)
            .map(|_| GatedConv::new(self.c_hidden, self.c_hidden, device))
            .collect();
        let norms = (0..self.num_layers)
            .map(|_| ChannelLayerNorm::new(self.c_hidden, device))
            .collect();

        let output = same_conv(
            [2 * self.c_hidden, self.out_channels()],
            3,
            Some(self.output_initializer.clone()),
            device,
        );

        GatedConvNet {
            input,
            blocks,
            norms,
            output,
            c_in: self.c_in,
            c_out: self.out_channels(),
        }
    }
}

/// Gated convolutional network
#[derive(Module, Debug)]
pub struct GatedConvNet<B: Backend> {
    pub input: InputConv<B>,
    pub blocks: Vec<GatedConv<B>>,
    pub norms: Vec<ChannelLayerNorm<B>>,
    pub output: Conv2d<B>,
    #[module(skip)]
    pub c_in: usize,
    #[module(skip)]
    pub c_out: usize,
}

impl<B: Backend> GatedConvNet<B> {
    /// Forward pass treating every input position as valid
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        let valid = Tensor::ones([1, 1, height, width], &x.device());
        self.forward_masked(x, valid)
    }

    /// Forward pass where only positions marked in `valid` carry information
    ///
    /// `valid` has shape `[1, 1 or c_in, height, width]`. It only affects a partial
    /// convolution input layer; plain networks ignore it.
    ///
    /// Input: `[batch, c_in, h, w]`, output: `[batch, c_out, h, w]`
    pub fn forward_masked(&self, x: Tensor<B, 4>, valid: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut h = match &self.input {
            InputConv::Plain(conv) => conv.forward(x),
            InputConv::Partial(conv) => conv.forward(x, valid),
        };

        for (block, norm) in self.blocks.iter().zip(&self.norms) {
            h = norm.forward(block.forward(h));
        }

        self.output.forward(concat_elu(h))
    }
}

/// Fully-connected residual block with an input gate
#[derive(Module, Debug)]
pub struct GatedLinear<B: Backend> {
    pub linear: Linear<B>,
    pub proj: Linear<B>,
}

impl<B: Backend> GatedLinear<B> {
    /// Creates a gated block over `features` features
    pub fn new(features: usize, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(features, features).init(device),
            proj: LinearConfig::new(2 * features, 2 * features).init(device),
        }
    }

    /// Forward pass on `[batch, features]`, shape preserving
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let h = self.linear.forward(x.clone());
        let h = self.proj.forward(concat_elu(h));
        let (val, gate) = split_channels(h);
        x + val * sigmoid(gate)
    }
}

/// Gated fully-connected network configuration
#[derive(Debug, Clone)]
pub struct GatedLinearNetConfig {
    /// Shape of one input sample, `[channels, height, width]`
    pub in_shape: [usize; 3],
    /// Width of the residual blocks
    pub hidden: usize,
    /// Number of output channels; `None` means `2 * channels`
    pub c_out: Option<usize>,
    /// Number of gated residual blocks
    pub num_layers: usize,
    /// Initializer of the output projection (weight and bias)
    pub output_initializer: Initializer,
}

impl GatedLinearNetConfig {
    /// Creates a config whose hidden width equals the flattened input size
    pub fn new(in_shape: [usize; 3]) -> Self {
        let [c, h, w] = in_shape;
        Self {
            in_shape,
            hidden: c * h * w,
            c_out: None,
            num_layers: 3,
            output_initializer: Initializer::Zeros,
        }
    }

    pub fn with_hidden(mut self, hidden: usize) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_out_channels(mut self, c_out: usize) -> Self {
        self.c_out = Some(c_out);
        self
    }

    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Overrides the zero initialization of the output projection
    pub fn with_output_initializer(mut self, initializer: Initializer) -> Self {
        self.output_initializer = initializer;
        self
    }

    /// Resolved number of output channels
    pub fn out_channels(&self) -> usize {
        self.c_out.unwrap_or(2 * self.in_shape[0])
    }

    /// Initializes the network
    pub fn init<B: Backend>(&self, device: &B::Device) -> GatedLinearNet<B> {
        let [c, h, w] = self.in_shape;
        let c_out = self.out_channels();

        GatedLinearNet {
            input: LinearConfig::new(c * h * w, self.hidden).init(device),
            blocks: (0..self.num_layers)
                .map(|_| GatedLinear::new(self.hidden, device))
                .collect(),
            norms: (0..self.num_layers)
                .map(|_| LayerNorm::new(self.hidden, device))
                .collect(),
            output: LinearConfig::new(2 * self.hidden, c_out * h * w)
                .with_initializer(self.output_initializer.clone())
                .init(device),
            in_shape: self.in_shape,
            c_out,
        }
    }
}

/// Gated fully-connected network over flattened feature maps
#[derive(Module, Debug)]
pub struct GatedLinearNet<B: Backend> {
    pub input: Linear<B>,
    pub blocks: Vec<GatedLinear<B>>,
    pub norms: Vec<LayerNorm<B>>,
    pub output: Linear<B>,
    #[module(skip)]
    pub in_shape: [usize; 3],
    #[module(skip)]
    pub c_out: usize,
}

impl<B: Backend> GatedLinearNet<B> {
    /// Input: `[batch, c, h, w]` matching `in_shape`, output: `[batch, c_out, h, w]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, c, h, w] = x.dims();

        let mut out = self.input.forward(x.reshape([batch, c * h * w]));
        for (block, norm) in self.blocks.iter().zip(&self.norms) {
            out = norm.forward(block.forward(out));
        }
        let out = self.output.forward(concat_elu(out));

        out.reshape([batch, self.c_out, h, w])
    }
}
