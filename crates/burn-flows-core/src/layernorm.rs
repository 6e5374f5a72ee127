//! Layer normalization for flat features and channel-first feature maps
//!
//! [`LayerNorm`] normalizes the last dimension of its input. [`ChannelLayerNorm`]
//! applies it across the channel axis of `[batch, channels, height, width]`
//! tensors by moving channels last and back again.

use burn::module::Param;
use burn::prelude::*;

/// Layer normalization with a trainable affine transform
///
/// # Formula
///
/// For input x with last dimension of size D:
/// ```text
/// y = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias
/// ```
#[derive(Module, Debug)]
pub struct LayerNorm<B: Backend> {
    /// Scale parameter, initialized to ones
    pub weight: Param<Tensor<B, 1>>,
    /// Shift parameter, initialized to zeros
    pub bias: Param<Tensor<B, 1>>,
    /// Epsilon for numerical stability
    pub eps: f64,
}

impl<B: Backend> LayerNorm<B> {
    /// Creates a new layer normalization module
    ///
    /// # Arguments
    ///
    /// * `size` - Size of the normalized dimension (last dimension)
    /// * `device` - Device to create tensors on
    pub fn new(size: usize, device: &B::Device) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::ones([size], device)),
            bias: Param::from_tensor(Tensor::zeros([size], device)),
            eps: 1e-5,
        }
    }

    /// Applies layer normalization over the last dimension
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let last_dim = D - 1;
        let (var, mean) = x.clone().var_mean_bias(last_dim);

        let x_norm = (x - mean) / (var + self.eps).sqrt();

        x_norm * self.weight.val().unsqueeze() + self.bias.val().unsqueeze()
    }
}

/// Layer normalization across the channels of an image feature map
///
/// Works well together with the residual connections of the gated networks.
#[derive(Module, Debug)]
pub struct ChannelLayerNorm<B: Backend> {
    pub norm: LayerNorm<B>,
}

impl<B: Backend> ChannelLayerNorm<B> {
    /// Creates a channel layer norm for `channels` input channels
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            norm: LayerNorm::new(channels, device),
        }
    }

    /// Input and output: `[batch, channels, height, width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = x.permute([0, 2, 3, 1]);
        let x = self.norm.forward(x);
        x.permute([0, 3, 1, 2])
    }
}
