//! Partial convolution
//!
//! A convolution that only reads valid input positions and rescales every
//! output by the fraction of its window that was valid. Used as the input
//! layer of coupling networks so the network sees the conditioning half of a
//! checkerboard-masked image without the zeroed-out holes biasing its output.
//!
//! # Formula
//!
//! For `c` input channels, kernel window area `k` and valid map `m`:
//! ```text
//! y = conv(x * m) * c * k / coverage + bias    where coverage > 0
//! y = 0                                        where coverage == 0
//! coverage = conv(m, ones)                     (summed over channels)
//! ```
//!
//! The valid map is per channel, so always-valid inputs such as a conditioning
//! image can sit next to masked ones.
//!
//! # Reference
//!
//! "Image Inpainting for Irregular Holes Using Partial Convolutions" - Liu et al., 2018

use burn::nn::{
    PaddingConfig2d,
    conv::{Conv2d, Conv2dConfig},
};
use burn::prelude::*;
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;

/// 3x3 partial convolution with stride 1 and "same" padding
#[derive(Module, Debug)]
pub struct PartialConv2d<B: Backend> {
    /// Underlying convolution holding the trainable weight and bias
    pub conv: Conv2d<B>,
    #[module(skip)]
    pub kernel_size: [usize; 2],
}

impl<B: Backend> PartialConv2d<B> {
    /// Creates a new partial convolution
    ///
    /// # Arguments
    ///
    /// * `channels` - `[in_channels, out_channels]`
    /// * `kernel_size` - Odd kernel size; padding keeps the spatial size
    /// * `device` - Device to create tensors on
    pub fn new(channels: [usize; 2], kernel_size: [usize; 2], device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, kernel_size)
            .with_padding(PaddingConfig2d::Explicit(kernel_size[0] / 2, kernel_size[1] / 2))
            .init(device);

        Self { conv, kernel_size }
    }

    fn options(&self) -> ConvOptions<2> {
        let [kh, kw] = self.kernel_size;
        ConvOptions::new([1, 1], [kh / 2, kw / 2], [1, 1], 1)
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input of shape `[batch, in_channels, height, width]`
    /// * `valid` - Map of valid inputs, shape `[1 or batch, 1 or in_channels, height, width]`.
    ///   A single-channel map applies to every input channel.
    pub fn forward(&self, x: Tensor<B, 4>, valid: Tensor<B, 4>) -> Tensor<B, 4> {
        let [kh, kw] = self.kernel_size;
        let [_, in_channels, _, _] = x.dims();
        let device = x.device();

        let valid = match valid.dims()[1] {
            1 => valid.repeat_dim(1, in_channels),
            _ => valid,
        };

        let raw = conv2d(
            x * valid.clone(),
            self.conv.weight.val(),
            None,
            self.options(),
        );

        let window = Tensor::ones([1, in_channels, kh, kw], &device);
        let coverage = conv2d(valid, window, None, self.options());
        let covered = coverage.clone().greater_elem(0.0).float();
        let ratio = coverage.clamp_min(1.0).recip() * ((in_channels * kh * kw) as f64);

        let out = raw * ratio;
        let out = match &self.conv.bias {
            Some(bias) => {
                let bias = bias.val();
                let [out_channels] = bias.dims();
                out + bias.reshape([1, out_channels, 1, 1])
            }
            None => out,
        };

        out * covered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::checkerboard_mask;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_all_valid_matches_plain_conv() {
        let device = Default::default();
        let pconv = PartialConv2d::<TestBackend>::new([3, 5], [3, 3], &device);

        let x = Tensor::random([2, 3, 6, 6], Distribution::Normal(0.0, 1.0), &device);
        let valid = Tensor::ones([1, 1, 6, 6], &device);

        // Borders have partial windows even when every position is valid, so
        // compare the interior only.
        let partial = pconv.forward(x.clone(), valid).slice([0..2, 0..5, 1..5, 1..5]);
        let plain = pconv.conv.forward(x).slice([0..2, 0..5, 1..5, 1..5]);

        let diff: f32 = (partial - plain).abs().max().into_scalar();
        assert!(diff < 1e-4, "max diff {diff}");
    }

    #[test]
    fn test_ignores_invalid_positions() {
        let device = Default::default();
        let pconv = PartialConv2d::<TestBackend>::new([1, 2], [3, 3], &device);
        let valid = checkerboard_mask::<TestBackend>(4, 4, false, &device);

        let x = Tensor::random([1, 1, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        let noise = Tensor::random([1, 1, 4, 4], Distribution::Normal(0.0, 5.0), &device);
        let perturbed = x.clone() + noise * (valid.clone().neg() + 1.0);

        let a = pconv.forward(x, valid.clone());
        let b = pconv.forward(perturbed, valid);

        let diff: f32 = (a - b).abs().max().into_scalar();
        assert!(diff < 1e-5, "max diff {diff}");
    }

    #[test]
    fn test_per_channel_valid_map() {
        let device = Default::default();
        let pconv = PartialConv2d::<TestBackend>::new([2, 3], [3, 3], &device);
        let checker = checkerboard_mask::<TestBackend>(4, 4, false, &device);
        let holes = checker.clone().neg() + 1.0;
        let valid = Tensor::cat(vec![checker, Tensor::ones([1, 1, 4, 4], &device)], 1);

        let x = Tensor::random([1, 2, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        let noise = Tensor::random([1, 1, 4, 4], Distribution::Normal(0.0, 5.0), &device) * holes;
        let zeros = Tensor::zeros([1, 1, 4, 4], &device);

        let base = pconv.forward(x.clone(), valid.clone());
        let masked_changed = pconv.forward(
            x.clone() + Tensor::cat(vec![noise.clone(), zeros.clone()], 1),
            valid.clone(),
        );
        let open_changed = pconv.forward(x + Tensor::cat(vec![zeros, noise], 1), valid);

        let masked_diff: f32 = (masked_changed - base.clone()).abs().max().into_scalar();
        let open_diff: f32 = (open_changed - base).abs().max().into_scalar();
        assert!(masked_diff < 1e-5, "masked channel leaked: {masked_diff}");
        assert!(open_diff > 1e-3, "always-valid channel ignored: {open_diff}");
    }
}
