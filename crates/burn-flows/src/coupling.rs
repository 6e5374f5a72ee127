//! Affine coupling layer
//!
//! The mask splits the features into a conditioning half (mask = 1), which
//! passes through unchanged, and a transformed half (mask = 0), which is
//! shifted and scaled by values the network predicts from the conditioning
//! half. The Jacobian is triangular, so its log-determinant is the sum of the
//! predicted log-scales.
//!
//! # Formula
//!
//! ```text
//! [s, t] = net(cat[x * m, m, cond])
//! s      = tanh(s / exp(f)) * exp(f) * (1 - m)
//! t      = t * (1 - m)
//! z      = (x + t) * exp(s)          logdet += Σ s
//! x      = z * exp(-s) - t           logdet -= Σ s
//! ```
//!
//! `f` is a learnable per-channel factor bounding the log-scale.

use burn::module::Param;
use burn::prelude::*;

use burn_flows_core::gated::{GatedConvNet, GatedLinearNet, split_channels};
use burn_flows_core::mask::{MaskKind, invert_mask, mask_kind, spatial_support};
use burn_flows_core::numerics::sum_except_batch;

use crate::error::{FlowError, FlowResult};
use crate::transform::{Direction, FlowOutput, FlowTransform, check_shape};

/// Network predicting the log-scale and translation of a coupling layer
#[derive(Module, Debug)]
pub enum CouplingNet<B: Backend> {
    Conv(GatedConvNet<B>),
    Linear(GatedLinearNet<B>),
}

impl<B: Backend> CouplingNet<B> {
    fn forward(&self, x: Tensor<B, 4>, valid: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            CouplingNet::Conv(net) => net.forward_masked(x, valid),
            CouplingNet::Linear(net) => net.forward(x),
        }
    }

    /// Channels the network expects as input
    pub fn in_channels(&self) -> usize {
        match self {
            CouplingNet::Conv(net) => net.c_in,
            CouplingNet::Linear(net) => net.in_shape[0],
        }
    }

    /// Channels the network produces
    pub fn out_channels(&self) -> usize {
        match self {
            CouplingNet::Conv(net) => net.c_out,
            CouplingNet::Linear(net) => net.c_out,
        }
    }

    /// Spatial size the network is bound to, if any
    pub fn spatial_size(&self) -> Option<[usize; 2]> {
        match self {
            CouplingNet::Conv(_) => None,
            CouplingNet::Linear(net) => Some([net.in_shape[1], net.in_shape[2]]),
        }
    }
}

impl<B: Backend> From<GatedConvNet<B>> for CouplingNet<B> {
    fn from(net: GatedConvNet<B>) -> Self {
        CouplingNet::Conv(net)
    }
}

impl<B: Backend> From<GatedLinearNet<B>> for CouplingNet<B> {
    fn from(net: GatedLinearNet<B>) -> Self {
        CouplingNet::Linear(net)
    }
}

/// Affine coupling layer with a fixed mask
#[derive(Module, Debug)]
pub struct CouplingLayer<B: Backend> {
    /// Predicts `[log-scale, translation]` from the conditioning half
    pub network: CouplingNet<B>,
    /// Log of the per-channel bound on the log-scale, initialized to zero
    pub scaling_factor: Param<Tensor<B, 1>>,
    /// Fixed binary mask, `[1, c or 1, h or 1, w or 1]`; not trainable
    pub mask: Tensor<B, 4>,
    #[module(skip)]
    pub c_in: usize,
}

impl<B: Backend> CouplingLayer<B> {
    /// Creates a coupling layer
    ///
    /// The network must accept `c_in + mask channels (+ condition channels)`
    /// inputs and produce `2 * c_in` outputs; this is checked when the layer is
    /// placed into a flow.
    ///
    /// # Arguments
    ///
    /// * `network` - Gated network predicting scale and translation
    /// * `mask` - Checkerboard or channel mask
    /// * `c_in` - Channels of the transformed features
    /// * `device` - Device to create the scaling factor on
    pub fn new(
        network: impl Into<CouplingNet<B>>,
        mask: Tensor<B, 4>,
        c_in: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            network: network.into(),
            scaling_factor: Param::from_tensor(Tensor::zeros([c_in], device)),
            mask: mask.to_device(device),
            c_in,
        }
    }

    fn mask_channels(&self) -> usize {
        self.mask.dims()[1]
    }

    /// Channels of the conditioning input the network expects besides the
    /// masked features and the mask indicator
    pub fn condition_channels(&self) -> usize {
        self.network
            .in_channels()
            .saturating_sub(self.c_in + self.mask_channels())
    }

    /// Checks that the layer accepts features of shape `[c, h, w]` together with
    /// a condition of `condition_channels` channels
    pub fn validate(&self, input: [usize; 3], condition_channels: usize) -> FlowResult<()> {
        let [c, h, w] = input;
        let [_, mc, mh, mw] = self.mask.dims();

        if c != self.c_in {
            return Err(FlowError::shape("CouplingLayer", &[self.c_in, h, w], &input));
        }
        let mask_fits = match mask_kind(&self.mask) {
            MaskKind::Checkerboard => [mh, mw] == [h, w],
            MaskKind::Channel => mc == c && [mh, mw] == [1, 1],
        };
        if !mask_fits {
            return Err(FlowError::shape("CouplingLayer mask", &[1, c, h, w], &[1, mc, mh, mw]));
        }

        let expected_in = c + mc + condition_channels;
        if self.network.in_channels() != expected_in {
            return Err(FlowError::shape(
                "CouplingLayer network input",
                &[expected_in],
                &[self.network.in_channels()],
            ));
        }
        if self.network.out_channels() != 2 * c {
            return Err(FlowError::shape(
                "CouplingLayer network output",
                &[2 * c],
                &[self.network.out_channels()],
            ));
        }
        if let Some(size) = self.network.spatial_size()
            && size != [h, w]
        {
            return Err(FlowError::shape("CouplingLayer network", &size, &[h, w]));
        }

        Ok(())
    }

    /// Applies the coupling in the given direction
    ///
    /// # Arguments
    ///
    /// * `x` - Features, `[batch, c_in, h, w]`
    /// * `logdet` - Accumulated log-determinant, `[batch]`
    /// * `direction` - Forward (data to latent) or inverse
    /// * `condition` - Extra network input, e.g. the image in variational
    ///   dequantization
    pub fn transform(
        &self,
        x: Tensor<B, 4>,
        logdet: Tensor<B, 1>,
        direction: Direction,
        condition: Option<Tensor<B, 4>>,
    ) -> FlowResult<FlowOutput<B>> {
        let [batch, c, h, w] = x.dims();
        let condition_channels = condition.as_ref().map_or(0, |cond| cond.dims()[1]);
        self.validate([c, h, w], condition_channels)?;
        if let Some(cond) = &condition {
            check_shape("CouplingLayer condition", cond, [condition_channels, h, w])?;
        }

        let device = x.device();
        let mask = self.mask.clone();

        let x_masked = x.clone() * mask.clone();
        let indicator = Tensor::ones([batch, 1, h, w], &device) * mask.clone();
        let mut inputs = vec![x_masked, indicator];
        inputs.extend(condition);

        // Masked features and indicator are valid only where the mask keeps
        // them; the condition is valid everywhere.
        let support = spatial_support(&mask, h, w).repeat_dim(1, c + self.mask_channels());
        let mut valid = vec![support];
        if condition_channels > 0 {
            valid.push(Tensor::ones([1, condition_channels, h, w], &device));
        }

        let out = self
            .network
            .forward(Tensor::cat(inputs, 1), Tensor::cat(valid, 1));
        let (scale, translate) = split_channels(out);

        let s_fac = self.scaling_factor.val().exp().reshape([1, c, 1, 1]);
        let scale = (scale / s_fac.clone()).tanh() * s_fac;

        let transformed = invert_mask(mask);
        let scale = scale * transformed.clone();
        let translate = translate * transformed;

        let ldj = sum_except_batch(scale.clone());
        let output = match direction {
            Direction::Forward => ((x + translate) * scale.exp(), logdet + ldj),
            Direction::Inverse => (x * scale.neg().exp() - translate, logdet - ldj),
        };

        Ok(output)
    }
}

impl<B: Backend> FlowTransform<B> for CouplingLayer<B> {
    fn name(&self) -> &'static str {
        "CouplingLayer"
    }

    fn forward(&self, x: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        self.transform(x, logdet, Direction::Forward, None)
    }

    fn inverse(&self, z: Tensor<B, 4>, logdet: Tensor<B, 1>) -> FlowResult<FlowOutput<B>> {
        self.transform(z, logdet, Direction::Inverse, None)
    }

    fn output_shape(&self, input: [usize; 3]) -> FlowResult<[usize; 3]> {
        self.validate(input, 0)?;
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::nn::Initializer;
    use burn::tensor::Distribution;
    use burn_flows_core::gated::{GatedConvNetConfig, GatedLinearNetConfig};
    use burn_flows_core::mask::{channel_mask, checkerboard_mask};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    const TOLERANCE: f32 = 1e-4;

    fn random_init() -> Initializer {
        Initializer::Normal {
            mean: 0.0,
            std: 0.1,
        }
    }

    fn max_abs_diff<const D: usize>(a: Tensor<TestBackend, D>, b: Tensor<TestBackend, D>) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    fn assert_round_trip(layer: &CouplingLayer<TestBackend>, shape: [usize; 4]) {
        let device = Default::default();
        let x = Tensor::random(shape, Distribution::Normal(0.0, 1.0), &device);
        let logdet = Tensor::zeros([shape[0]], &device);

        let (z, ldj) = layer.forward(x.clone(), logdet).unwrap();
        assert!(max_abs_diff(z.clone(), x.clone()) > 1e-3, "layer acted as identity");

        let (x_rec, ldj_rec) = layer.inverse(z, ldj.clone()).unwrap();
        assert!(max_abs_diff(x_rec, x) < TOLERANCE);
        let ldj_rec: Vec<f32> = ldj_rec.into_data().to_vec().unwrap();
        assert!(ldj_rec.iter().all(|v| v.abs() < TOLERANCE), "{ldj_rec:?}");

        let ldj: Vec<f32> = ldj.into_data().to_vec().unwrap();
        assert!(ldj.iter().any(|v| v.abs() > 1e-4), "no log-det contribution");
    }

    #[test]
    fn test_checkerboard_conv_round_trip() {
        let device = Default::default();
        let net = GatedConvNetConfig::new(3)
            .with_hidden(8)
            .with_out_channels(4)
            .with_output_initializer(random_init())
            .init::<TestBackend>(&device);
        let mask = checkerboard_mask(6, 6, false, &device);
        let layer = CouplingLayer::<TestBackend>::new(net, mask, 2, &device);

        assert_round_trip(&layer, [3, 2, 6, 6]);
    }

    #[test]
    fn test_channel_mask_conv_round_trip() {
        let device = Default::default();
        let net = GatedConvNetConfig::new(8)
            .with_hidden(8)
            .with_out_channels(8)
            .with_output_initializer(random_init())
            .init::<TestBackend>(&device);
        let mask = channel_mask(4, true, &device);
        let layer = CouplingLayer::<TestBackend>::new(net, mask, 4, &device);

        assert_round_trip(&layer, [2, 4, 3, 3]);
    }

    #[test]
    fn test_partial_conv_round_trip() {
        let device = Default::default();
        let net = GatedConvNetConfig::new(2)
            .with_hidden(8)
            .with_out_channels(2)
            .with_partial_conv(true)
            .with_output_initializer(random_init())
            .init::<TestBackend>(&device);
        let mask = checkerboard_mask(4, 4, true, &device);
        let layer = CouplingLayer::<TestBackend>::new(net, mask, 1, &device);

        assert_round_trip(&layer, [2, 1, 4, 4]);
    }

    #[test]
    fn test_linear_round_trip() {
        let device = Default::default();
        let net = GatedLinearNetConfig::new([2, 4, 4])
            .with_hidden(16)
            .with_out_channels(2)
            .with_output_initializer(random_init())
            .init::<TestBackend>(&device);
        let mask = checkerboard_mask(4, 4, false, &device);
        let layer = CouplingLayer::<TestBackend>::new(net, mask, 1, &device);

        assert_round_trip(&layer, [2, 1, 4, 4]);
    }

    #[test]
    fn test_conditioning_half_is_unchanged() {
        let device = Default::default();
        let net = GatedConvNetConfig::new(2)
            .with_hidden(8)
            .with_out_channels(2)
            .with_output_initializer(random_init())
            .init::<TestBackend>(&device);
        let mask = checkerboard_mask::<TestBackend>(4, 4, false, &device);
        let layer = CouplingLayer::new(net, mask.clone(), 1, &device);

        let x = Tensor::random([2, 1, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        let (z, _) = layer.forward(x.clone(), Tensor::zeros([2], &device)).unwrap();

        assert!(max_abs_diff(z * mask.clone(), x * mask) < 1e-6);
    }

    #[test]
    fn test_fresh_layer_is_identity() {
        let device = Default::default();
        let net = GatedConvNetConfig::new(2)
            .with_hidden(8)
            .with_out_channels(2)
            .init::<TestBackend>(&device);
        let mask = checkerboard_mask(5, 5, false, &device);
        let layer = CouplingLayer::<TestBackend>::new(net, mask, 1, &device);

        let x = Tensor::random([2, 1, 5, 5], Distribution::Normal(0.0, 1.0), &device);
        let (z, ldj) = layer.forward(x.clone(), Tensor::zeros([2], &device)).unwrap();

        assert_eq!(max_abs_diff(z, x), 0.0);
        assert_eq!(ldj.abs().max().into_scalar(), 0.0);
    }

    #[test]
    fn test_conditioned_round_trip() {
        let device = Default::default();
        let net = GatedConvNetConfig::new(3)
            .with_hidden(8)
            .with_out_channels(2)
            .with_output_initializer(random_init())
            .init::<TestBackend>(&device);
        let mask = checkerboard_mask(4, 4, false, &device);
        let layer = CouplingLayer::<TestBackend>::new(net, mask, 1, &device);
        assert_eq!(layer.condition_channels(), 1);

        let x = Tensor::random([2, 1, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        let cond = Tensor::random([2, 1, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        let zero = Tensor::zeros([2], &device);

        let (z, ldj) = layer
            .transform(x.clone(), zero, Direction::Forward, Some(cond.clone()))
            .unwrap();
        let (x_rec, ldj) = layer
            .transform(z, ldj, Direction::Inverse, Some(cond))
            .unwrap();

        assert!(max_abs_diff(x_rec, x) < TOLERANCE);
        assert!(ldj.abs().max().into_scalar() < TOLERANCE);

        // The same layer without its condition is rejected
        assert!(layer.output_shape([1, 4, 4]).is_err());
    }

    #[test]
    fn test_partial_conv_reads_condition_at_transformed_positions() {
        let device = Default::default();
        let net = GatedConvNetConfig::new(3)
            .with_hidden(8)
            .with_out_channels(2)
            .with_partial_conv(true)
            .with_output_initializer(random_init())
            .init::<TestBackend>(&device);
        let mask = checkerboard_mask::<TestBackend>(4, 4, false, &device);
        let layer = CouplingLayer::new(net, mask.clone(), 1, &device);

        let x = Tensor::random([2, 1, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        let cond = Tensor::random([2, 1, 4, 4], Distribution::Normal(0.0, 1.0), &device);
        let shift = Tensor::random([2, 1, 4, 4], Distribution::Normal(0.0, 2.0), &device);
        let shifted = cond.clone() + shift * invert_mask(mask);

        let (a, _) = layer
            .transform(x.clone(), Tensor::zeros([2], &device), Direction::Forward, Some(cond))
            .unwrap();
        let (b, _) = layer
            .transform(x, Tensor::zeros([2], &device), Direction::Forward, Some(shifted))
            .unwrap();

        assert!(max_abs_diff(a, b) > 1e-4);
    }

    #[test]
    fn test_rejects_wrong_channels() {
        let device = Default::default();
        let net = GatedConvNetConfig::new(2)
            .with_hidden(4)
            .with_out_channels(2)
            .init::<TestBackend>(&device);
        let mask = checkerboard_mask(4, 4, false, &device);
        let layer = CouplingLayer::<TestBackend>::new(net, mask, 1, &device);

        let x = Tensor::zeros([1, 3, 4, 4], &device);
        let result = layer.forward(x, Tensor::zeros([1], &device));
        assert!(matches!(result, Err(FlowError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_rejects_wrong_mask_size() {
        let device = Default::default();
        let net = GatedConvNetConfig::new(2)
            .with_hidden(4)
            .with_out_channels(2)
            .init::<TestBackend>(&device);
        let mask = checkerboard_mask(4, 4, false, &device);
        let layer = CouplingLayer::<TestBackend>::new(net, mask, 1, &device);

        assert!(layer.output_shape([1, 4, 4]).is_ok());
        assert!(layer.output_shape([1, 8, 8]).is_err());
    }
}
