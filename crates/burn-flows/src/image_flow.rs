//! Composed normalizing flow over images
//!
//! An [`ImageFlow`] chains [`FlowLayer`]s from pixels to a latent that is
//! scored under a standard normal prior. The forward direction gives exact
//! log-likelihoods; the inverse direction turns prior samples into images.
//!
//! # Example
//!
//! ```ignore
//! let (flow, _) = create_flow::<B>(&FlowConfig::default(), &device)?;
//!
//! // Bits per dimension for each image in the batch
//! let bpd = flow.log_likelihood(images)?;
//!
//! // Four new images
//! let samples = flow.sample([4, 1, 28, 28], None, &device)?;
//! ```

use std::f64::consts::LN_2;

use burn::prelude::*;

use burn_flows_core::numerics::{
    log_sum_exp, standard_normal, standard_normal_log_prob, sum_except_batch,
};

use crate::config::SampleShapeFactor;
use crate::error::{FlowError, FlowResult};
use crate::transform::{FlowLayer, FlowOutput, FlowTransform, check_shape};

/// Ordered stack of flow layers with a standard normal prior
#[derive(Module, Debug)]
pub struct ImageFlow<B: Backend> {
    /// Layers in data-to-latent order
    pub layers: Vec<FlowLayer<B>>,
    #[module(skip)]
    image_shape: [usize; 3],
    #[module(skip)]
    latent_shape: [usize; 3],
}

impl<B: Backend> ImageFlow<B> {
    /// Composes `layers` into a flow over images of shape `[c, h, w]`
    ///
    /// The shape is threaded through every layer, so a layer that cannot
    /// accept its input fails here rather than on the first batch.
    pub fn new(layers: Vec<FlowLayer<B>>, image_shape: [usize; 3]) -> FlowResult<Self> {
        if image_shape.contains(&0) {
            return Err(FlowError::InvalidConfig(format!(
                "image shape {image_shape:?} has an empty dimension"
            )));
        }

        let mut shape = image_shape;
        for (index, layer) in layers.iter().enumerate() {
            let next = layer.output_shape(shape)?;
            tracing::trace!(index, layer = layer.name(), ?shape, ?next, "validated flow layer");
            shape = next;
        }
        tracing::debug!(layers = layers.len(), ?image_shape, latent_shape = ?shape, "composed flow");

        Ok(Self {
            layers,
            image_shape,
            latent_shape: shape,
        })
    }

    /// Per-sample image shape `[c, h, w]`
    pub fn image_shape(&self) -> [usize; 3] {
        self.image_shape
    }

    /// Per-sample latent shape `[c, h, w]` after all layers
    pub fn latent_shape(&self) -> [usize; 3] {
        self.latent_shape
    }

    /// Number of image dimensions, `c * h * w`
    pub fn dimensions(&self) -> usize {
        self.image_shape.iter().product()
    }

    /// Ratio between the latent and the image shape, `[1, c, h, w]`
    pub fn sample_shape_factor(&self) -> SampleShapeFactor {
        let [c, h, w] = self.image_shape;
        let [lc, lh, lw] = self.latent_shape;
        SampleShapeFactor([
            1.0,
            lc as f64 / c as f64,
            lh as f64 / h as f64,
            lw as f64 / w as f64,
        ])
    }

    /// Runs the forward pass
    ///
    /// # Arguments
    ///
    /// * `imgs` - Pixel values in `[0, 255]`, `[batch, c, h, w]`
    ///
    /// # Returns
    ///
    /// The latent and the accumulated log-determinant, `[batch]`
    pub fn encode(&self, imgs: Tensor<B, 4, Int>) -> FlowResult<FlowOutput<B>> {
        check_shape("ImageFlow", &imgs, self.image_shape)?;

        let [batch, ..] = imgs.dims();
        let logdet = Tensor::zeros([batch], &imgs.device());
        let mut out = (imgs.float(), logdet);
        for layer in &self.layers {
            out = layer.forward(out.0, out.1)?;
        }
        Ok(out)
    }

    /// Log-likelihood of each image in nats, `[batch]`
    pub fn log_px(&self, imgs: Tensor<B, 4, Int>) -> FlowResult<Tensor<B, 1>> {
        let (z, logdet) = self.encode(imgs)?;
        Ok(sum_except_batch(standard_normal_log_prob(z)) + logdet)
    }

    fn to_bpd(&self, log_px: Tensor<B, 1>) -> Tensor<B, 1> {
        log_px.neg().div_scalar(LN_2 * self.dimensions() as f64)
    }

    /// Bits per dimension of each image, `[batch]`
    ///
    /// `-log p(x) / (ln 2 * c * h * w)`. This is the training objective;
    /// lower is better.
    pub fn log_likelihood(&self, imgs: Tensor<B, 4, Int>) -> FlowResult<Tensor<B, 1>> {
        Ok(self.to_bpd(self.log_px(imgs)?))
    }

    /// Bits per dimension averaged over the batch, `[1]`
    pub fn mean_bpd(&self, imgs: Tensor<B, 4, Int>) -> FlowResult<Tensor<B, 1>> {
        Ok(self.log_likelihood(imgs)?.mean())
    }

    /// Bits per dimension estimated with several dequantization draws
    ///
    /// Averages the likelihood (not the log-likelihood) over `num_samples`
    /// forward passes, which tightens the bound dequantization introduces.
    pub fn importance_bpd(
        &self,
        imgs: Tensor<B, 4, Int>,
        num_samples: usize,
    ) -> FlowResult<Tensor<B, 1>> {
        if num_samples == 0 {
            return Err(FlowError::InvalidConfig(
                "importance sampling needs at least one sample".to_string(),
            ));
        }

        let [batch, ..] = imgs.dims();
        let samples = (0..num_samples)
            .map(|_| self.log_px(imgs.clone()).map(|lp| lp.reshape([1, batch])))
            .collect::<FlowResult<Vec<_>>>()?;

        let log_px = log_sum_exp(Tensor::cat(samples, 0), 0)
            .reshape([batch])
            .sub_scalar((num_samples as f64).ln());

        Ok(self.to_bpd(log_px))
    }

    /// Generates images by running the flow in reverse
    ///
    /// # Arguments
    ///
    /// * `shape` - Latent shape including the batch, `[batch, c, h, w]`
    /// * `z_init` - Latent to decode; drawn from the prior when `None`
    ///
    /// # Returns
    ///
    /// Pixel values in `[0, 255]`
    pub fn sample(
        &self,
        shape: [usize; 4],
        z_init: Option<Tensor<B, 4>>,
        device: &B::Device,
    ) -> FlowResult<Tensor<B, 4, Int>> {
        let [batch, c, h, w] = shape;
        if [c, h, w] != self.latent_shape {
            return Err(FlowError::shape("ImageFlow latent", &self.latent_shape, &[c, h, w]));
        }

        let z = match z_init {
            Some(z) => {
                if z.dims() != shape {
                    return Err(FlowError::shape("ImageFlow latent", &shape, &z.dims()));
                }
                z
            }
            None => standard_normal(shape, device),
        };

        let logdet = Tensor::zeros([batch], &z.device());
        let mut out = (z, logdet);
        for layer in self.layers.iter().rev() {
            out = layer.inverse(out.0, out.1)?;
        }

        Ok(out.0.int())
    }

    /// Decodes `num_steps` linear blends between the latents of two images
    ///
    /// Step `i` decodes `z_a * (1 - t) + z_b * t` with `t = i / (num_steps - 1)`,
    /// so the first step reconstructs `img_a` and the last one `img_b`.
    ///
    /// # Arguments
    ///
    /// * `img_a`, `img_b` - Single images, `[1, c, h, w]`
    /// * `num_steps` - Number of decoded images, at least 2
    pub fn interpolate(
        &self,
        img_a: Tensor<B, 4, Int>,
        img_b: Tensor<B, 4, Int>,
        num_steps: usize,
    ) -> FlowResult<Tensor<B, 4, Int>> {
        if num_steps < 2 {
            return Err(FlowError::InvalidConfig(format!(
                "interpolation needs at least 2 steps, got {num_steps}"
            )));
        }
        for img in [&img_a, &img_b] {
            let [batch, c, h, w] = img.dims();
            if batch != 1 {
                return Err(FlowError::shape("ImageFlow interpolate", &[1, c, h, w], &img.dims()));
            }
        }

        let device = img_a.device();
        let (z, _) = self.encode(Tensor::cat(vec![img_a, img_b], 0))?;
        let [_, c, h, w] = z.dims();
        let z_a = z.clone().narrow(0, 0, 1);
        let z_b = z.narrow(0, 1, 1);

        let last = (num_steps - 1) as f64;
        let alpha: Vec<f32> = (0..num_steps).map(|i| (i as f64 / last) as f32).collect();
        let alpha = Tensor::<B, 4>::from_data(TensorData::new(alpha, [num_steps, 1, 1, 1]), &device);

        let z = z_a * alpha.clone().neg().add_scalar(1.0) + z_b * alpha;
        self.sample([num_steps, c, h, w], Some(z), &device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dequantization::Dequantization;
    use crate::multiscale::{SplitFlow, SqueezeFlow};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn squeeze_split_flow() -> ImageFlow<TestBackend> {
        let layers = vec![
            Dequantization::default().into(),
            SqueezeFlow.into(),
            SplitFlow.into(),
        ];
        ImageFlow::new(layers, [1, 4, 4]).unwrap()
    }

    #[test]
    fn test_latent_shape_and_factor() {
        let flow = squeeze_split_flow();
        assert_eq!(flow.image_shape(), [1, 4, 4]);
        assert_eq!(flow.latent_shape(), [2, 2, 2]);
        assert_eq!(flow.sample_shape_factor().0, [1.0, 2.0, 0.5, 0.5]);
    }

    #[test]
    fn test_construction_rejects_bad_chain() {
        let layers: Vec<FlowLayer<TestBackend>> = vec![SqueezeFlow.into(), SqueezeFlow.into()];
        assert!(ImageFlow::new(layers, [1, 6, 6]).is_err());

        let layers: Vec<FlowLayer<TestBackend>> = vec![SplitFlow.into()];
        assert!(ImageFlow::new(layers, [1, 4, 4]).is_err());

        let layers: Vec<FlowLayer<TestBackend>> = vec![Dequantization::default().into()];
        assert!(matches!(
            ImageFlow::new(layers, [0, 4, 4]),
            Err(FlowError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_encode_rejects_wrong_image_shape() {
        let device = Default::default();
        let flow = squeeze_split_flow();
        let imgs = Tensor::<TestBackend, 4, Int>::zeros([2, 1, 6, 4], &device);

        assert!(matches!(
            flow.encode(imgs),
            Err(FlowError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_bpd_is_positive_and_per_sample() {
        let device = Default::default();
        let flow = squeeze_split_flow();
        let imgs = Tensor::<TestBackend, 4, Int>::full([3, 1, 4, 4], 100, &device);

        let bpd = flow.log_likelihood(imgs.clone()).unwrap();
        assert_eq!(bpd.dims(), [3]);

        let bpd: Vec<f32> = bpd.into_data().to_vec().unwrap();
        assert!(bpd.iter().all(|v| v.is_finite() && *v > 0.0));

        let mean: f32 = flow.mean_bpd(imgs).unwrap().into_scalar();
        assert!(mean.is_finite());
    }

    #[test]
    fn test_importance_bpd() {
        let device = Default::default();
        let flow = squeeze_split_flow();
        let imgs = Tensor::<TestBackend, 4, Int>::full([2, 1, 4, 4], 42, &device);

        let bpd = flow.importance_bpd(imgs.clone(), 4).unwrap();
        assert_eq!(bpd.dims(), [2]);
        assert!(burn_flows_core::numerics::all_finite(bpd));

        assert!(flow.importance_bpd(imgs, 0).is_err());
    }

    #[test]
    fn test_sample_range_and_shape() {
        let device = Default::default();
        let flow = squeeze_split_flow();

        let imgs = flow.sample([5, 2, 2, 2], None, &device).unwrap();
        assert_eq!(imgs.dims(), [5, 1, 4, 4]);

        let values: Vec<i64> = imgs.into_data().iter::<i64>().collect();
        assert!(values.iter().all(|v| (0..=255).contains(v)));
    }

    #[test]
    fn test_sample_rejects_wrong_latent_shape() {
        let device = Default::default();
        let flow = squeeze_split_flow();

        assert!(flow.sample([1, 1, 4, 4], None, &device).is_err());

        let z = Tensor::zeros([2, 2, 2, 2], &device);
        assert!(flow.sample([3, 2, 2, 2], Some(z), &device).is_err());
    }

    #[test]
    fn test_interpolate_returns_every_step() {
        let device = Default::default();
        let flow = ImageFlow::<TestBackend>::new(vec![Dequantization::default().into()], [1, 4, 4])
            .unwrap();
        let a = Tensor::<TestBackend, 4, Int>::full([1, 1, 4, 4], 10, &device);
        let b = Tensor::<TestBackend, 4, Int>::full([1, 1, 4, 4], 200, &device);

        let steps = flow.interpolate(a, b, 5).unwrap();
        assert_eq!(steps.dims(), [5, 1, 4, 4]);

        let values: Vec<i64> = steps.into_data().iter::<i64>().collect();
        assert!(values[..16].iter().all(|v| *v == 10));
        assert!(values[64..].iter().all(|v| *v == 200));
    }
}
