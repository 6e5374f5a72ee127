//! Binary partition masks for coupling layers
//!
//! A coupling layer keeps the features where the mask is 1 fixed and transforms
//! the features where it is 0. Two partitions are provided:
//!
//! - [`checkerboard_mask`] alternates per spatial position, shape `[1, 1, H, W]`
//! - [`channel_mask`] splits the channel axis in half, shape `[1, C, 1, 1]`
//!
//! Both broadcast against `[batch, channels, height, width]` feature maps and
//! contain only the values 0 and 1.

use burn::prelude::*;

/// Which partition a mask implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
    /// Alternating spatial pattern, `(h + w) mod 2`
    Checkerboard,
    /// First half of the channels vs. the second half
    Channel,
}

/// Creates a checkerboard mask of shape `[1, 1, height, width]`
///
/// Position `(h, w)` holds `(h + w) mod 2`, or its complement when `invert` is set.
///
/// # Arguments
///
/// * `height` - Spatial height of the feature maps
/// * `width` - Spatial width of the feature maps
/// * `invert` - Return the complementary mask
/// * `device` - Device to create the mask on
pub fn checkerboard_mask<B: Backend>(
    height: usize,
    width: usize,
    invert: bool,
    device: &B::Device,
) -> Tensor<B, 4> {
    let values: Vec<f32> = (0..height)
        .flat_map(|h| (0..width).map(move |w| ((h + w) % 2) as f32))
        .collect();
    let mask = Tensor::from_data(TensorData::new(values, [1, 1, height, width]), device);

    if invert { invert_mask(mask) } else { mask }
}

/// Creates a channel mask of shape `[1, channels, 1, 1]`
///
/// The first `channels / 2` channels (floor division) are 1, the rest 0.
/// With an odd channel count the second half is the larger one.
///
/// # Arguments
///
/// * `channels` - Number of feature channels
/// * `invert` - Return the complementary mask
/// * `device` - Device to create the mask on
pub fn channel_mask<B: Backend>(channels: usize, invert: bool, device: &B::Device) -> Tensor<B, 4> {
    let split = channels / 2;
    let values: Vec<f32> = (0..channels)
        .map(|c| if c < split { 1.0 } else { 0.0 })
        .collect();
    let mask = Tensor::from_data(TensorData::new(values, [1, channels, 1, 1]), device);

    if invert { invert_mask(mask) } else { mask }
}

/// Complements a binary mask: `1 - mask`
pub fn invert_mask<B: Backend, const D: usize>(mask: Tensor<B, D>) -> Tensor<B, D> {
    mask.neg().add_scalar(1.0)
}

/// Classifies a mask by its shape
///
/// Masks with a singleton channel axis are spatial (checkerboard), everything
/// else partitions channels.
pub fn mask_kind<B: Backend>(mask: &Tensor<B, 4>) -> MaskKind {
    let [_, channels, _, _] = mask.dims();
    if channels == 1 {
        MaskKind::Checkerboard
    } else {
        MaskKind::Channel
    }
}

/// Spatial map of conditioning positions, shape `[1, 1, H, W]`
///
/// A position counts as conditioning when any channel of the mask keeps it.
/// Checkerboard masks return themselves; channel masks with at least one kept
/// channel return all ones.
pub fn spatial_support<B: Backend>(mask: &Tensor<B, 4>, height: usize, width: usize) -> Tensor<B, 4> {
    let device = mask.device();
    let support = mask.clone().max_dim(1);
    support * Tensor::ones([1, 1, height, width], &device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn values(mask: Tensor<TestBackend, 4>) -> Vec<f32> {
        mask.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_checkerboard_pattern() {
        let device = Default::default();
        let mask = checkerboard_mask::<TestBackend>(3, 4, false, &device);

        assert_eq!(mask.dims(), [1, 1, 3, 4]);
        assert_eq!(
            values(mask),
            vec![0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_checkerboard_invert_is_complement() {
        let device = Default::default();
        let mask = checkerboard_mask::<TestBackend>(5, 5, false, &device);
        let inverted = checkerboard_mask::<TestBackend>(5, 5, true, &device);

        assert_eq!(mask.dims(), inverted.dims());
        for (m, i) in values(mask.clone()).iter().zip(values(inverted.clone())) {
            assert_eq!(m + i, 1.0);
        }
        assert_eq!(values(invert_mask(mask)), values(inverted));
    }

    #[test]
    fn test_channel_mask_even() {
        let device = Default::default();
        let mask = channel_mask::<TestBackend>(4, false, &device);

        assert_eq!(mask.dims(), [1, 4, 1, 1]);
        assert_eq!(values(mask), vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_channel_mask_odd_uses_floor_split() {
        let device = Default::default();
        let mask = channel_mask::<TestBackend>(5, false, &device);
        let inverted = channel_mask::<TestBackend>(5, true, &device);

        assert_eq!(values(mask), vec![1.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(values(inverted), vec![0.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_invert_twice_is_identity() {
        let device = Default::default();
        for mask in [
            checkerboard_mask::<TestBackend>(6, 6, true, &device),
            channel_mask::<TestBackend>(8, false, &device),
        ] {
            let twice = invert_mask(invert_mask(mask.clone()));
            assert_eq!(values(twice), values(mask));
        }
    }

    #[test]
    fn test_mask_values_are_binary() {
        let device = Default::default();
        let mask = checkerboard_mask::<TestBackend>(7, 3, true, &device);
        assert!(values(mask).iter().all(|v| *v == 0.0 || *v == 1.0));
    }

    #[test]
    fn test_spatial_support() {
        let device = Default::default();
        let checker = checkerboard_mask::<TestBackend>(2, 2, false, &device);
        let channel = channel_mask::<TestBackend>(4, true, &device);

        assert_eq!(mask_kind(&checker), MaskKind::Checkerboard);
        assert_eq!(mask_kind(&channel), MaskKind::Channel);
        assert_eq!(
            values(spatial_support(&checker, 2, 2)),
            vec![0.0, 1.0, 1.0, 0.0]
        );
        assert_eq!(values(spatial_support(&channel, 2, 2)), vec![1.0; 4]);
    }
}
