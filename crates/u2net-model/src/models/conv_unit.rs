//! The conv → batch-norm → ReLU unit every RSU level is made of, plus the
//! resampling helpers shared by the blocks.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::module::max_pool2d,
};

/// Configuration for a [`ConvUnit`].
#[derive(Config, Debug)]
pub struct ConvUnitConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels.
    pub out_channels: usize,
    /// Dilation of the 3x3 kernel. Padding follows it so size is preserved.
    #[config(default = "1")]
    pub dilation: usize,
}

impl ConvUnitConfig {
    /// Initializes a new [`ConvUnit`].
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ConvUnit<B> {
        let d = self.dilation;
        ConvUnit {
            conv: Conv2dConfig::new([self.in_channels, self.out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(d, d))
                .with_dilation([d, d])
                .init(device),
            norm: BatchNormConfig::new(self.out_channels).init(device),
            activation: Relu::new(),
        }
    }
}

/// 3x3 (optionally dilated) convolution followed by batch norm and ReLU.
///
/// # Shapes
///   - Input: `[batch, in_channels, height, width]`
///   - Output: `[batch, out_channels, height, width]`
#[derive(Module, Debug)]
pub struct ConvUnit<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> ConvUnit<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }
}

/// 2x2, stride 2 max-pool that rounds the output size up on odd inputs.
///
/// An odd trailing row or column is replicated before pooling, so the last
/// window sees only real pixels, matching ceil-mode pooling.
pub(crate) fn max_pool_ceil<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();

    let x = if height % 2 == 1 {
        let last_row = x
            .clone()
            .slice([0..batch, 0..channels, height - 1..height, 0..width]);
        Tensor::cat(vec![x, last_row], 2)
    } else {
        x
    };
    let height = x.dims()[2];
    let x = if width % 2 == 1 {
        let last_col = x
            .clone()
            .slice([0..batch, 0..channels, 0..height, width - 1..width]);
        Tensor::cat(vec![x, last_col], 3)
    } else {
        x
    };

    max_pool2d(x, [2, 2], [2, 2], [0, 0], [1, 1])
}

/// Bilinearly resizes `x` to the spatial size of `target`.
///
/// Returns `x` untouched when the sizes already agree.
pub(crate) fn resize_like<B: Backend>(x: Tensor<B, 4>, target: &Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = target.dims();
    resize_bilinear(x, [height, width])
}

/// Bilinearly resizes `x` to `[height, width]`.
///
/// Samples on the half-pixel grid (`align_corners = false`), which the
/// pretrained weights expect.
pub fn resize_bilinear<B: Backend>(x: Tensor<B, 4>, [height, width]: [usize; 2]) -> Tensor<B, 4> {
    let [batch, channels, x_height, x_width] = x.dims();
    if (x_height, x_width) == (height, width) {
        return x;
    }

    let device = x.device();
    let columns = bilinear_weights::<B>(x_width, width, &device);
    let rows = bilinear_weights::<B>(x_height, height, &device);

    // Resample the width, then swap axes and resample the height.
    let x = x
        .reshape([batch * channels * x_height, x_width])
        .matmul(columns.transpose())
        .reshape([batch, channels, x_height, width])
        .swap_dims(2, 3)
        .reshape([batch * channels * width, x_height])
        .matmul(rows.transpose());

    x.reshape([batch, channels, width, height]).swap_dims(2, 3)
}

/// `[output, input]` matrix of linear interpolation weights on the
/// half-pixel grid. Sources left of the first pixel clamp to it.
fn bilinear_weights<B: Backend>(input: usize, output: usize, device: &Device<B>) -> Tensor<B, 2> {
    let scale = input as f32 / output as f32;
    let mut weights = vec![0.0_f32; output * input];

    for (i, row) in weights.chunks_exact_mut(input).enumerate() {
        let source = (scale * (i as f32 + 0.5) - 0.5).max(0.0);
        let lower = (source as usize).min(input - 1);
        let upper = (lower + 1).min(input - 1);
        let lambda = source - lower as f32;
        row[lower] += 1.0 - lambda;
        row[upper] += lambda;
    }

    Tensor::from_data(TensorData::new(weights, [output, input]), device)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::tests::TestBackend;

    #[rstest]
    #[case::even(8, 6, 4, 3)]
    #[case::odd_height(7, 6, 4, 3)]
    #[case::odd_width(8, 5, 4, 3)]
    #[case::odd_both(5, 3, 3, 2)]
    #[case::single_pixel(1, 1, 1, 1)]
    fn ceil_pool_rounds_up(
        #[case] height: usize,
        #[case] width: usize,
        #[case] expected_height: usize,
        #[case] expected_width: usize,
    ) {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 2, height, width], &device);

        let pooled = max_pool_ceil(x);

        assert_eq!(pooled.dims(), [1, 2, expected_height, expected_width]);
    }

    #[test]
    fn ceil_pool_keeps_border_maximum() {
        let device = Default::default();
        // Largest value sits in the last, unpaired column.
        let x = Tensor::<TestBackend, 4>::from_floats([[[[0.0, 1.0, 9.0], [2.0, 3.0, 4.0]]]], &device);

        let pooled: Vec<f32> = max_pool_ceil(x).into_data().to_vec().unwrap();

        assert_eq!(pooled, vec![3.0, 9.0]);
    }

    #[test]
    fn conv_unit_preserves_size_with_dilation() {
        let device = Default::default();
        let unit = ConvUnitConfig::new(3, 5)
            .with_dilation(4)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 9, 11], &device);

        assert_eq!(unit.forward(x).dims(), [1, 5, 9, 11]);
    }

    #[test]
    fn resize_like_is_identity_on_equal_sizes() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0], [3.0, 4.0]]]], &device);
        let target = Tensor::<TestBackend, 4>::zeros([1, 7, 2, 2], &device);

        let resized: Vec<f32> = resize_like(x, &target).into_data().to_vec().unwrap();

        assert_eq!(resized, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn resize_like_samples_half_pixel_grid() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[0.0, 1.0]]]], &device);
        let target = Tensor::<TestBackend, 4>::zeros([1, 1, 1, 4], &device);

        let resized: Vec<f32> = resize_like(x, &target).into_data().to_vec().unwrap();

        for (value, expected) in resized.iter().zip([0.0, 0.25, 0.75, 1.0]) {
            assert!((value - expected).abs() < 1e-6, "{resized:?}");
        }
    }

    #[test]
    fn resize_like_upsamples_both_axes() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats(
            [[[[1.0, 2.0], [3.0, 4.0]]], [[[5.0, 5.0], [5.0, 5.0]]]],
            &device,
        );
        let target = Tensor::<TestBackend, 4>::zeros([2, 1, 3, 4], &device);

        let resized = resize_like(x, &target);

        assert_eq!(resized.dims(), [2, 1, 3, 4]);
        let values: Vec<f32> = resized.into_data().to_vec().unwrap();
        // Corners keep the source corners; the constant map stays constant.
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!((values[11] - 4.0).abs() < 1e-6);
        assert!(values[12..].iter().all(|v| (v - 5.0).abs() < 1e-5));
    }
}
