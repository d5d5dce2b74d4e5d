//! The U²-Net network.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::sigmoid,
};

use super::{
    conv_unit::{max_pool_ceil, resize_like},
    rsu::{Rsu, RsuConfig},
};
use crate::{
    config::U2NetVariant,
    error::{U2NetError, U2NetResult},
};

/// Configuration for the [`U2Net`] network.
#[derive(Config, Debug)]
pub struct U2NetConfig {
    /// Which published weight layout to build.
    #[config(default = "U2NetVariant::Full")]
    pub variant: U2NetVariant,
    /// Number of image channels.
    #[config(default = "3")]
    pub in_channels: usize,
    /// Number of channels of every saliency map.
    #[config(default = "1")]
    pub out_channels: usize,
}

impl U2NetConfig {
    /// Initializes a new [`U2Net`] network.
    ///
    /// # Errors
    ///
    /// Returns [`U2NetError::InvalidConfiguration`] if a channel count is zero.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> U2NetResult<U2Net<B>> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(U2NetError::InvalidConfiguration {
                reason: format!(
                    "U2Net channels must be non-zero, got in={} out={}",
                    self.in_channels, self.out_channels
                ),
            });
        }

        let build = |spec: &crate::config::StageSpec| {
            RsuConfig::from_depth(
                spec.depth,
                spec.in_channels,
                spec.mid_channels,
                spec.out_channels,
            )
            .init(device)
        };

        let encoder = self
            .variant
            .encoder_stages(self.in_channels)
            .iter()
            .map(build)
            .collect::<U2NetResult<Vec<_>>>()?;
        let decoder = self
            .variant
            .decoder_stages()
            .iter()
            .map(build)
            .collect::<U2NetResult<Vec<_>>>()?;

        let side = self
            .variant
            .side_channels()
            .into_iter()
            .map(|channels| {
                Conv2dConfig::new([channels, self.out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device)
            })
            .collect();
        let fuse = Conv2dConfig::new([6 * self.out_channels, self.out_channels], [1, 1]).init(device);

        Ok(U2Net {
            encoder,
            decoder,
            side,
            fuse,
            in_channels: self.in_channels,
        })
    }
}

/// The seven probability maps produced by one forward pass.
///
/// Every map has the input's spatial size and values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct SaliencyMaps<B: Backend> {
    /// Fused prediction. The only map used for matting.
    pub fused: Tensor<B, 4>,
    /// Side predictions 1 through 6, shallowest first.
    pub sides: Vec<Tensor<B, 4>>,
}

/// U²-Net: a two-level nested U-structure of residual U-blocks.
///
/// # Shapes
///   - Input: `[batch, in_channels, height, width]`
///   - Output: seven maps of `[batch, out_channels, height, width]`
#[derive(Module, Debug)]
pub struct U2Net<B: Backend> {
    encoder: Vec<Rsu<B>>,
    decoder: Vec<Rsu<B>>,
    side: Vec<Conv2d<B>>,
    fuse: Conv2d<B>,
    in_channels: usize,
}

impl<B: Backend> U2Net<B> {
    /// Runs the network on a batch of images.
    ///
    /// # Errors
    ///
    /// Returns [`U2NetError::InvalidTensorShape`] if the channel count of `x`
    /// does not match the configured input channels.
    pub fn forward(&self, x: Tensor<B, 4>) -> U2NetResult<SaliencyMaps<B>> {
        let [batch, channels, height, width] = x.dims();
        if channels != self.in_channels {
            return Err(U2NetError::InvalidTensorShape {
                expected: format!("[batch, {}, height, width]", self.in_channels),
                actual: format!("[{batch}, {channels}, {height}, {width}]"),
            });
        }

        let mut skips = Vec::with_capacity(self.encoder.len());
        let mut hx = x;
        for (index, stage) in self.encoder.iter().enumerate() {
            if index > 0 {
                hx = max_pool_ceil(hx);
            }
            hx = stage.forward(hx);
            skips.push(hx.clone());
        }

        // The deepest stage seeds the decoder and feeds the last side head.
        let Some(deepest) = skips.pop() else {
            return Err(U2NetError::InvalidConfiguration {
                reason: "U2Net has no encoder stages".to_string(),
            });
        };

        let mut decoded = Vec::with_capacity(self.decoder.len() + 1);
        let mut hd = deepest.clone();
        for (stage, skip) in self.decoder.iter().rev().zip(skips.into_iter().rev()) {
            let upsampled = resize_like(hd, &skip);
            hd = stage.forward(Tensor::cat(vec![upsampled, skip], 1));
            decoded.push(hd.clone());
        }
        decoded.reverse();
        decoded.push(deepest);

        let mut sides = Vec::with_capacity(self.side.len());
        for (head, feature) in self.side.iter().zip(decoded) {
            let map = head.forward(feature);
            let map = match sides.first() {
                Some(reference) => resize_like(map, reference),
                None => map,
            };
            sides.push(map);
        }

        let fused = self.fuse.forward(Tensor::cat(sides.clone(), 1));

        Ok(SaliencyMaps {
            fused: sigmoid(fused),
            sides: sides.into_iter().map(sigmoid).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;
    use rstest::rstest;

    use super::*;
    use crate::tests::TestBackend;

    fn lite(device: &<TestBackend as Backend>::Device) -> U2Net<TestBackend> {
        U2NetConfig::new()
            .with_variant(U2NetVariant::Lite)
            .init(device)
            .unwrap()
    }

    #[rstest]
    #[case::square(32, 32)]
    #[case::odd(35, 29)]
    fn produces_seven_maps_at_input_size(#[case] height: usize, #[case] width: usize) {
        let device = Default::default();
        let model = lite(&device);
        let x = Tensor::random([1, 3, height, width], Distribution::Default, &device);

        let maps = model.forward(x).unwrap();

        assert_eq!(maps.fused.dims(), [1, 1, height, width]);
        assert_eq!(maps.sides.len(), 6);
        for side in &maps.sides {
            assert_eq!(side.dims(), [1, 1, height, width]);
        }
    }

    #[test]
    fn maps_are_probabilities() {
        let device = Default::default();
        let model = lite(&device);
        let x = Tensor::random([1, 3, 24, 24], Distribution::Default, &device);

        let maps = model.forward(x).unwrap();

        for map in std::iter::once(maps.fused).chain(maps.sides) {
            let values: Vec<f32> = map.into_data().to_vec().unwrap();
            assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn forward_is_deterministic() {
        let device = Default::default();
        let model = lite(&device);
        let x = Tensor::<TestBackend, 4>::random([1, 3, 20, 28], Distribution::Default, &device);

        let first: Vec<f32> = model.forward(x.clone()).unwrap().fused.into_data().to_vec().unwrap();
        let second: Vec<f32> = model.forward(x).unwrap().fused.into_data().to_vec().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let device = Default::default();
        let model = lite(&device);
        let x = Tensor::zeros([1, 4, 16, 16], &device);

        assert!(matches!(
            model.forward(x),
            Err(U2NetError::InvalidTensorShape { .. })
        ));
    }

    #[test]
    fn rejects_zero_channels() {
        let device = Default::default();
        let result = U2NetConfig::new()
            .with_in_channels(0)
            .init::<TestBackend>(&device);

        assert!(result.is_err());
    }
}
