//! Residual U-block.
//!
//! Each RSU is a small encoder-decoder with its own residual branch. All
//! depths share one implementation. The block is described by an ordered list
//! of [`RsuLevel`]s, shallowest first, with the dilated bottom level last.

use burn::{module::Ignored, prelude::*};

use super::conv_unit::{max_pool_ceil, resize_like, ConvUnit, ConvUnitConfig};
use crate::{
    config::RsuDepth,
    error::{U2NetError, U2NetResult},
};

/// One encoder level of a residual U-block.
#[derive(Config, Debug, PartialEq)]
pub struct RsuLevel {
    /// Working width of the level.
    pub channels: usize,
    /// Dilation of the level's convolution.
    #[config(default = "1")]
    pub dilation: usize,
    /// Whether a ceil-mode 2x max-pool follows the level.
    #[config(default = "false")]
    pub downsample: bool,
}

/// Configuration for the [`Rsu`] block.
#[derive(Config, Debug)]
pub struct RsuConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels.
    pub out_channels: usize,
    /// Encoder levels, shallowest first. The last entry is the bottom level.
    pub levels: Vec<RsuLevel>,
}

impl RsuConfig {
    /// Builds the configuration of one of the standard block depths.
    ///
    /// Downsampling depths use dilation 1 everywhere except a dilation-2 bottom
    /// and pool after every level but the last two. `Rsu4F` never pools and
    /// dilates 1, 2, 4, 8 instead.
    pub fn from_depth(
        depth: RsuDepth,
        in_channels: usize,
        mid_channels: usize,
        out_channels: usize,
    ) -> Self {
        let levels = match depth {
            RsuDepth::Rsu4F => [1, 2, 4, 8]
                .into_iter()
                .map(|dilation| RsuLevel::new(mid_channels).with_dilation(dilation))
                .collect(),
            _ => {
                let count = depth.levels();
                (0..count)
                    .map(|i| {
                        if i + 1 == count {
                            RsuLevel::new(mid_channels).with_dilation(2)
                        } else {
                            RsuLevel::new(mid_channels).with_downsample(i + 2 < count)
                        }
                    })
                    .collect()
            }
        };

        Self::new(in_channels, out_channels, levels)
    }

    pub fn rsu7(in_channels: usize, mid_channels: usize, out_channels: usize) -> Self {
        Self::from_depth(RsuDepth::Rsu7, in_channels, mid_channels, out_channels)
    }

    pub fn rsu6(in_channels: usize, mid_channels: usize, out_channels: usize) -> Self {
        Self::from_depth(RsuDepth::Rsu6, in_channels, mid_channels, out_channels)
    }

    pub fn rsu5(in_channels: usize, mid_channels: usize, out_channels: usize) -> Self {
        Self::from_depth(RsuDepth::Rsu5, in_channels, mid_channels, out_channels)
    }

    pub fn rsu4(in_channels: usize, mid_channels: usize, out_channels: usize) -> Self {
        Self::from_depth(RsuDepth::Rsu4, in_channels, mid_channels, out_channels)
    }

    pub fn rsu4f(in_channels: usize, mid_channels: usize, out_channels: usize) -> Self {
        Self::from_depth(RsuDepth::Rsu4F, in_channels, mid_channels, out_channels)
    }

    fn validate(&self) -> U2NetResult<()> {
        let invalid = |reason: String| Err(U2NetError::InvalidConfiguration { reason });

        if self.in_channels == 0 || self.out_channels == 0 {
            return invalid(format!(
                "RSU channels must be non-zero, got in={} out={}",
                self.in_channels, self.out_channels
            ));
        }
        if self.levels.len() < 2 {
            return invalid(format!(
                "RSU needs at least two levels, got {}",
                self.levels.len()
            ));
        }
        if let Some((index, level)) = self
            .levels
            .iter()
            .enumerate()
            .find(|(_, level)| level.channels == 0 || level.dilation == 0)
        {
            return invalid(format!(
                "RSU level {index} has zero channels or dilation: {level:?}"
            ));
        }
        if self.levels.last().is_some_and(|level| level.downsample) {
            return invalid("the bottom RSU level cannot downsample".to_string());
        }
        Ok(())
    }

    /// Initializes a new [`Rsu`] block.
    ///
    /// # Errors
    ///
    /// Returns [`U2NetError::InvalidConfiguration`] when there are fewer than two
    /// levels, the bottom level downsamples, or a width or dilation is zero.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> U2NetResult<Rsu<B>> {
        self.validate()?;

        let input = ConvUnitConfig::new(self.in_channels, self.out_channels).init(device);

        let mut encoder = Vec::with_capacity(self.levels.len());
        let mut previous = self.out_channels;
        for level in &self.levels {
            encoder.push(
                ConvUnitConfig::new(previous, level.channels)
                    .with_dilation(level.dilation)
                    .init(device),
            );
            previous = level.channels;
        }

        // Decoder level `j` reads cat(output of the level below, encoder level `j`).
        let depth = self.levels.len();
        let mut decoder = Vec::with_capacity(depth - 1);
        for j in 0..depth - 1 {
            let below = self.levels[j + 1].channels;
            let level = &self.levels[j];
            let out = if j == 0 {
                self.out_channels
            } else {
                level.channels
            };
            decoder.push(
                ConvUnitConfig::new(below + level.channels, out)
                    .with_dilation(level.dilation)
                    .init(device),
            );
        }

        Ok(Rsu {
            input,
            encoder,
            decoder,
            downsample: Ignored(self.levels.iter().map(|level| level.downsample).collect()),
        })
    }
}

/// Residual U-block.
///
/// # Shapes
///   - Input: `[batch, in_channels, height, width]`
///   - Output: `[batch, out_channels, height, width]`
#[derive(Module, Debug)]
pub struct Rsu<B: Backend> {
    input: ConvUnit<B>,
    encoder: Vec<ConvUnit<B>>,
    decoder: Vec<ConvUnit<B>>,
    downsample: Ignored<Vec<bool>>,
}

impl<B: Backend> Rsu<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = self.input.forward(x);

        let mut features = Vec::with_capacity(self.encoder.len());
        let mut hx = residual.clone();
        for (unit, &downsample) in self.encoder.iter().zip(self.downsample.iter()) {
            let feature = unit.forward(hx);
            hx = if downsample {
                max_pool_ceil(feature.clone())
            } else {
                feature.clone()
            };
            features.push(feature);
        }

        let Some(mut hd) = features.pop() else {
            return residual;
        };
        for (unit, skip) in self.decoder.iter().rev().zip(features.into_iter().rev()) {
            let upsampled = resize_like(hd, &skip);
            hd = unit.forward(Tensor::cat(vec![upsampled, skip], 1));
        }

        hd + residual
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;
    use rstest::rstest;

    use super::*;
    use crate::tests::TestBackend;

    #[rstest]
    #[case::rsu7(RsuDepth::Rsu7, 33, 47)]
    #[case::rsu7_tiny(RsuDepth::Rsu7, 8, 5)]
    #[case::rsu6(RsuDepth::Rsu6, 20, 20)]
    #[case::rsu5(RsuDepth::Rsu5, 17, 9)]
    #[case::rsu4(RsuDepth::Rsu4, 15, 16)]
    #[case::rsu4f(RsuDepth::Rsu4F, 11, 13)]
    fn output_keeps_spatial_size(
        #[case] depth: RsuDepth,
        #[case] height: usize,
        #[case] width: usize,
    ) {
        let device = Default::default();
        let block = RsuConfig::from_depth(depth, 3, 4, 6)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::random([1, 3, height, width], Distribution::Default, &device);

        assert_eq!(block.forward(x).dims(), [1, 6, height, width]);
    }

    #[rstest]
    #[case(2)]
    #[case(16)]
    fn output_channels_do_not_depend_on_mid_width(#[case] mid: usize) {
        let device = Default::default();
        let block = RsuConfig::rsu4(5, mid, 7)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::random([2, 5, 12, 10], Distribution::Default, &device);

        assert_eq!(block.forward(x).dims(), [2, 7, 12, 10]);
    }

    #[test]
    fn standard_depths_lay_out_levels() {
        let rsu7 = RsuConfig::rsu7(3, 32, 64);
        let pools: Vec<bool> = rsu7.levels.iter().map(|l| l.downsample).collect();
        let dilations: Vec<usize> = rsu7.levels.iter().map(|l| l.dilation).collect();
        assert_eq!(pools, [true, true, true, true, true, false, false]);
        assert_eq!(dilations, [1, 1, 1, 1, 1, 1, 2]);

        let rsu4f = RsuConfig::rsu4f(512, 256, 512);
        assert!(rsu4f.levels.iter().all(|l| !l.downsample));
        let dilations: Vec<usize> = rsu4f.levels.iter().map(|l| l.dilation).collect();
        assert_eq!(dilations, [1, 2, 4, 8]);
    }

    #[test]
    fn custom_levels_may_vary_width() {
        let device = Default::default();
        let levels = vec![
            RsuLevel::new(4).with_downsample(true),
            RsuLevel::new(8),
            RsuLevel::new(6).with_dilation(3),
        ];
        let block = RsuConfig::new(3, 2, levels)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::random([1, 3, 9, 9], Distribution::Default, &device);

        assert_eq!(block.forward(x).dims(), [1, 2, 9, 9]);
    }

    #[test]
    fn rejects_single_level() {
        let device = Default::default();
        let result = RsuConfig::new(3, 4, vec![RsuLevel::new(4)]).init::<TestBackend>(&device);

        assert!(matches!(
            result,
            Err(U2NetError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn rejects_downsampling_bottom() {
        let device = Default::default();
        let levels = vec![RsuLevel::new(4), RsuLevel::new(4).with_downsample(true)];
        let result = RsuConfig::new(3, 4, levels).init::<TestBackend>(&device);

        assert!(matches!(
            result,
            Err(U2NetError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn rejects_zero_dilation() {
        let device = Default::default();
        let levels = vec![RsuLevel::new(4).with_dilation(0), RsuLevel::new(4)];
        let result = RsuConfig::new(3, 4, levels).init::<TestBackend>(&device);

        assert!(result.is_err());
    }
}
