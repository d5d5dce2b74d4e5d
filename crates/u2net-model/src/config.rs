//! Variant tables for the U²-Net family.
//!
//! The full network and its lightweight sibling share one topology and only
//! differ in stage widths, so both are described here as data.

use burn::prelude::*;

/// Depth of a residual U-block.
#[derive(Config, Debug, Copy, PartialEq, Eq, Hash)]
pub enum RsuDepth {
    /// Seven levels, five of which downsample.
    Rsu7,
    /// Six levels, four of which downsample.
    Rsu6,
    /// Five levels, three of which downsample.
    Rsu5,
    /// Four levels, two of which downsample.
    Rsu4,
    /// Four levels, dilation only, resolution is never reduced.
    Rsu4F,
}

impl RsuDepth {
    /// Number of encoder levels, the dilated bottom level included.
    pub const fn levels(&self) -> usize {
        match self {
            Self::Rsu7 => 7,
            Self::Rsu6 => 6,
            Self::Rsu5 => 5,
            Self::Rsu4 | Self::Rsu4F => 4,
        }
    }
}

/// Published U²-Net weight sets.
#[derive(Config, Debug, Copy, PartialEq, Eq, Hash)]
pub enum U2NetVariant {
    /// The 176 MB network.
    Full,
    /// U²-NetP, the 4.7 MB network.
    Lite,
}

impl Default for U2NetVariant {
    fn default() -> Self {
        Self::Full
    }
}

impl U2NetVariant {
    /// Name of the published checkpoint.
    pub const fn checkpoint_name(&self) -> &'static str {
        match self {
            Self::Full => "u2net",
            Self::Lite => "u2netp",
        }
    }
}

/// One RSU stage of the network: its depth and its three channel widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub depth: RsuDepth,
    pub in_channels: usize,
    pub mid_channels: usize,
    pub out_channels: usize,
}

const fn stage(depth: RsuDepth, in_channels: usize, mid: usize, out: usize) -> StageSpec {
    StageSpec {
        depth,
        in_channels,
        mid_channels: mid,
        out_channels: out,
    }
}

impl U2NetVariant {
    /// Encoder stages 1 through 6, shallowest first.
    pub const fn encoder_stages(&self, in_channels: usize) -> [StageSpec; 6] {
        use RsuDepth::*;
        match self {
            Self::Full => [
                stage(Rsu7, in_channels, 32, 64),
                stage(Rsu6, 64, 32, 128),
                stage(Rsu5, 128, 64, 256),
                stage(Rsu4, 256, 128, 512),
                stage(Rsu4F, 512, 256, 512),
                stage(Rsu4F, 512, 256, 512),
            ],
            Self::Lite => [
                stage(Rsu7, in_channels, 16, 64),
                stage(Rsu6, 64, 16, 64),
                stage(Rsu5, 64, 16, 64),
                stage(Rsu4, 64, 16, 64),
                stage(Rsu4F, 64, 16, 64),
                stage(Rsu4F, 64, 16, 64),
            ],
        }
    }

    /// Decoder stages 1d through 5d, shallowest first.
    ///
    /// Stage `k`d consumes the concatenation of the upsampled output of the
    /// stage below it and the encoder output at level `k`.
    pub const fn decoder_stages(&self) -> [StageSpec; 5] {
        use RsuDepth::*;
        match self {
            Self::Full => [
                stage(Rsu7, 128, 16, 64),
                stage(Rsu6, 256, 32, 64),
                stage(Rsu5, 512, 64, 128),
                stage(Rsu4, 1024, 128, 256),
                stage(Rsu4F, 1024, 256, 512),
            ],
            Self::Lite => [
                stage(Rsu7, 128, 16, 64),
                stage(Rsu6, 128, 16, 64),
                stage(Rsu5, 128, 16, 64),
                stage(Rsu4, 128, 16, 64),
                stage(Rsu4F, 128, 16, 64),
            ],
        }
    }

    /// Input channels of the six side heads, in side-head order.
    ///
    /// Heads 1-5 read decoder stages 1d-5d, head 6 reads encoder stage 6.
    pub fn side_channels(&self) -> [usize; 6] {
        let decoder = self.decoder_stages();
        let encoder = self.encoder_stages(3);
        [
            decoder[0].out_channels,
            decoder[1].out_channels,
            decoder[2].out_channels,
            decoder[3].out_channels,
            decoder[4].out_channels,
            encoder[5].out_channels,
        ]
    }
}
