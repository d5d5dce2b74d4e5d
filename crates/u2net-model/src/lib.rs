//! # U²-Net for Burn
//!
//! A Burn implementation of U²-Net, the nested U-structure network for
//! salient object detection, used here as the segmentation core of a
//! background removal pipeline.
//!
//! ## Modules
//!
//! - `config`: model variants and the per-stage channel tables.
//! - `error`: error types for configuration and tensor shape problems.
//! - `models`: the residual U-block (`Rsu`) and the full `U2Net` network.
//!
//! ## Key Components
//!
//! - `U2Net`: six encoder stages, five decoder stages, six side heads and a
//!   fusion head, producing seven sigmoid saliency maps.
//! - `RsuConfig`: one parameterised residual U-block driven by an ordered list
//!   of `RsuLevel` descriptors.
//! - `U2NetError`: the error enum for every fallible operation in this crate.

mod config;
mod error;
mod models;

#[doc(inline)]
pub use config::{RsuDepth, StageSpec, U2NetVariant};
#[doc(inline)]
pub use error::{U2NetError, U2NetResult};
#[doc(inline)]
pub use models::{
    resize_bilinear, ConvUnit, ConvUnitConfig, Rsu, RsuConfig, RsuLevel, SaliencyMaps, U2Net,
    U2NetConfig, U2NetRecord,
};

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray;
}
