//! Tensor-level post-processing of saliency maps.
//!
//! This module covers the steps that still operate on the network output:
//! min-max normalization and trimap classification.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use image::GrayImage;
use thiserror::Error;
use u2net_util::{ImageError, ImageUtils};

/// Errors raised while post-processing a saliency map.
#[derive(Debug, Error)]
pub enum PostprocessError {
    #[error("invalid trimap thresholds: need 0 <= low < high <= 1, got low={low} high={high}")]
    InvalidThresholds { low: f32, high: f32 },

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Result type alias for PostprocessError
pub type PostprocessResult<T> = Result<T, PostprocessError>;

/// Rescale a map so its minimum becomes 0 and its maximum 1.
///
/// A constant map has no range to stretch. It is returned clamped to `[0, 1]`,
/// keeping its absolute level, so no division by zero can occur.
///
/// # Arguments
/// * `map` - Tensor of any shape, typically `[1, 1, H, W]`
pub fn normalize_min_max<B: Backend>(map: Tensor<B, 4>) -> Tensor<B, 4> {
    let min = map.clone().min().into_scalar().elem::<f32>();
    let max = map.clone().max().into_scalar().elem::<f32>();
    let range = max - min;

    if range <= f32::EPSILON {
        tracing::debug!(min, max, "saliency map is constant, skipping normalization");
        return map.clamp(0.0, 1.0);
    }

    (map - min) / range
}

/// Check that `low < high` and both lie in `[0, 1]`.
pub fn validate_thresholds(low: f32, high: f32) -> PostprocessResult<()> {
    let in_range = (0.0..=1.0).contains(&low) && (0.0..=1.0).contains(&high);
    if !in_range || low >= high {
        return Err(PostprocessError::InvalidThresholds { low, high });
    }
    Ok(())
}

/// The three trimap classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimapClass {
    Background,
    Unknown,
    Foreground,
}

impl TrimapClass {
    /// Pixel value used to store the class.
    pub const fn value(self) -> u8 {
        match self {
            Self::Background => 0,
            Self::Unknown => 128,
            Self::Foreground => 255,
        }
    }

    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Background),
            128 => Some(Self::Unknown),
            255 => Some(Self::Foreground),
            _ => None,
        }
    }
}

/// Three-level classification of a mask: 0 background, 128 unknown, 255 foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trimap(GrayImage);

impl Trimap {
    /// Classify every pixel of a `[1, 1, H, W]` probability mask.
    ///
    /// `p > high` is foreground, `low < p <= high` is unknown, everything else
    /// is background.
    pub fn from_mask<B: Backend>(mask: Tensor<B, 4>, low: f32, high: f32) -> PostprocessResult<Self> {
        validate_thresholds(low, high)?;

        let classes = Tensor::zeros_like(&mask)
            .mask_fill(mask.clone().greater_elem(low), 0.5)
            .mask_fill(mask.greater_elem(high), 1.0);

        let matte = ImageUtils::tensor_to_matte(classes)?;
        Ok(Self(ImageUtils::matte_to_gray(&matte)))
    }

    pub fn class_at(&self, x: u32, y: u32) -> TrimapClass {
        match TrimapClass::from_value(self.0.get_pixel(x, y)[0]) {
            Some(class) => class,
            // Construction only ever writes the three class values.
            None => TrimapClass::Unknown,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.0
    }

    pub fn into_gray(self) -> GrayImage {
        self.0
    }
}
