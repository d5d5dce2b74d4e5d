//! Shared utilities for the U²-Net pipeline: image/tensor conversion and
//! weight artifact management.

pub mod image;
pub mod weights;

pub use image::{ImageError, ImageResult, ImageUtils, Matte, Normalization};
pub use weights::*;
