//! Image loading, tensor conversion and alpha compositing.

use std::path::Path;

use burn::tensor::{backend::Backend, DType, Tensor, TensorData};
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage, RgbaImage};
use thiserror::Error;

/// Single-channel continuous map with values in `[0, 1]`.
///
/// Used for masks and alpha mattes between pipeline stages.
pub type Matte = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-channel mean used by ImageNet-trained weights.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation used by ImageNet-trained weights.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// ImageError covers all possible errors in image processing operations
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to open image at '{path}': {source}")]
    ImageLoadError {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("input image not found: '{path}'")]
    NotFound { path: String },

    #[error("failed to convert tensor to data: {reason}")]
    TensorConversionError { reason: String },

    #[error("failed to create image buffer: {reason}")]
    BufferCreationError { reason: String },

    #[error("batch size mismatch: expected 1, got {actual}")]
    InvalidBatchSize { actual: usize },

    #[error("invalid channel count: expected 1 for mask, got {actual}")]
    InvalidMaskChannels { actual: usize },

    #[error(
        "dimension mismatch between image and mask: image={}x{}, mask={}x{}",
        image_width,
        image_height,
        mask_width,
        mask_height
    )]
    DimensionMismatch {
        image_width: u32,
        image_height: u32,
        mask_width: u32,
        mask_height: u32,
    },

    #[error("model input size must be non-zero")]
    ZeroInputSize,
}

/// Result type alias for ImageError
pub type ImageResult<T> = Result<T, ImageError>;

/// Channel normalization applied to the model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// Values stay in `[0, 1]`.
    #[default]
    None,
    /// `(x - mean) / std` with the ImageNet statistics.
    ImageNet,
}

/// Image processing utilities
pub struct ImageUtils;

impl ImageUtils {
    /// Decode an image file.
    ///
    /// A missing file is reported as [`ImageError::NotFound`] before the
    /// decoder is involved.
    pub fn load_image<P: AsRef<Path>>(path: P) -> ImageResult<DynamicImage> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ImageError::NotFound {
                path: path.display().to_string(),
            });
        }

        image::open(path).map_err(|source| ImageError::ImageLoadError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Convert DynamicImage to tensor
    ///
    /// # Returns
    /// Tensor of shape [1, 3, height, width] with values in range [0, 1]
    pub fn dynamic_image_to_tensor<B: Backend>(
        img: &DynamicImage,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        let (width, height) = (img.width(), img.height());

        let buf = img.to_rgb32f().into_raw();
        let data = TensorData::new(buf, [height as usize, width as usize, 3]);
        let tensor = Tensor::from_data(data, device);

        tensor.permute([2, 0, 1]).unsqueeze::<4>()
    }

    /// Resize an image to the square network resolution and turn it into a
    /// normalized input tensor.
    ///
    /// # Arguments
    /// * `img` - Source image, any size and color type
    /// * `size` - Side length of the square model input
    /// * `normalization` - Channel normalization to apply after scaling to `[0, 1]`
    /// * `device` - Device to create tensor on
    ///
    /// # Returns
    /// Tensor of shape [1, 3, size, size]
    pub fn to_model_input<B: Backend>(
        img: &DynamicImage,
        size: u32,
        normalization: Normalization,
        device: &B::Device,
    ) -> ImageResult<Tensor<B, 4>> {
        if size == 0 {
            return Err(ImageError::ZeroInputSize);
        }

        let resized = img.resize_exact(size, size, FilterType::Triangle);
        let tensor = Self::dynamic_image_to_tensor(&resized, device);

        Ok(Self::normalize(tensor, normalization))
    }

    /// Apply channel normalization to a `[batch, 3, height, width]` tensor.
    pub fn normalize<B: Backend>(tensor: Tensor<B, 4>, normalization: Normalization) -> Tensor<B, 4> {
        match normalization {
            Normalization::None => tensor,
            Normalization::ImageNet => {
                let device = tensor.device();
                let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, &device).reshape([1, 3, 1, 1]);
                let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, &device).reshape([1, 3, 1, 1]);
                (tensor - mean) / std
            }
        }
    }

    /// Convert a `[1, 1, height, width]` tensor into a [`Matte`].
    pub fn tensor_to_matte<B: Backend>(tensor: Tensor<B, 4>) -> ImageResult<Matte> {
        let [batch, channels, height, width] = tensor.dims();
        if batch != 1 {
            return Err(ImageError::InvalidBatchSize { actual: batch });
        }
        if channels != 1 {
            return Err(ImageError::InvalidMaskChannels { actual: channels });
        }

        let data = tensor
            .into_data()
            .convert_dtype(DType::F32)
            .to_vec::<f32>()
            .map_err(|e| ImageError::TensorConversionError {
                reason: format!("{e:?}"),
            })?;

        Matte::from_raw(width as u32, height as u32, data).ok_or_else(|| {
            ImageError::BufferCreationError {
                reason: format!("matte buffer does not fit {width}x{height}"),
            }
        })
    }

    /// Convert a [`Matte`] into a `[1, 1, height, width]` tensor.
    pub fn matte_to_tensor<B: Backend>(matte: &Matte, device: &B::Device) -> Tensor<B, 4> {
        let (width, height) = matte.dimensions();
        let data = TensorData::new(matte.as_raw().clone(), [1, 1, height as usize, width as usize]);
        Tensor::from_data(data, device)
    }

    /// Map a `[0, 1]` value to `[0, 255]`, rounding to nearest.
    pub fn quantize(value: f32) -> u8 {
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    }

    /// Quantize a whole matte to 8 bits.
    pub fn matte_to_gray(matte: &Matte) -> GrayImage {
        let (width, height) = matte.dimensions();
        GrayImage::from_fn(width, height, |x, y| {
            Luma([Self::quantize(matte.get_pixel(x, y)[0])])
        })
    }

    /// Expand an 8-bit grey image to a `[0, 1]` matte.
    pub fn gray_to_matte(gray: &GrayImage) -> Matte {
        let (width, height) = gray.dimensions();
        Matte::from_fn(width, height, |x, y| {
            Luma([f32::from(gray.get_pixel(x, y)[0]) / 255.0])
        })
    }

    /// Attach a matte as the alpha channel of an RGB image.
    ///
    /// The color channels are copied unchanged. The alpha is quantized with
    /// [`ImageUtils::quantize`].
    pub fn apply_alpha(image: &RgbImage, alpha: &Matte) -> ImageResult<RgbaImage> {
        let (image_width, image_height) = image.dimensions();
        let (mask_width, mask_height) = alpha.dimensions();
        if (image_width, image_height) != (mask_width, mask_height) {
            return Err(ImageError::DimensionMismatch {
                image_width,
                image_height,
                mask_width,
                mask_height,
            });
        }

        Ok(RgbaImage::from_fn(image_width, image_height, |x, y| {
            let [r, g, b] = image.get_pixel(x, y).0;
            let a = Self::quantize(alpha.get_pixel(x, y)[0]);
            image::Rgba([r, g, b, a])
        }))
    }

    /// Split the alpha channel of an RGBA image into a [`Matte`].
    pub fn extract_alpha(image: &RgbaImage) -> Matte {
        let (width, height) = image.dimensions();
        Matte::from_fn(width, height, |x, y| {
            Luma([f32::from(image.get_pixel(x, y)[3]) / 255.0])
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use image::Rgb;
    use rstest::rstest;

    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn load_missing_image_returns_not_found() {
        let result = ImageUtils::load_image("/nonexistent/photo.png");
        assert!(matches!(result.unwrap_err(), ImageError::NotFound { .. }));
    }

    #[test]
    fn load_undecodable_image_returns_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let result = ImageUtils::load_image(&path);
        assert!(matches!(
            result.unwrap_err(),
            ImageError::ImageLoadError { .. }
        ));
    }

    #[test]
    fn model_input_is_square_and_in_unit_range() {
        let device = Default::default();
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([255, 128, 0])));

        let tensor =
            ImageUtils::to_model_input::<TestBackend>(&img, 16, Normalization::None, &device)
                .unwrap();

        assert_eq!(tensor.dims(), [1, 3, 16, 16]);
        let values: Vec<f32> = tensor.into_data().to_vec().unwrap();
        assert_relative_eq!(values[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(values[16 * 16], 128.0 / 255.0, epsilon = 1e-6);
        assert_relative_eq!(values[2 * 16 * 16], 0.0, epsilon = 1e-6);
    }

    #[rstest]
    #[case(0, 0.485 / 0.229)]
    #[case(1, 0.456 / 0.224)]
    #[case(2, 0.406 / 0.225)]
    fn imagenet_normalization_centers_channels(#[case] channel: usize, #[case] offset: f32) {
        let device = Default::default();
        let zeros = Tensor::<TestBackend, 4>::zeros([1, 3, 2, 2], &device);

        let normalized = ImageUtils::normalize(zeros, Normalization::ImageNet);

        let values: Vec<f32> = normalized.into_data().to_vec().unwrap();
        assert_relative_eq!(values[channel * 4], -offset, epsilon = 1e-5);
    }

    #[test]
    fn zero_input_size_is_rejected() {
        let device = Default::default();
        let img = DynamicImage::new_rgb8(4, 4);

        let result = ImageUtils::to_model_input::<TestBackend>(&img, 0, Normalization::None, &device);
        assert!(matches!(result.unwrap_err(), ImageError::ZeroInputSize));
    }

    #[test]
    fn tensor_to_matte_keeps_layout() {
        let device = Default::default();
        let tensor =
            Tensor::<TestBackend, 4>::from_floats([[[[0.0, 0.25, 0.5], [0.75, 1.0, 0.1]]]], &device);

        let matte = ImageUtils::tensor_to_matte(tensor).unwrap();

        assert_eq!(matte.dimensions(), (3, 2));
        assert_relative_eq!(matte.get_pixel(2, 0)[0], 0.5);
        assert_relative_eq!(matte.get_pixel(0, 1)[0], 0.75);
    }

    #[test]
    fn tensor_to_matte_rejects_multichannel() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);

        assert!(matches!(
            ImageUtils::tensor_to_matte(tensor).unwrap_err(),
            ImageError::InvalidMaskChannels { actual: 3 }
        ));
    }

    #[rstest]
    #[case(0.0, 0)]
    #[case(1.0, 255)]
    #[case(0.5, 128)]
    #[case(-0.2, 0)]
    #[case(1.7, 255)]
    fn quantize_rounds_and_clamps(#[case] value: f32, #[case] expected: u8) {
        assert_eq!(ImageUtils::quantize(value), expected);
    }

    #[test]
    fn apply_alpha_keeps_color_and_sets_alpha() {
        let image = RgbImage::from_pixel(5, 4, Rgb([10, 20, 30]));
        let alpha = Matte::from_pixel(5, 4, Luma([1.0]));

        let rgba = ImageUtils::apply_alpha(&image, &alpha).unwrap();

        assert_eq!(rgba.dimensions(), (5, 4));
        assert!(rgba.pixels().all(|p| p.0 == [10, 20, 30, 255]));
    }

    #[test]
    fn apply_alpha_mismatched_dimensions_returns_error() {
        let image = RgbImage::new(10, 10);
        let alpha = Matte::new(5, 5);

        let result = ImageUtils::apply_alpha(&image, &alpha);
        assert!(matches!(
            result.unwrap_err(),
            ImageError::DimensionMismatch { .. }
        ));
    }
}
