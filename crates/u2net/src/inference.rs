//! Saliency prediction with the bundled network.

use burn::prelude::*;
use image::DynamicImage;
use u2net_inference::normalize_min_max;
use u2net_model::{resize_bilinear, SaliencyMaps, U2Net};
use u2net_util::{ImageUtils, ModelLoader, Normalization, WeightArtifact};

use crate::error::RemovalResult;

/// Speed/quality trade-off of the network input.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum Fidelity {
    /// 320x320 input, no channel normalization.
    Fast,
    /// 640x640 input with ImageNet normalization.
    High,
}

impl Fidelity {
    pub const fn input_size(&self) -> u32 {
        match self {
            Self::Fast => 320,
            Self::High => 640,
        }
    }

    pub const fn normalization(&self) -> Normalization {
        match self {
            Self::Fast => Normalization::None,
            Self::High => Normalization::ImageNet,
        }
    }
}

/// How an image is turned into a network input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceSettings {
    pub input_size: u32,
    pub normalization: Normalization,
}

impl InferenceSettings {
    pub const fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size;
        self
    }
}

impl From<Fidelity> for InferenceSettings {
    fn from(fidelity: Fidelity) -> Self {
        Self {
            input_size: fidelity.input_size(),
            normalization: fidelity.normalization(),
        }
    }
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Fidelity::High.into()
    }
}

/// Anything that can predict a foreground probability map for an image.
pub trait SaliencyModel {
    type Backend: Backend;

    /// Predict a `[1, 1, H, W]` map in `[0, 1]` at the image's own resolution.
    fn predict_mask(&self, image: &DynamicImage) -> RemovalResult<Tensor<Self::Backend, 4>>;
}

/// A loaded network together with its device and input settings.
pub struct InferenceService<B: Backend> {
    model: U2Net<B>,
    settings: InferenceSettings,
    device: B::Device,
}

impl<B: Backend> InferenceService<B> {
    /// Verify the weight artifact and load it.
    ///
    /// # Errors
    /// A missing, truncated or undecodable artifact is returned as
    /// [`RemovalError::Weights`](crate::RemovalError::Weights).
    pub fn load(
        artifact: &WeightArtifact,
        settings: InferenceSettings,
        device: B::Device,
    ) -> RemovalResult<Self> {
        let model = artifact.load_u2net(&device)?;
        tracing::info!(
            path = %artifact.path().display(),
            variant = %artifact.variant(),
            input_size = settings.input_size,
            "model loaded"
        );

        Ok(Self::from_model(model, settings, device))
    }

    pub const fn from_model(model: U2Net<B>, settings: InferenceSettings, device: B::Device) -> Self {
        Self {
            model,
            settings,
            device,
        }
    }

    pub const fn settings(&self) -> InferenceSettings {
        self.settings
    }

    pub const fn device(&self) -> &B::Device {
        &self.device
    }

    /// Run the network on the resized image and return every output map.
    pub fn saliency(&self, image: &DynamicImage) -> RemovalResult<SaliencyMaps<B>> {
        let input = ImageUtils::to_model_input::<B>(
            image,
            self.settings.input_size,
            self.settings.normalization,
            &self.device,
        )?;

        Ok(self.model.forward(input)?)
    }
}

impl<B: Backend> SaliencyModel for InferenceService<B> {
    type Backend = B;

    fn predict_mask(&self, image: &DynamicImage) -> RemovalResult<Tensor<B, 4>> {
        let maps = self.saliency(image)?;
        let fused = maps.fused.narrow(1, 0, 1);

        let upsampled = resize_bilinear(fused, [image.height() as usize, image.width() as usize]);

        Ok(normalize_min_max(upsampled))
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use rstest::rstest;
    use u2net_model::{U2NetConfig, U2NetVariant};

    use super::*;
    use crate::tests::TestBackend;

    fn lite_service(input_size: u32) -> InferenceService<TestBackend> {
        let device = Default::default();
        let model = U2NetConfig::new()
            .with_variant(U2NetVariant::Lite)
            .init::<TestBackend>(&device)
            .unwrap();
        InferenceService::from_model(
            model,
            InferenceSettings::from(Fidelity::Fast).with_input_size(input_size),
            device,
        )
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 6) as u8, (y * 8) as u8, 128])
        }))
    }

    #[rstest]
    #[case(Fidelity::Fast, 320, Normalization::None)]
    #[case(Fidelity::High, 640, Normalization::ImageNet)]
    fn fidelity_settings(
        #[case] fidelity: Fidelity,
        #[case] size: u32,
        #[case] normalization: Normalization,
    ) {
        let settings = InferenceSettings::from(fidelity);

        assert_eq!(settings.input_size, size);
        assert_eq!(settings.normalization, normalization);
    }

    #[test]
    fn mask_matches_image_size() {
        let service = lite_service(32);

        let mask = service.predict_mask(&gradient(40, 30)).unwrap();

        assert_eq!(mask.dims(), [1, 1, 30, 40]);
    }

    #[test]
    fn mask_is_normalized() {
        let service = lite_service(32);

        let values: Vec<f32> = service
            .predict_mask(&gradient(40, 30))
            .unwrap()
            .into_data()
            .to_vec()
            .unwrap();

        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn prediction_is_deterministic() {
        let service = lite_service(32);
        let image = gradient(33, 17);

        let first = service.predict_mask(&image).unwrap().into_data();
        let second = service.predict_mask(&image).unwrap().into_data();

        assert_eq!(first, second);
    }

    #[test]
    fn zero_input_size_is_rejected() {
        let service = lite_service(0);

        assert!(service.predict_mask(&gradient(8, 8)).is_err());
    }
}
