//! Trimap-to-alpha refinement and compositing.

use burn::prelude::*;
use image::{GrayImage, RgbImage, RgbaImage};
use u2net_util::{ImageUtils, Matte};

use crate::{
    postprocessing::{validate_thresholds, PostprocessResult, Trimap},
    refinement::{binary_cleanup, EdgeFilterParams, RefinementToolkit, StructuringElement},
};

/// Configuration of the trimap refinement chain used by the bundled network.
#[derive(Config, Debug)]
pub struct MattingConfig {
    /// Probabilities at or below this value are background.
    #[config(default = "0.15")]
    pub low_threshold: f32,
    /// Probabilities above this value are foreground.
    #[config(default = "0.85")]
    pub high_threshold: f32,
    /// Radius of the square structuring element (1 = 3x3).
    #[config(default = "1")]
    pub morph_radius: u8,
    /// Closing iterations. Zero disables closing.
    #[config(default = "2")]
    pub close_iterations: usize,
    /// Opening iterations. Zero disables opening.
    #[config(default = "0")]
    pub open_iterations: usize,
    /// Sigma of the blur that turns the refined trimap into a continuous alpha.
    #[config(default = "1.1")]
    pub edge_sigma: f32,
    /// Sigma of the blur used instead of the whole chain when no morphology is available.
    #[config(default = "2.0")]
    pub fallback_sigma: f32,
    /// Sigma of the last smoothing pass before compositing.
    #[config(default = "0.5")]
    pub alpha_sigma: f32,
}

impl MattingConfig {
    pub fn validate(&self) -> PostprocessResult<()> {
        validate_thresholds(self.low_threshold, self.high_threshold)
    }
}

/// Trimap construction, morphological refinement and alpha compositing.
#[derive(Debug, Clone)]
pub struct MattingPipeline {
    config: MattingConfig,
    toolkit: RefinementToolkit,
}

impl MattingPipeline {
    pub fn new(config: MattingConfig, toolkit: RefinementToolkit) -> PostprocessResult<Self> {
        config.validate()?;
        Ok(Self { config, toolkit })
    }

    pub const fn config(&self) -> &MattingConfig {
        &self.config
    }

    pub const fn toolkit(&self) -> &RefinementToolkit {
        &self.toolkit
    }

    /// Classify a `[1, 1, H, W]` probability mask into a trimap.
    pub fn trimap<B: Backend>(&self, mask: Tensor<B, 4>) -> PostprocessResult<Trimap> {
        Trimap::from_mask(mask, self.config.low_threshold, self.config.high_threshold)
    }

    /// Turn a trimap into a continuous alpha matte.
    ///
    /// With morphology: close, optionally open, then blur with `edge_sigma`.
    /// Without: blur with `fallback_sigma` only.
    pub fn refine(&self, trimap: &Trimap) -> Matte {
        let smoothing = self.toolkit.smoothing();

        let Some(morphology) = self.toolkit.morphology() else {
            let matte = ImageUtils::gray_to_matte(trimap.as_gray());
            return smoothing.smooth(&matte, self.config.fallback_sigma);
        };

        let element = StructuringElement::Square {
            radius: self.config.morph_radius,
        };
        let mut mask = morphology.close(trimap.as_gray(), element, self.config.close_iterations);
        if self.config.open_iterations > 0 {
            mask = morphology.open(&mask, element, self.config.open_iterations);
        }

        smoothing.smooth(&ImageUtils::gray_to_matte(&mask), self.config.edge_sigma)
    }

    /// Smooth the matte once more and attach it to `image` as alpha.
    pub fn composite(&self, image: &RgbImage, alpha: &Matte) -> PostprocessResult<RgbaImage> {
        let alpha = self.toolkit.smoothing().smooth(alpha, self.config.alpha_sigma);
        Ok(ImageUtils::apply_alpha(image, &alpha)?)
    }

    /// Full chain: mask → trimap → refined matte → RGBA.
    pub fn run<B: Backend>(&self, image: &RgbImage, mask: Tensor<B, 4>) -> PostprocessResult<RgbaImage> {
        let trimap = self.trimap(mask)?;
        let alpha = self.refine(&trimap);
        self.composite(image, &alpha)
    }
}

/// Configuration of the final alpha refinement applied to every backend's output.
#[derive(Config, Debug)]
pub struct AlphaRefineConfig {
    /// Bilateral filter diameter.
    #[config(default = "9")]
    pub diameter: u32,
    #[config(default = "75.0")]
    pub sigma_color: f32,
    #[config(default = "75.0")]
    pub sigma_space: f32,
    /// Closing iterations with the 3x3 elliptical element.
    #[config(default = "2")]
    pub close_iterations: usize,
    /// Opening iterations with the 3x3 elliptical element.
    #[config(default = "1")]
    pub open_iterations: usize,
    /// Gaussian feathering used when no bilateral filter is available.
    #[config(default = "1.0")]
    pub feather_sigma: f32,
    /// Share of the cleaned binary mask in the alpha when no grayscale
    /// morphology is available.
    #[config(default = "0.3")]
    pub binary_weight: f32,
}

/// Edge-preserving filtering and morphological cleanup of an alpha channel.
#[derive(Debug, Clone)]
pub struct AlphaRefiner {
    config: AlphaRefineConfig,
    toolkit: RefinementToolkit,
}

impl AlphaRefiner {
    pub const fn new(config: AlphaRefineConfig, toolkit: RefinementToolkit) -> Self {
        Self { config, toolkit }
    }

    fn edge_params(&self) -> EdgeFilterParams {
        EdgeFilterParams {
            diameter: self.config.diameter,
            sigma_color: self.config.sigma_color,
            sigma_space: self.config.sigma_space,
            fallback_sigma: self.config.feather_sigma,
        }
    }

    pub fn refine(&self, alpha: &GrayImage) -> GrayImage {
        let filtered = self.toolkit.edge_filter().filter(alpha, &self.edge_params());

        match self.toolkit.morphology() {
            Some(morphology) => {
                let element = StructuringElement::Ellipse { radius: 1 };
                let closed = morphology.close(&filtered, element, self.config.close_iterations);
                morphology.open(&closed, element, self.config.open_iterations)
            }
            None => {
                let mask = binary_cleanup(
                    &filtered,
                    self.config.close_iterations,
                    self.config.open_iterations,
                );
                blend(&filtered, &mask, self.config.binary_weight)
            }
        }
    }

    /// Refine the alpha channel of an RGBA image, leaving color untouched.
    pub fn refine_rgba(&self, image: &RgbaImage) -> RgbaImage {
        let (width, height) = image.dimensions();
        let alpha = GrayImage::from_fn(width, height, |x, y| image::Luma([image.get_pixel(x, y)[3]]));
        let refined = self.refine(&alpha);

        let mut output = image.clone();
        for (pixel, value) in output.pixels_mut().zip(refined.pixels()) {
            pixel[3] = value[0];
        }
        output
    }
}

/// `(1 - weight) * alpha + weight * mask`, per pixel.
fn blend(alpha: &GrayImage, mask: &GrayImage, weight: f32) -> GrayImage {
    let weight = weight.clamp(0.0, 1.0);
    GrayImage::from_fn(alpha.width(), alpha.height(), |x, y| {
        let value = (1.0 - weight) * f32::from(alpha.get_pixel(x, y)[0])
            + weight * f32::from(mask.get_pixel(x, y)[0]);
        image::Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}
