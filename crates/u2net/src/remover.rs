//! Method selection and the end-to-end removal request.

use std::{fmt, path::Path};

use burn::tensor::backend::Backend;
use clap::ValueEnum;
use image::{DynamicImage, RgbaImage};
use serde::Serialize;
use u2net_inference::{AlphaRefiner, MattingPipeline, RefinementToolkit};
use u2net_util::{ImageError, ImageUtils};

use crate::{
    config::RemovalConfig,
    error::{RemovalError, RemovalResult},
    external::ExternalMatting,
    inference::{InferenceService, SaliencyModel},
};

/// Which backend produces the matte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// `rembg` when installed, otherwise the bundled network.
    #[default]
    Auto,
    /// The external `rembg` tool.
    #[value(alias = "rembg-equivalent")]
    Rembg,
    /// The bundled U²-Net.
    Custom,
}

impl Method {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Rembg => "rembg",
            Self::Custom => "custom",
        }
    }

    /// Turn a requested method into the one that will run.
    ///
    /// `external_available` is only consulted for `Auto` and `Rembg`. The
    /// result is never `Auto`.
    pub fn resolve(self, external_available: impl FnOnce() -> bool) -> RemovalResult<Self> {
        match self {
            Self::Custom => Ok(Self::Custom),
            Self::Auto => Ok(if external_available() {
                Self::Rembg
            } else {
                Self::Custom
            }),
            Self::Rembg => {
                if external_available() {
                    Ok(Self::Rembg)
                } else {
                    Err(RemovalError::BackendUnavailable {
                        method: self,
                        reason: "the rembg executable could not be started".into(),
                    })
                }
            }
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An RGBA image together with the method that produced it.
#[derive(Debug, Clone)]
pub struct Removal {
    pub image: RgbaImage,
    pub method: Method,
}

/// Predict a mask with `model` and run it through the matting pipeline.
pub fn matte_with<M: SaliencyModel>(
    model: &M,
    pipeline: &MattingPipeline,
    image: &DynamicImage,
) -> RemovalResult<RgbaImage> {
    let mask = model.predict_mask(image)?;
    Ok(pipeline.run(&image.to_rgb8(), mask)?)
}

/// Background removal over both backends.
///
/// The bundled network is loaded on first use and kept for later requests.
pub struct BackgroundRemover<B: Backend> {
    config: RemovalConfig,
    pipeline: MattingPipeline,
    refiner: AlphaRefiner,
    external: ExternalMatting,
    device: B::Device,
    service: Option<InferenceService<B>>,
}

impl<B: Backend> BackgroundRemover<B> {
    pub fn new(config: RemovalConfig, device: B::Device) -> RemovalResult<Self> {
        config.validate()?;

        let toolkit = if config.basic_refinement {
            RefinementToolkit::basic()
        } else {
            RefinementToolkit::detect()
        };

        let pipeline = MattingPipeline::new(config.matting.clone(), toolkit.clone())?;
        let refiner = AlphaRefiner::new(config.alpha_refine.clone(), toolkit);
        let external = ExternalMatting::new(config.external.clone());

        Ok(Self {
            config,
            pipeline,
            refiner,
            external,
            device,
            service: None,
        })
    }

    /// Use an already loaded network instead of reading the weight artifact.
    pub fn with_service(mut self, service: InferenceService<B>) -> Self {
        self.service = Some(service);
        self
    }

    pub const fn config(&self) -> &RemovalConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.service.is_some()
    }

    fn load_service<'a>(
        slot: &'a mut Option<InferenceService<B>>,
        config: &RemovalConfig,
        device: &B::Device,
    ) -> RemovalResult<&'a InferenceService<B>> {
        let service = match slot.take() {
            Some(service) => service,
            None => InferenceService::load(
                &config.weight_artifact(),
                config.inference_settings(),
                device.clone(),
            )?,
        };
        Ok(slot.insert(service))
    }

    /// Remove the background of the image at `input`.
    ///
    /// The input must exist before any backend is consulted. For the bundled
    /// network the weights are checked before the image is decoded.
    pub fn remove(&mut self, input: &Path, method: Method) -> RemovalResult<Removal> {
        if !input.is_file() {
            return Err(ImageError::NotFound {
                path: input.display().to_string(),
            }
            .into());
        }

        let resolved = method.resolve(|| self.external.is_available())?;
        tracing::info!(input = %input.display(), requested = %method, method = %resolved, "removing background");

        let matted = match resolved {
            Method::Rembg => self.external.remove(input)?,
            Method::Auto | Method::Custom => {
                let service = Self::load_service(&mut self.service, &self.config, &self.device)?;
                let image = ImageUtils::load_image(input)?;
                matte_with(service, &self.pipeline, &image)?
            }
        };

        Ok(Removal {
            image: self.refiner.refine_rgba(&matted),
            method: resolved,
        })
    }
}
