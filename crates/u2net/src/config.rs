use std::path::PathBuf;

use burn::prelude::*;
use u2net_inference::{AlphaRefineConfig, MattingConfig};
use u2net_model::U2NetVariant;
use u2net_util::WeightArtifact;

use crate::{
    error::{RemovalError, RemovalResult},
    external::ExternalMattingConfig,
    inference::{Fidelity, InferenceSettings},
};

/// Everything a [`BackgroundRemover`](crate::BackgroundRemover) needs,
/// loadable from JSON.
#[derive(Config, Debug)]
pub struct RemovalConfig {
    #[config(default = "U2NetVariant::Full")]
    pub variant: U2NetVariant,
    /// Weight artifact. `models/u2net.pth` or `models/u2netp.pth` when unset.
    pub weights: Option<PathBuf>,
    #[config(default = "Fidelity::High")]
    pub fidelity: Fidelity,
    /// Overrides the square input size implied by `fidelity`.
    pub input_size: Option<u32>,
    /// Use the basic refinement tier even when the enhanced one is compiled in.
    #[config(default = false)]
    pub basic_refinement: bool,
    #[config(default = "MattingConfig::new()")]
    pub matting: MattingConfig,
    #[config(default = "AlphaRefineConfig::new()")]
    pub alpha_refine: AlphaRefineConfig,
    #[config(default = "ExternalMattingConfig::new()")]
    pub external: ExternalMattingConfig,
}

impl RemovalConfig {
    pub fn validate(&self) -> RemovalResult<()> {
        if self.input_size == Some(0) {
            return Err(RemovalError::InvalidConfiguration {
                reason: "input_size must be positive".into(),
            });
        }
        if self.external.program.trim().is_empty() {
            return Err(RemovalError::InvalidConfiguration {
                reason: "external matting program must not be empty".into(),
            });
        }
        self.matting.validate()?;
        Ok(())
    }

    pub fn weight_artifact(&self) -> WeightArtifact {
        match &self.weights {
            Some(path) => WeightArtifact::new(path, self.variant),
            None => WeightArtifact::default_for(self.variant),
        }
    }

    pub fn inference_settings(&self) -> InferenceSettings {
        let settings = InferenceSettings::from(self.fidelity);
        match self.input_size {
            Some(size) => settings.with_input_size(size),
            None => settings,
        }
    }
}
