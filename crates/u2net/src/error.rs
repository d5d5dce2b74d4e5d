use std::path::PathBuf;

use thiserror::Error;
use u2net_inference::PostprocessError;
use u2net_model::U2NetError;
use u2net_util::{ImageError, WeightError};

use crate::remover::Method;

/// Errors surfaced by a background removal request.
#[derive(Debug, Error)]
pub enum RemovalError {
    #[error(transparent)]
    Weights(#[from] WeightError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Model(#[from] U2NetError),

    #[error(transparent)]
    Postprocess(#[from] PostprocessError),

    /// A forced backend cannot be used on this machine.
    #[error("method '{method}' is unavailable: {reason}")]
    BackendUnavailable { method: Method, reason: String },

    /// The external matting tool ran but did not produce an image.
    #[error("external matting failed: {reason}")]
    ExternalMatting { reason: String },

    #[error("failed to write output '{path}': {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode PNG: {0}")]
    Encode(#[source] image::ImageError),

    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

impl RemovalError {
    /// Weight problems abort before any inference and cannot be retried
    /// with another image.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Weights(_))
    }
}

/// Result type alias for RemovalError
pub type RemovalResult<T> = Result<T, RemovalError>;
