//! Weight artifact validation and loading.
//!
//! A weight artifact is a single file on disk. It is checked for presence and
//! plausible size before any loading is attempted, so a missing or truncated
//! download is reported as such instead of as an opaque decode failure.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{BinFileRecorder, FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs as PyTorchLoadArgs, PyTorchFileRecorder};
use thiserror::Error;
use u2net_model::{U2Net, U2NetConfig, U2NetVariant};

/// Directory searched for weights when no explicit path is given.
pub const DEFAULT_WEIGHTS_DIR: &str = "models";

/// Errors that can occur while validating or loading model weights.
#[derive(Debug, Error)]
pub enum WeightError {
    /// The artifact does not exist.
    #[error("model file not found at '{path}'. Please download {file_name}")]
    Missing { path: PathBuf, file_name: String },

    /// The artifact exists but is too small to be a complete download.
    #[error("model file '{path}' is {size} bytes, expected at least {minimum}; the download looks incomplete")]
    Undersized {
        path: PathBuf,
        size: u64,
        minimum: u64,
    },

    /// File system errors
    #[error("file system error: {reason}")]
    FileSystemError { reason: String },

    /// Model initialization or record loading errors
    #[error("failed to load model weights: {reason}")]
    ModelLoadError { reason: String },
}

/// Supported weight file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    /// PyTorch .pt or .pth state dict
    PyTorch,
    /// Burn MessagePack .mpk files
    MessagePack,
    /// Burn Binary .bin files
    Binary,
    /// Auto-detect by trying each loader
    Auto,
}

impl WeightFormat {
    /// Detect format from file path
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("pt") | Some("pth") => Self::PyTorch,
            Some("mpk") => Self::MessagePack,
            Some("bin") => Self::Binary,
            _ => Self::Auto,
        }
    }
}

/// Smallest plausible artifact size for a variant.
///
/// The published files are ~176 MB (full) and ~4.7 MB (lite).
pub const fn minimum_weight_bytes(variant: U2NetVariant) -> u64 {
    match variant {
        U2NetVariant::Full => 170_000_000,
        U2NetVariant::Lite => 3_000_000,
    }
}

/// A weight file for one network variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightArtifact {
    path: PathBuf,
    variant: U2NetVariant,
}

impl WeightArtifact {
    pub fn new(path: impl Into<PathBuf>, variant: U2NetVariant) -> Self {
        Self {
            path: path.into(),
            variant,
        }
    }

    /// `models/u2net.pth` or `models/u2netp.pth`.
    pub fn default_for(variant: U2NetVariant) -> Self {
        let path = Path::new(DEFAULT_WEIGHTS_DIR).join(format!("{}.pth", variant.checkpoint_name()));
        Self::new(path, variant)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn variant(&self) -> U2NetVariant {
        self.variant
    }

    pub fn format(&self) -> WeightFormat {
        WeightFormat::from_path(&self.path)
    }

    /// Check that the artifact exists and is large enough.
    ///
    /// # Returns
    /// The artifact size in bytes.
    pub fn verify(&self) -> Result<u64, WeightError> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WeightError::Missing {
                    path: self.path.clone(),
                    file_name: format!("{}.pth", self.variant.checkpoint_name()),
                });
            }
            Err(e) => {
                return Err(WeightError::FileSystemError {
                    reason: format!("cannot stat '{}': {e}", self.path.display()),
                });
            }
        };
        if !metadata.is_file() {
            return Err(WeightError::FileSystemError {
                reason: format!("'{}' is not a regular file", self.path.display()),
            });
        }

        let size = metadata.len();
        let minimum = minimum_weight_bytes(self.variant);
        if size < minimum {
            return Err(WeightError::Undersized {
                path: self.path.clone(),
                size,
                minimum,
            });
        }

        Ok(size)
    }
}

/// Loads weights into a network.
pub trait ModelLoader<B: Backend> {
    /// Load model weights into an existing model
    fn load_model<M: Module<B>>(&self, model: M, device: &B::Device) -> Result<M, WeightError>;

    /// Build a network of the right variant and load the weights into it
    fn load_u2net(&self, device: &B::Device) -> Result<U2Net<B>, WeightError>;

    /// Check if the weight source is usable
    fn is_available(&self) -> bool;
}

impl<B: Backend> ModelLoader<B> for WeightArtifact {
    fn load_model<M: Module<B>>(&self, model: M, device: &B::Device) -> Result<M, WeightError> {
        let size = self.verify()?;
        tracing::debug!(
            path = %self.path.display(),
            size,
            format = ?self.format(),
            "loading weight artifact"
        );

        match self.format() {
            WeightFormat::PyTorch => load_pytorch_model(model, &self.path, device),
            WeightFormat::MessagePack => load_messagepack_model(model, &self.path, device),
            WeightFormat::Binary => load_binary_model(model, &self.path, device),
            WeightFormat::Auto => {
                // Try different formats in order of preference
                if let Ok(model) = load_pytorch_model(model.clone(), &self.path, device) {
                    Ok(model)
                } else if let Ok(model) = load_messagepack_model(model.clone(), &self.path, device)
                {
                    Ok(model)
                } else {
                    load_binary_model(model, &self.path, device)
                }
            }
        }
    }

    fn load_u2net(&self, device: &B::Device) -> Result<U2Net<B>, WeightError> {
        // Fail on a bad artifact before paying for initialization.
        self.verify()?;

        let model = U2NetConfig::new()
            .with_variant(self.variant)
            .init(device)
            .map_err(|e| WeightError::ModelLoadError {
                reason: format!("Failed to initialize model: {e}"),
            })?;

        self.load_model(model, device)
    }

    fn is_available(&self) -> bool {
        self.verify().is_ok()
    }
}

/// Load arguments mapping the reference PyTorch layer names onto this crate's
/// module tree.
///
/// Remaps apply in order, so stage names are rewritten before the block
/// internals they contain.
fn pytorch_load_args(path: &Path) -> PyTorchLoadArgs {
    let mut args = PyTorchLoadArgs::new(path.to_path_buf());

    for stage in 1..=6 {
        args = args.with_key_remap(
            &format!("^stage{stage}\\.(.+)"),
            &format!("encoder.{}.$1", stage - 1),
        );
        args = args.with_key_remap(
            &format!("^side{stage}\\.(.+)"),
            &format!("side.{}.$1", stage - 1),
        );
    }
    for stage in 1..=5 {
        args = args.with_key_remap(
            &format!("^stage{stage}d\\.(.+)"),
            &format!("decoder.{}.$1", stage - 1),
        );
    }
    args = args
        .with_key_remap("^outconv\\.(.+)", "fuse.$1")
        .with_key_remap("(.+)\\.rebnconvin\\.(.+)", "$1.input.$2");

    for level in 1..=7 {
        args = args
            .with_key_remap(
                &format!("(.+)\\.rebnconv{level}\\.(.+)"),
                &format!("$1.encoder.{}.$2", level - 1),
            )
            .with_key_remap(
                &format!("(.+)\\.rebnconv{level}d\\.(.+)"),
                &format!("$1.decoder.{}.$2", level - 1),
            );
    }

    args.with_key_remap("(.+)\\.conv_s1\\.(.+)", "$1.conv.$2")
        .with_key_remap("(.+)\\.bn_s1\\.(.+)", "$1.norm.$2")
}

fn load_pytorch_model<B: Backend, M: Module<B>>(
    model: M,
    weights_path: &Path,
    device: &B::Device,
) -> Result<M, WeightError> {
    let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::default();
    let record = recorder
        .load(pytorch_load_args(weights_path), device)
        .map_err(|e| WeightError::ModelLoadError {
            reason: format!("PyTorch model loading failed: {e}"),
        })?;
    Ok(model.load_record(record))
}

fn load_messagepack_model<B: Backend, M: Module<B>>(
    model: M,
    weights_path: &Path,
    device: &B::Device,
) -> Result<M, WeightError> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(weights_path, &recorder, device)
        .map_err(|e| WeightError::ModelLoadError {
            reason: format!("MessagePack model loading failed: {e}"),
        })
}

fn load_binary_model<B: Backend, M: Module<B>>(
    model: M,
    weights_path: &Path,
    device: &B::Device,
) -> Result<M, WeightError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(weights_path, &recorder, device)
        .map_err(|e| WeightError::ModelLoadError {
            reason: format!("Binary model loading failed: {e}"),
        })
}
