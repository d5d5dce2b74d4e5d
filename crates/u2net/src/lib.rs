//! Background removal with U²-Net.
//!
//! This crate ties the network, image utilities and matting pipeline
//! together behind [`BackgroundRemover`], and ships the `u2net` binary.
//!
//! A request resolves a [`Method`]: the external `rembg` tool when asked for
//! (or when `auto` finds it installed), otherwise the bundled network. Either
//! way the alpha channel goes through the same final refinement before the
//! result is written as a PNG or returned as a data URL.

pub mod backend;
mod config;
mod error;
mod external;
mod inference;
pub mod output;
mod remover;

#[doc(inline)]
pub use backend::burn_backend_types;
#[doc(inline)]
pub use config::RemovalConfig;
#[doc(inline)]
pub use error::{RemovalError, RemovalResult};
#[doc(inline)]
pub use external::{ExternalMatting, ExternalMattingConfig};
#[doc(inline)]
pub use inference::{Fidelity, InferenceService, InferenceSettings, SaliencyModel};
#[doc(inline)]
pub use remover::{matte_with, BackgroundRemover, Method, Removal};

#[doc(inline)]
pub use u2net_inference as postprocessing;
#[doc(inline)]
pub use u2net_model as model;
#[doc(inline)]
pub use u2net_util as util;
