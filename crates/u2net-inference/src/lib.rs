//! Post-processing that turns a raw saliency map into a production alpha
//! channel: trimap construction, morphological refinement, smoothing and
//! compositing.

pub mod pipeline;
pub mod postprocessing;
pub mod refinement;

pub use pipeline::{AlphaRefineConfig, AlphaRefiner, MattingConfig, MattingPipeline};
pub use postprocessing::*;
pub use refinement::{
    binary_cleanup, EdgeFilterParams, EdgePreservingFilter, Morphology, RefinementTier,
    RefinementToolkit, Smoothing, StructuringElement,
};

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray;
}
