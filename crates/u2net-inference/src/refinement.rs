//! Refinement strategies.
//!
//! Every optional image operation sits behind a trait. A [`RefinementToolkit`]
//! bundles one implementation of each and is chosen once at start-up: the
//! enhanced tier when `imageproc` is compiled in, the basic tier otherwise.
//! Strategies are infallible; a tier that lacks a capability either
//! substitutes a simpler filter or reports the capability as absent.

use std::{fmt, sync::Arc};

use image::{imageops, GrayImage, Luma};
use u2net_util::Matte;

/// Shape of a morphological structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuringElement {
    /// `(2r + 1)` square, all ones.
    Square { radius: u8 },
    /// Elliptical element; at radius 1 this is the 3x3 cross.
    Ellipse { radius: u8 },
}

impl StructuringElement {
    pub const fn radius(&self) -> u8 {
        match self {
            Self::Square { radius } | Self::Ellipse { radius } => *radius,
        }
    }
}

/// Parameters of the edge-preserving filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeFilterParams {
    /// Neighbourhood diameter in pixels.
    pub diameter: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
    /// Gaussian sigma used when no edge-preserving filter is available.
    pub fallback_sigma: f32,
}

/// Gaussian smoothing of a continuous matte.
pub trait Smoothing: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn smooth(&self, matte: &Matte, sigma: f32) -> Matte;
}

/// Smoothing that keeps strong edges intact.
pub trait EdgePreservingFilter: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self, alpha: &GrayImage, params: &EdgeFilterParams) -> GrayImage;
}

/// Binary-style morphology on 8-bit masks.
pub trait Morphology: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Dilate `iterations` times, then erode `iterations` times.
    fn close(&self, mask: &GrayImage, element: StructuringElement, iterations: usize) -> GrayImage;

    /// Erode `iterations` times, then dilate `iterations` times.
    fn open(&self, mask: &GrayImage, element: StructuringElement, iterations: usize) -> GrayImage;
}

/// Gaussian blur from the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageOpsSmoothing;

impl Smoothing for ImageOpsSmoothing {
    fn name(&self) -> &'static str {
        "image-gaussian"
    }

    fn smooth(&self, matte: &Matte, sigma: f32) -> Matte {
        if sigma <= 0.0 {
            return matte.clone();
        }
        imageops::blur(matte, sigma)
    }
}

/// Stand-in for the bilateral filter: a plain Gaussian blur.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianEdgeFallback;

impl EdgePreservingFilter for GaussianEdgeFallback {
    fn name(&self) -> &'static str {
        "gaussian-fallback"
    }

    fn filter(&self, alpha: &GrayImage, params: &EdgeFilterParams) -> GrayImage {
        if params.fallback_sigma <= 0.0 {
            return alpha.clone();
        }
        imageops::blur(alpha, params.fallback_sigma)
    }
}

/// Threshold `alpha` at half intensity, then close and open the binary mask
/// with the 3x3 cross.
///
/// Needs nothing beyond `image`, so the basic tier can still clean up specks
/// and pinholes. Pixels past the border repeat the edge, which keeps a fully
/// opaque alpha opaque.
pub fn binary_cleanup(alpha: &GrayImage, close_iterations: usize, open_iterations: usize) -> GrayImage {
    let mut mask = GrayImage::from_fn(alpha.width(), alpha.height(), |x, y| {
        Luma([if alpha.get_pixel(x, y)[0] > 127 { 255 } else { 0 }])
    });

    let passes = [
        (close_iterations, u8::max as fn(u8, u8) -> u8),
        (close_iterations, u8::min),
        (open_iterations, u8::min),
        (open_iterations, u8::max),
    ];
    for (iterations, pick) in passes {
        for _ in 0..iterations {
            mask = cross_filter(&mask, pick);
        }
    }
    mask
}

/// One dilation (`max`) or erosion (`min`) with the 3x3 cross.
fn cross_filter(mask: &GrayImage, pick: fn(u8, u8) -> u8) -> GrayImage {
    let (width, height) = mask.dimensions();
    let at = |x: u32, y: u32| mask.get_pixel(x, y)[0];

    GrayImage::from_fn(width, height, |x, y| {
        let neighbours = [
            (x.saturating_sub(1), y),
            ((x + 1).min(width - 1), y),
            (x, y.saturating_sub(1)),
            (x, (y + 1).min(height - 1)),
        ];
        Luma([neighbours
            .into_iter()
            .fold(at(x, y), |value, (nx, ny)| pick(value, at(nx, ny)))])
    })
}

#[cfg(feature = "enhanced")]
mod enhanced {
    use image::GrayImage;
    use imageproc::{
        filter,
        morphology::{grayscale_close, grayscale_open, Mask},
    };

    use super::{EdgeFilterParams, EdgePreservingFilter, Morphology, StructuringElement};

    /// Bilateral filter from `imageproc`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct BilateralFilter;

    impl EdgePreservingFilter for BilateralFilter {
        fn name(&self) -> &'static str {
            "imageproc-bilateral"
        }

        fn filter(&self, alpha: &GrayImage, params: &EdgeFilterParams) -> GrayImage {
            // imageproc takes the window radius, not the diameter.
            let window = (params.diameter / 2).max(1);
            filter::bilateral_filter(alpha, window, params.sigma_color, params.sigma_space)
        }
    }

    /// Grayscale morphology from `imageproc`.
    ///
    /// Works on max/min filters, so intermediate levels such as the trimap's
    /// unknown band survive.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ImageprocMorphology;

    /// Repeating a dilation or erosion `n` times with radius `r` equals one
    /// pass with radius `n * r` for squares and diamonds alike.
    fn reach(element: StructuringElement, iterations: usize) -> Option<Mask> {
        let radius = usize::from(element.radius()).saturating_mul(iterations);
        if radius == 0 {
            return None;
        }
        let radius = u8::try_from(radius).unwrap_or(u8::MAX);
        Some(match element {
            StructuringElement::Square { .. } => Mask::square(radius),
            StructuringElement::Ellipse { .. } => Mask::diamond(radius),
        })
    }

    impl Morphology for ImageprocMorphology {
        fn name(&self) -> &'static str {
            "imageproc-morphology"
        }

        fn close(&self, mask: &GrayImage, element: StructuringElement, iterations: usize) -> GrayImage {
            match reach(element, iterations) {
                Some(kernel) => grayscale_close(mask, &kernel),
                None => mask.clone(),
            }
        }

        fn open(&self, mask: &GrayImage, element: StructuringElement, iterations: usize) -> GrayImage {
            match reach(element, iterations) {
                Some(kernel) => grayscale_open(mask, &kernel),
                None => mask.clone(),
            }
        }
    }
}

#[cfg(feature = "enhanced")]
pub use enhanced::{BilateralFilter, ImageprocMorphology};

/// Which set of strategies a toolkit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementTier {
    Basic,
    Enhanced,
}

/// The strategies used by the matting pipeline and the alpha refiner.
#[derive(Debug, Clone)]
pub struct RefinementToolkit {
    tier: RefinementTier,
    smoothing: Arc<dyn Smoothing>,
    edge_filter: Arc<dyn EdgePreservingFilter>,
    morphology: Option<Arc<dyn Morphology>>,
}

impl RefinementToolkit {
    /// Strategies that need nothing beyond the `image` crate.
    pub fn basic() -> Self {
        Self {
            tier: RefinementTier::Basic,
            smoothing: Arc::new(ImageOpsSmoothing),
            edge_filter: Arc::new(GaussianEdgeFallback),
            morphology: None,
        }
    }

    /// Strategies backed by `imageproc`.
    #[cfg(feature = "enhanced")]
    pub fn enhanced() -> Self {
        Self {
            tier: RefinementTier::Enhanced,
            smoothing: Arc::new(ImageOpsSmoothing),
            edge_filter: Arc::new(BilateralFilter),
            morphology: Some(Arc::new(ImageprocMorphology)),
        }
    }

    /// The best tier compiled into this build.
    pub fn detect() -> Self {
        #[cfg(feature = "enhanced")]
        let toolkit = Self::enhanced();
        #[cfg(not(feature = "enhanced"))]
        let toolkit = Self::basic();

        tracing::debug!(
            tier = ?toolkit.tier,
            smoothing = toolkit.smoothing.name(),
            edge_filter = toolkit.edge_filter.name(),
            morphology = toolkit.morphology.as_ref().map(|m| m.name()),
            "refinement toolkit selected"
        );
        toolkit
    }

    /// Assemble a toolkit from explicit strategies.
    pub fn custom(
        smoothing: Arc<dyn Smoothing>,
        edge_filter: Arc<dyn EdgePreservingFilter>,
        morphology: Option<Arc<dyn Morphology>>,
    ) -> Self {
        let tier = if morphology.is_some() {
            RefinementTier::Enhanced
        } else {
            RefinementTier::Basic
        };
        Self {
            tier,
            smoothing,
            edge_filter,
            morphology,
        }
    }

    pub const fn tier(&self) -> RefinementTier {
        self.tier
    }

    pub fn smoothing(&self) -> &dyn Smoothing {
        self.smoothing.as_ref()
    }

    pub fn edge_filter(&self) -> &dyn EdgePreservingFilter {
        self.edge_filter.as_ref()
    }

    pub fn morphology(&self) -> Option<&dyn Morphology> {
        self.morphology.as_deref()
    }
}

impl Default for RefinementToolkit {
    fn default() -> Self {
        Self::detect()
    }
}
