//! NFOR - spatio-temporal denoising of path-traced renders.
//!
//! Every pixel fits a weighted linear regression of its noisy radiance on auxiliary
//! features (albedo, normal, optional depth) over a search window that spans a
//! temporal window of frames. Non-local means weights decide how much each
//! neighbouring observation counts, and two bandwidths are blended per pixel by
//! their estimated error.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use nfor::{DenoiseConfig, Denoiser, FrameInputs, History, Image, ViewContext};
//!
//! let denoiser = Denoiser::new(DenoiseConfig::default());
//! let history = History::default();
//! let mut output = Image::new_default(width, height, 4);
//!
//! let inputs = FrameInputs { radiance: &radiance, variance: &variance, albedo: &albedo,
//!     normal: &normal, depth: Some(&depth) };
//! if !denoiser.denoise(&ViewContext::offline(), &inputs, &history, &mut output, None) {
//!     // Still filling the temporal window.
//!     output = radiance.clone();
//! }
//! ```

pub mod bandwidth;
pub mod config;
mod denoiser;
pub mod descriptor;
mod error;
pub mod history;
mod image;
pub mod nlm;
pub mod preprocess;
pub mod regression;
pub mod tiling;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Entry points
// ============================================================================

pub use denoiser::Denoiser;
pub use history::{FrameInputs, History};

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    AlbedoDivideConfig, AtlasType, BandwidthConfig, DenoiseConfig, FeatureConfig,
    FrameCountCondition, LinearSolverDevice, NlmConfig, PatchConfig, ReconstructionPolicy,
    RecoverPhase, RegressionConfig, RegressionDevice, SolverType, TemporalConfig, TileCount,
    TileDebug, TilingConfig, ViewContext, WeightLayout,
};
pub use error::ConfigError;

// ============================================================================
// Images and descriptors
// ============================================================================

pub use descriptor::{FeatureDesc, RadianceDesc, TextureDesc, VarianceType};
pub use image::{mirror_coord, Image, Rect};
